use crate::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

// `second == EMPTY` marks a bucket that has never been written
const EMPTY: u64 = 0;

/// One per-second statistic bucket. The metric itself is atomic; `second` is
/// the unix second the bucket currently represents.
#[derive(Debug, Default)]
struct WindowBucket {
    second: AtomicU64,
    total: AtomicU64,
    failed: AtomicU64,
}

/// `ErrRateWindow` is a ring of per-second buckets over the configured
/// interval, treated as a circular array indexed by wall-clock second modulo
/// ring length. A bucket stamped with a stale second is zeroed before use, so
/// the sum over the ring equals the observed counts of the last `interval_s`
/// seconds (give or take one bucket of skew).
#[derive(Debug)]
pub struct ErrRateWindow {
    interval_s: u32,
    buckets: Vec<WindowBucket>,
    // conditional (tiny scope) locks guarding deprecated-bucket resets
    mutex: Vec<Mutex<bool>>,
}

impl ErrRateWindow {
    pub fn new(interval_s: u32) -> crate::Result<Self> {
        if interval_s == 0 {
            return Err(Error::msg("invalid interval_s for error rate window"));
        }
        let mut buckets = Vec::with_capacity(interval_s as usize);
        let mut mutex = Vec::with_capacity(interval_s as usize);
        for _ in 0..interval_s {
            buckets.push(WindowBucket::default());
            mutex.push(Mutex::new(false));
        }
        Ok(ErrRateWindow {
            interval_s,
            buckets,
            mutex,
        })
    }

    pub fn interval_s(&self) -> u32 {
        self.interval_s
    }

    /// Records one sample at `now_ms`.
    pub fn add(&self, now_ms: u64, success: bool) {
        let bucket = self.bucket_of_time(now_ms / 1000);
        bucket.total.fetch_add(1, Ordering::SeqCst);
        if !success {
            bucket.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Sums `(total, failed)` over the buckets still inside the interval
    /// ending at `now_ms`.
    pub fn sum(&self, now_ms: u64) -> (u64, u64) {
        let now_s = now_ms / 1000;
        let mut total = 0;
        let mut failed = 0;
        for bucket in &self.buckets {
            let second = bucket.second.load(Ordering::SeqCst);
            if second == EMPTY || second + (self.interval_s as u64) <= now_s {
                continue;
            }
            total += bucket.total.load(Ordering::SeqCst);
            failed += bucket.failed.load(Ordering::SeqCst);
        }
        (total, failed)
    }

    /// Zeros every bucket.
    pub fn reset(&self) {
        for bucket in &self.buckets {
            bucket.second.store(EMPTY, Ordering::SeqCst);
            bucket.total.store(0, Ordering::SeqCst);
            bucket.failed.store(0, Ordering::SeqCst);
        }
    }

    /*
    Get the bucket of the given second from the ring.
    - (1) Bucket carries the target second, then just return it.
    - (2) Bucket is empty or deprecated, then reset it to the target second.
          Reset and clean-up are hard to be atomic, so a conditional lock
          guards the reset; it only takes effect on second boundaries and in
          most cases won't lead to performance loss.
    */
    fn bucket_of_time(&self, now_s: u64) -> &WindowBucket {
        let idx = (now_s % self.buckets.len() as u64) as usize;
        let bucket = &self.buckets[idx];
        loop {
            let second = bucket.second.load(Ordering::SeqCst);
            if second == now_s {
                return bucket;
            }
            if second < now_s {
                if self.mutex[idx].try_lock().is_ok() {
                    if bucket.second.load(Ordering::SeqCst) < now_s {
                        bucket.total.store(0, Ordering::SeqCst);
                        bucket.failed.store(0, Ordering::SeqCst);
                        bucket.second.store(now_s, Ordering::SeqCst);
                    }
                } else {
                    // another thread is resetting this bucket
                    std::thread::yield_now();
                }
            } else {
                // clock went backwards inside the ring; count into the newer bucket
                return bucket;
            }
        }
    }
}
