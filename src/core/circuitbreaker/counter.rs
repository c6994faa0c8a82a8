use super::*;
use crate::utils;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Weak;

/// `StatusChangeHandler` receives the state machine transitions. The
/// per-resource breaker implements it; trigger counters only ever invoke
/// `close_to_open`.
pub trait StatusChangeHandler: Send + Sync {
    fn close_to_open(&self, rule_name: &str);
    fn open_to_half_open(&self);
    fn half_open_to_close(&self);
    fn half_open_to_open(&self);
}

/// `TriggerCounter` aggregates success/failure samples for one trigger
/// condition and fires `close_to_open` on its handler when the threshold is
/// met. Firing is idempotent until `resume()`: a tripped counter ignores
/// further samples, and only the state machine resets it (on transition to
/// Closed).
pub trait TriggerCounter: Send + Sync {
    fn report(&self, success: bool);
    fn resume(&self);
}

/// Trips after `error_count` consecutive failures.
pub struct ConsecutiveCounter {
    rule_name: String,
    error_count_threshold: u32,
    streak: AtomicU32,
    suspended: AtomicBool,
    handler: Weak<dyn StatusChangeHandler>,
}

impl ConsecutiveCounter {
    pub fn new(
        rule_name: String,
        condition: &TriggerCondition,
        handler: Weak<dyn StatusChangeHandler>,
    ) -> Self {
        ConsecutiveCounter {
            rule_name,
            error_count_threshold: condition.error_count,
            streak: AtomicU32::new(0),
            suspended: AtomicBool::new(false),
            handler,
        }
    }
}

impl TriggerCounter for ConsecutiveCounter {
    fn report(&self, success: bool) {
        if self.suspended.load(Ordering::SeqCst) {
            return;
        }
        if success {
            self.streak.store(0, Ordering::SeqCst);
            return;
        }
        let streak = self.streak.fetch_add(1, Ordering::SeqCst) + 1;
        if streak >= self.error_count_threshold && !self.suspended.swap(true, Ordering::SeqCst) {
            self.streak.store(0, Ordering::SeqCst);
            if let Some(handler) = self.handler.upgrade() {
                handler.close_to_open(&self.rule_name);
            }
        }
    }

    fn resume(&self) {
        self.streak.store(0, Ordering::SeqCst);
        self.suspended.store(false, Ordering::SeqCst);
    }
}

/// Trips when the failure ratio over the statistic window crosses
/// `error_percent`, once at least `min_request_amount` samples were seen.
/// Threshold evaluation is debounced to once per observed wall-clock second,
/// driven by sample arrival.
pub struct ErrRateCounter {
    rule_name: String,
    min_request_amount: u64,
    error_percent: u32,
    window: ErrRateWindow,
    last_eval_s: AtomicU64,
    suspended: AtomicBool,
    handler: Weak<dyn StatusChangeHandler>,
}

impl ErrRateCounter {
    pub fn new(
        rule_name: String,
        condition: &TriggerCondition,
        handler: Weak<dyn StatusChangeHandler>,
    ) -> crate::Result<Self> {
        Ok(ErrRateCounter {
            rule_name,
            min_request_amount: condition.min_request_amount,
            error_percent: condition.error_percent,
            window: ErrRateWindow::new(condition.interval_s)?,
            last_eval_s: AtomicU64::new(0),
            suspended: AtomicBool::new(false),
            handler,
        })
    }

    fn evaluate(&self, now_ms: u64) {
        let (total, failed) = self.window.sum(now_ms);
        if total < self.min_request_amount {
            return;
        }
        if failed * 100 >= total * self.error_percent as u64
            && !self.suspended.swap(true, Ordering::SeqCst)
        {
            if let Some(handler) = self.handler.upgrade() {
                handler.close_to_open(&self.rule_name);
            }
        }
    }
}

impl TriggerCounter for ErrRateCounter {
    fn report(&self, success: bool) {
        if self.suspended.load(Ordering::SeqCst) {
            return;
        }
        let now_ms = utils::curr_time_millis();
        self.window.add(now_ms, success);
        let now_s = now_ms / 1000;
        if self.last_eval_s.swap(now_s, Ordering::SeqCst) != now_s {
            self.evaluate(now_ms);
        }
    }

    fn resume(&self) {
        self.window.reset();
        self.last_eval_s.store(0, Ordering::SeqCst);
        self.suspended.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::utils::sleep_for_ms;
    use mockall::mock;
    use std::sync::Arc;

    mock! {
        Handler {}
        impl StatusChangeHandler for Handler {
            fn close_to_open(&self, rule_name: &str);
            fn open_to_half_open(&self);
            fn half_open_to_close(&self);
            fn half_open_to_open(&self);
        }
    }

    fn consecutive_condition(error_count: u32) -> TriggerCondition {
        TriggerCondition {
            trigger_type: TriggerType::ConsecutiveError,
            error_count,
            ..Default::default()
        }
    }

    #[test]
    fn consecutive_trips_once_per_streak() {
        let mut handler = MockHandler::new();
        handler
            .expect_close_to_open()
            .withf(|name| name == "abc")
            .times(1)
            .return_const(());
        let handler: Arc<dyn StatusChangeHandler> = Arc::new(handler);
        let counter =
            ConsecutiveCounter::new("abc".into(), &consecutive_condition(3), Arc::downgrade(&handler));

        // five failures, threshold three: exactly one trip until resume
        for _ in 0..5 {
            counter.report(false);
        }
    }

    #[test]
    fn consecutive_success_resets_streak() {
        let mut handler = MockHandler::new();
        handler.expect_close_to_open().times(0);
        let handler: Arc<dyn StatusChangeHandler> = Arc::new(handler);
        let counter =
            ConsecutiveCounter::new("abc".into(), &consecutive_condition(3), Arc::downgrade(&handler));

        counter.report(false);
        counter.report(false);
        counter.report(true);
        counter.report(false);
        counter.report(false);
    }

    #[test]
    fn consecutive_resume_rearms() {
        let mut handler = MockHandler::new();
        handler.expect_close_to_open().times(2).return_const(());
        let handler: Arc<dyn StatusChangeHandler> = Arc::new(handler);
        let counter =
            ConsecutiveCounter::new("abc".into(), &consecutive_condition(2), Arc::downgrade(&handler));

        counter.report(false);
        counter.report(false);
        // suspended: ignored
        counter.report(false);
        counter.resume();
        counter.report(false);
        counter.report(false);
    }

    #[test]
    fn err_rate_respects_min_request_amount() {
        let mut handler = MockHandler::new();
        handler.expect_close_to_open().times(0);
        let handler: Arc<dyn StatusChangeHandler> = Arc::new(handler);
        let condition = TriggerCondition {
            trigger_type: TriggerType::ErrorRate,
            interval_s: 10,
            min_request_amount: 10,
            error_percent: 50,
            ..Default::default()
        };
        let counter =
            ErrRateCounter::new("abc".into(), &condition, Arc::downgrade(&handler)).unwrap();
        for _ in 0..5 {
            counter.report(false);
            sleep_for_ms(250);
        }
    }

    #[test]
    fn err_rate_trips_over_threshold() {
        let mut handler = MockHandler::new();
        handler
            .expect_close_to_open()
            .withf(|name| name == "abc")
            .times(1)
            .return_const(());
        let handler: Arc<dyn StatusChangeHandler> = Arc::new(handler);
        let condition = TriggerCondition {
            trigger_type: TriggerType::ErrorRate,
            interval_s: 10,
            min_request_amount: 5,
            error_percent: 50,
            ..Default::default()
        };
        let counter =
            ErrRateCounter::new("abc".into(), &condition, Arc::downgrade(&handler)).unwrap();
        for _ in 0..5 {
            counter.report(false);
        }
        // cross a second boundary so the next sample re-evaluates
        sleep_for_ms(1100);
        counter.report(false);
    }
}
