use super::*;
use crate::base::{Resource, ResourceStat, RetStatus};
use crate::utils::{self, Scheduler, TaskHandle};
use crate::{logging, matcher};
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

// debounce window for half-open conversion decisions, so bursts of probes
// collapse into a single decision driven by the final success counter
const HALF_OPEN_CONVERSION_DELAY: Duration = Duration::from_secs(1);

/// States of the circuit breaker state machine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

impl Default for State {
    fn default() -> State {
        State::Closed
    }
}

/// Half-open bookkeeping carried by a [`BreakerStatus`]: the request
/// admission budget and the conversion-scheduled bit.
#[derive(Debug)]
pub struct HalfOpenDetail {
    max_allowed: u32,
    remaining: AtomicI64,
    scheduled: AtomicBool,
}

impl HalfOpenDetail {
    fn new(max_allowed: u32) -> Self {
        HalfOpenDetail {
            max_allowed,
            remaining: AtomicI64::new(max_allowed as i64),
            scheduled: AtomicBool::new(false),
        }
    }

    pub fn max_allowed(&self) -> u32 {
        self.max_allowed
    }

    /// Takes one admission token. Denied once the budget is exhausted.
    pub fn acquire(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                if remaining > 0 {
                    Some(remaining - 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    /// Flips the conversion-scheduled bit; true for the first caller only.
    fn mark_scheduled(&self) -> bool {
        !self.scheduled.swap(true, Ordering::SeqCst)
    }
}

/// Immutable status snapshot installed atomically on every transition.
/// Readers never observe a torn value.
#[derive(Debug)]
pub struct BreakerStatus {
    rule_name: String,
    state: State,
    since_ms: u64,
    fallback: Option<FallbackInfo>,
    half_open: Option<HalfOpenDetail>,
}

impl BreakerStatus {
    fn closed(rule_name: String, since_ms: u64) -> Self {
        BreakerStatus {
            rule_name,
            state: State::Closed,
            since_ms,
            fallback: None,
            half_open: None,
        }
    }

    fn open(rule_name: String, since_ms: u64, fallback: Option<FallbackInfo>) -> Self {
        BreakerStatus {
            rule_name,
            state: State::Open,
            since_ms,
            fallback,
            half_open: None,
        }
    }

    fn half_open(rule_name: String, since_ms: u64, max_allowed: u32) -> Self {
        BreakerStatus {
            rule_name,
            state: State::HalfOpen,
            since_ms,
            fallback: None,
            half_open: Some(HalfOpenDetail::new(max_allowed)),
        }
    }

    pub fn rule_name(&self) -> &str {
        &self.rule_name
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn since_ms(&self) -> u64 {
        self.since_ms
    }

    pub fn fallback(&self) -> Option<&FallbackInfo> {
        self.fallback.as_ref()
    }

    pub fn half_open_detail(&self) -> Option<&HalfOpenDetail> {
        self.half_open.as_ref()
    }
}

/// Outcome of a circuit breaker check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub pass: bool,
    pub rule_name: String,
    pub fallback: Option<FallbackInfo>,
}

impl CheckResult {
    /// The permissive result used when no breaker guards a resource.
    pub fn allowed() -> Self {
        CheckResult {
            pass: true,
            rule_name: String::new(),
            fallback: None,
        }
    }
}

/// Per-resource circuit breaker: owns the trigger counters, the status
/// reference and the scheduled transition timers.
///
/// Samples enter through [`ResourceBreaker::report`]; admission queries go
/// through [`ResourceBreaker::check`]. All four transitions serialize on one
/// per-breaker mutex and are no-ops unless the current state matches the
/// expected predecessor, so concurrent reports and timer fires cannot race
/// the machine into an invalid state.
pub struct ResourceBreaker {
    resource: Resource,
    rule: Arc<Rule>,
    counters: Vec<Box<dyn TriggerCounter>>,
    status: ArcSwap<BreakerStatus>,
    half_open_success: AtomicU32,
    fallback: Option<FallbackInfo>,
    consecutive_success: u32,
    sleep_window_ms: u64,
    scheduler: Arc<Scheduler>,
    transition: Mutex<()>,
    pending: Mutex<Option<TaskHandle>>,
    me: Weak<ResourceBreaker>,
}

impl ResourceBreaker {
    pub fn new(resource: Resource, rule: Arc<Rule>, scheduler: Arc<Scheduler>) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<ResourceBreaker>| {
            let handler: Weak<dyn StatusChangeHandler> = me.clone();
            let mut counters: Vec<Box<dyn TriggerCounter>> = Vec::new();
            for condition in &rule.trigger_conditions {
                match condition.trigger_type {
                    TriggerType::ConsecutiveError => {
                        counters.push(Box::new(ConsecutiveCounter::new(
                            rule.name.clone(),
                            condition,
                            handler.clone(),
                        )));
                    }
                    TriggerType::ErrorRate => {
                        match ErrRateCounter::new(rule.name.clone(), condition, handler.clone()) {
                            Ok(counter) => counters.push(Box::new(counter)),
                            Err(err) => logging::error!(
                                "[CircuitBreaker] ignoring trigger condition of rule {}, reason: {:?}",
                                rule.name,
                                err
                            ),
                        }
                    }
                }
            }
            let status = BreakerStatus::closed(rule.name.clone(), utils::curr_time_millis());
            ResourceBreaker {
                fallback: rule.build_fallback_info(),
                consecutive_success: rule.recover_condition.consecutive_success,
                sleep_window_ms: rule.sleep_window_ms(),
                resource,
                rule,
                counters,
                status: ArcSwap::from_pointee(status),
                half_open_success: AtomicU32::new(0),
                scheduler,
                transition: Mutex::new(()),
                pending: Mutex::new(None),
                me: me.clone(),
            }
        })
    }

    pub fn bound_rule(&self) -> &Arc<Rule> {
        &self.rule
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn current_state(&self) -> State {
        self.status.load().state()
    }

    /// Records a completed invocation and drives the state machine.
    pub fn report(&self, stat: &ResourceStat) {
        let success = self.classify(stat);
        let mut status = self.status.load();
        if status.state() == State::Open
            && utils::curr_time_millis().saturating_sub(status.since_ms()) >= self.sleep_window_ms
        {
            // the sleep-window timer was lost; force the probing transition
            self.open_to_half_open();
            status = self.status.load();
        }
        match status.state() {
            State::HalfOpen => {
                if success {
                    let count = self.half_open_success.fetch_add(1, Ordering::SeqCst) + 1;
                    if count >= self.consecutive_success {
                        self.schedule_half_open_conversion(&status);
                    }
                } else {
                    self.half_open_success.store(0, Ordering::SeqCst);
                    self.schedule_half_open_conversion(&status);
                }
            }
            State::Closed => {
                for counter in &self.counters {
                    counter.report(success);
                }
            }
            State::Open => {}
        }
    }

    /// Admission query. Denies while Open; while Half-Open, admits at most
    /// `consecutive_success` probes.
    pub fn check(&self) -> CheckResult {
        let status = self.status.load();
        let pass = match status.state() {
            State::Closed => true,
            State::Open => false,
            State::HalfOpen => status
                .half_open_detail()
                .map(|detail| detail.acquire())
                .unwrap_or(true),
        };
        CheckResult {
            pass,
            rule_name: status.rule_name().to_string(),
            fallback: if pass {
                None
            } else {
                status.fallback().cloned()
            },
        }
    }

    /// Cancels the outstanding transition timer, if any. Called when the
    /// breaker is replaced after a rule update or at registry shutdown.
    pub fn cancel_pending(&self) {
        if let Some(handle) = self.pending.lock().unwrap().take() {
            handle.cancel();
        }
    }

    fn classify(&self, stat: &ResourceStat) -> bool {
        match stat.ret_status {
            RetStatus::Success => true,
            RetStatus::Fail => false,
            RetStatus::Unknown => {
                let mut success = true;
                for condition in &self.rule.error_conditions {
                    match condition.input_type {
                        ErrorInputType::RetCode => {
                            if matcher::match_string_value(
                                &condition.condition,
                                &stat.ret_code.to_string(),
                            ) {
                                success = false;
                            }
                        }
                        ErrorInputType::Delay => {
                            // operand validated numeric at rule load
                            if let Ok(operand) = condition.condition.value.trim().parse::<u64>() {
                                if stat.delay_ms >= operand {
                                    success = false;
                                }
                            }
                        }
                    }
                }
                success
            }
        }
    }

    fn to_open(&self, prev: State, rule_name: &str) {
        let new_status = BreakerStatus::open(
            rule_name.to_string(),
            utils::curr_time_millis(),
            self.fallback.clone(),
        );
        self.status.store(Arc::new(new_status));
        logging::info!(
            "[CircuitBreaker] previous status {:?}, current status {:?}, resource {}, rule {}",
            prev,
            State::Open,
            self.resource,
            rule_name
        );
        let me = self.me.clone();
        let handle = self
            .scheduler
            .schedule_once(Duration::from_millis(self.sleep_window_ms), move || {
                if let Some(breaker) = me.upgrade() {
                    breaker.open_to_half_open();
                }
            });
        *self.pending.lock().unwrap() = Some(handle);
    }

    fn schedule_half_open_conversion(&self, status: &BreakerStatus) {
        let detail = match status.half_open_detail() {
            Some(detail) => detail,
            None => return,
        };
        if !detail.mark_scheduled() {
            return;
        }
        let me = self.me.clone();
        let handle = self
            .scheduler
            .schedule_once(HALF_OPEN_CONVERSION_DELAY, move || {
                if let Some(breaker) = me.upgrade() {
                    breaker.check_half_open_conversion();
                }
            });
        *self.pending.lock().unwrap() = Some(handle);
    }

    fn check_half_open_conversion(&self) {
        let count = self.half_open_success.load(Ordering::SeqCst);
        if count >= self.consecutive_success {
            logging::debug!(
                "[CircuitBreaker] half-open successes {}/{}, closing, resource {}",
                count,
                self.consecutive_success,
                self.resource
            );
            self.half_open_to_close();
        } else {
            logging::debug!(
                "[CircuitBreaker] half-open successes {}/{}, reopening, resource {}",
                count,
                self.consecutive_success,
                self.resource
            );
            self.half_open_to_open();
        }
    }
}

impl StatusChangeHandler for ResourceBreaker {
    fn close_to_open(&self, rule_name: &str) {
        let _guard = self.transition.lock().unwrap();
        let status = self.status.load();
        if status.state() == State::Closed {
            self.to_open(State::Closed, rule_name);
        }
    }

    fn open_to_half_open(&self) {
        let _guard = self.transition.lock().unwrap();
        let status = self.status.load();
        if status.state() != State::Open {
            return;
        }
        self.half_open_success.store(0, Ordering::SeqCst);
        let new_status = BreakerStatus::half_open(
            status.rule_name().to_string(),
            utils::curr_time_millis(),
            self.consecutive_success,
        );
        self.status.store(Arc::new(new_status));
        logging::info!(
            "[CircuitBreaker] previous status {:?}, current status {:?}, resource {}, rule {}",
            State::Open,
            State::HalfOpen,
            self.resource,
            status.rule_name()
        );
    }

    fn half_open_to_close(&self) {
        let _guard = self.transition.lock().unwrap();
        let status = self.status.load();
        if status.state() != State::HalfOpen {
            return;
        }
        let new_status =
            BreakerStatus::closed(status.rule_name().to_string(), utils::curr_time_millis());
        self.status.store(Arc::new(new_status));
        logging::info!(
            "[CircuitBreaker] previous status {:?}, current status {:?}, resource {}, rule {}",
            State::HalfOpen,
            State::Closed,
            self.resource,
            status.rule_name()
        );
        for counter in &self.counters {
            counter.resume();
        }
    }

    fn half_open_to_open(&self) {
        let _guard = self.transition.lock().unwrap();
        let status = self.status.load();
        if status.state() == State::HalfOpen {
            self.to_open(State::HalfOpen, status.rule_name());
        }
    }
}
