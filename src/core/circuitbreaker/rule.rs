use super::*;
use crate::base::MeshRule;
use crate::matcher::MatchString;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Level a circuit breaking rule applies at. The level decides which
/// [`crate::base::Resource`] variants the rule can guard.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BreakLevel {
    Service,
    Method,
    Subset,
    Instance,
}

impl Default for BreakLevel {
    fn default() -> BreakLevel {
        BreakLevel::Service
    }
}

/// `TriggerType` decides which counter aggregates samples for a condition.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerType {
    /// Trip when the failure ratio over the interval crosses `error_percent`.
    ErrorRate,
    /// Trip after `error_count` consecutive failures.
    ConsecutiveError,
}

impl Default for TriggerType {
    fn default() -> TriggerType {
        TriggerType::ErrorRate
    }
}

/// Predicate over recent samples that moves a breaker Closed → Open.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TriggerCondition {
    pub trigger_type: TriggerType,
    /// Statistic window, seconds. Only `ErrorRate` uses it.
    pub interval_s: u32,
    /// Minimum samples in the window before `ErrorRate` may trip.
    pub min_request_amount: u64,
    /// Failure percentage threshold for `ErrorRate`, in (0, 100].
    pub error_percent: u32,
    /// Streak length threshold for `ConsecutiveError`.
    pub error_count: u32,
}

/// Which sample field an error condition inspects.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorInputType {
    /// Match the string form of the return code.
    RetCode,
    /// Operand is an integer; the sample fails when `delay_ms >= operand`.
    Delay,
}

impl Default for ErrorInputType {
    fn default() -> ErrorInputType {
        ErrorInputType::RetCode
    }
}

/// Classifies `RetStatus::Unknown` samples as failures. Conditions OR
/// together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ErrorCondition {
    pub input_type: ErrorInputType,
    pub condition: MatchString,
}

/// Parameters controlling Open → Half-Open → Closed recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RecoverCondition {
    /// Seconds an open breaker sleeps before probing.
    pub sleep_window_s: u32,
    /// Contiguous successes required to close from half-open. Also bounds the
    /// number of requests admitted while half-open.
    pub consecutive_success: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MessageHeader {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FallbackResponse {
    pub code: i64,
    pub headers: Vec<MessageHeader>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FallbackConfig {
    pub enable: bool,
    pub response: FallbackResponse,
}

/// Fallback snapshot handed back on denied checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackInfo {
    pub code: i64,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Rule encompasses the fields of a circuit breaking rule bound to a
/// resource level of one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Rule {
    /// unique id
    pub id: String,
    /// rule name, carried in statuses and event logs
    pub name: String,
    pub level: BreakLevel,
    /// disabled rules are skipped at resolution time
    pub enable: bool,
    pub trigger_conditions: Vec<TriggerCondition>,
    pub error_conditions: Vec<ErrorCondition>,
    pub recover_condition: RecoverCondition,
    pub fallback_config: Option<FallbackConfig>,
}

impl Default for Rule {
    fn default() -> Self {
        Rule {
            id: uuid::Uuid::new_v4().to_string(),
            name: String::default(),
            level: BreakLevel::default(),
            enable: true,
            trigger_conditions: Vec::new(),
            error_conditions: Vec::new(),
            recover_condition: RecoverCondition::default(),
            fallback_config: None,
        }
    }
}

impl Rule {
    pub fn sleep_window_ms(&self) -> u64 {
        self.recover_condition.sleep_window_s as u64 * 1000
    }

    /// Fallback info is only materialized for service and method level rules
    /// with an enabled fallback config.
    pub fn build_fallback_info(&self) -> Option<FallbackInfo> {
        if self.level != BreakLevel::Service && self.level != BreakLevel::Method {
            return None;
        }
        let config = self.fallback_config.as_ref()?;
        if !config.enable {
            return None;
        }
        let mut headers = HashMap::with_capacity(config.response.headers.len());
        for header in &config.response.headers {
            headers.insert(header.key.clone(), header.value.clone());
        }
        Some(FallbackInfo {
            code: config.response.code,
            headers,
            body: config.response.body.clone(),
        })
    }
}

impl MeshRule for Rule {
    fn rule_name(&self) -> String {
        self.name.clone()
    }

    fn is_valid(&self) -> crate::Result<()> {
        if self.name.is_empty() {
            return Err(Error::msg("empty rule name"));
        }
        if self.trigger_conditions.is_empty() {
            return Err(Error::msg("no trigger conditions"));
        }
        for condition in &self.trigger_conditions {
            match condition.trigger_type {
                TriggerType::ErrorRate => {
                    if condition.interval_s == 0 {
                        return Err(Error::msg("invalid interval_s"));
                    }
                    if condition.error_percent == 0 || condition.error_percent > 100 {
                        return Err(Error::msg(
                            "invalid error_percent (valid range: (0, 100])",
                        ));
                    }
                }
                TriggerType::ConsecutiveError => {
                    if condition.error_count == 0 {
                        return Err(Error::msg("invalid error_count"));
                    }
                }
            }
        }
        for condition in &self.error_conditions {
            if condition.input_type == ErrorInputType::Delay
                && condition.condition.value.trim().parse::<u64>().is_err()
            {
                return Err(Error::msg("non-numeric DELAY operand"));
            }
        }
        if self.recover_condition.sleep_window_s == 0 {
            return Err(Error::msg("invalid sleep_window_s"));
        }
        if self.recover_condition.consecutive_success == 0 {
            return Err(Error::msg("invalid consecutive_success"));
        }
        Ok(())
    }
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.level == other.level
            && self.enable == other.enable
            && self.trigger_conditions == other.trigger_conditions
            && self.error_conditions == other.error_conditions
            && self.recover_condition == other.recover_condition
            && self.fallback_config == other.fallback_config
    }
}

impl Eq for Rule {}

impl Hash for Rule {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmtted = serde_json::to_string_pretty(self).unwrap();
        write!(f, "{}", fmtted)
    }
}
