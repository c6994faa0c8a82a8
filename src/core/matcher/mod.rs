//! Label/metadata matching engine.
//!
//! Routing rule source/destination clauses and circuit breaker RET_CODE error
//! conditions express their predicates as [`MatchString`] values. The engine
//! is a pair of pure functions: [`match_string_value`] compares one value,
//! [`match_metadata`] evaluates a whole clause map against actual labels with
//! `$var` substitution and env-key capture.

use crate::logging;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Wildcard accepted for namespaces, services and literal label values.
pub const MATCH_ALL: &str = "*";

/// Comparison operator carried by a [`MatchString`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchType {
    Exact,
    Regex,
    NotEquals,
    /// Operand is a `,`-separated candidate list.
    In,
    NotIn,
    /// Operand is `min~max`, both integers, inclusive.
    Range,
}

impl Default for MatchType {
    fn default() -> MatchType {
        MatchType::Exact
    }
}

/// A match expression: an operator plus its operand. An operand with a `$`
/// prefix references a variable resolved at match time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MatchString {
    pub match_type: MatchType,
    pub value: String,
}

impl MatchString {
    pub fn new<V: Into<String>>(match_type: MatchType, value: V) -> Self {
        MatchString {
            match_type,
            value: value.into(),
        }
    }

    pub fn exact<V: Into<String>>(value: V) -> Self {
        Self::new(MatchType::Exact, value)
    }

    pub fn is_variable(&self) -> bool {
        self.value.starts_with('$')
    }

    pub fn variable_name(&self) -> &str {
        self.value.trim_start_matches('$')
    }
}

lazy_static! {
    // compiled-pattern cache; a pattern that fails to compile is cached as
    // None so the failure is logged exactly once
    static ref REGEX_CACHE: Mutex<HashMap<String, Option<Regex>>> = Mutex::new(HashMap::new());
}

fn compiled(pattern: &str) -> Option<Regex> {
    let mut cache = REGEX_CACHE.lock().unwrap();
    if let Some(entry) = cache.get(pattern) {
        return entry.clone();
    }
    let compiled = match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(err) => {
            logging::warn!(
                "[Matcher] invalid regex pattern {:?}, treated as non-match: {:?}",
                pattern,
                err
            );
            None
        }
    };
    cache.insert(pattern.to_string(), compiled.clone());
    compiled
}

fn compare(match_type: MatchType, expected: &str, actual: &str) -> bool {
    match match_type {
        MatchType::Exact => expected == MATCH_ALL || expected == actual,
        MatchType::NotEquals => expected != actual,
        MatchType::Regex => compiled(expected)
            .map(|re| re.is_match(actual))
            .unwrap_or(false),
        MatchType::In => expected.split(',').any(|candidate| candidate == actual),
        MatchType::NotIn => !expected.split(',').any(|candidate| candidate == actual),
        MatchType::Range => match_range(expected, actual),
    }
}

fn match_range(expected: &str, actual: &str) -> bool {
    let (min, max) = match expected.split_once('~') {
        Some(bounds) => bounds,
        None => return false,
    };
    let min = min.trim().parse::<i64>();
    let max = max.trim().parse::<i64>();
    let actual = actual.trim().parse::<i64>();
    match (min, max, actual) {
        (Ok(min), Ok(max), Ok(actual)) => min <= actual && actual <= max,
        _ => false,
    }
}

/// Compares one actual value against a match expression. Variable references
/// are not resolved here; the operand is taken literally.
pub fn match_string_value(condition: &MatchString, actual: &str) -> bool {
    compare(condition.match_type, &condition.value, actual)
}

/// Evaluates a rule clause map against actual labels. All clauses AND
/// together; an empty clause map matches trivially.
///
/// Operand resolution: a `$var` operand resolves from `globals`, then from the
/// values captured in `env_out`, then from the actual labels. On the source
/// side, a clause whose key equals `env_key` records its resolved operand into
/// `env_out` so destination clauses can reference it.
///
/// A label absent from `actual_labels` only matches a literal `*` operand.
pub fn match_metadata(
    rule_labels: &HashMap<String, MatchString>,
    actual_labels: &HashMap<String, String>,
    source_side: bool,
    env_out: &mut HashMap<String, String>,
    env_key: &str,
    globals: &HashMap<String, String>,
) -> bool {
    for (key, condition) in rule_labels {
        let expected = if condition.is_variable() {
            let name = condition.variable_name();
            match globals
                .get(name)
                .or_else(|| env_out.get(name))
                .or_else(|| actual_labels.get(name))
            {
                Some(resolved) => resolved.clone(),
                // unresolvable variable: the clause cannot hold
                None => return false,
            }
        } else {
            condition.value.clone()
        };

        if source_side && key == env_key {
            env_out.insert(key.clone(), expected.clone());
        }

        match actual_labels.get(key) {
            Some(actual) => {
                if !compare(condition.match_type, &expected, actual) {
                    return false;
                }
            }
            None => {
                if condition.is_variable() || expected != MATCH_ALL {
                    return false;
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod test {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn clause(pairs: &[(&str, MatchString)]) -> HashMap<String, MatchString> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn operators() {
        let cases = vec![
            (MatchType::Exact, "v1", "v1", true),
            (MatchType::Exact, "v1", "v2", false),
            (MatchType::Exact, "*", "anything", true),
            (MatchType::NotEquals, "v1", "v2", true),
            (MatchType::NotEquals, "v1", "v1", false),
            (MatchType::Regex, "^v[0-9]+$", "v42", true),
            (MatchType::Regex, "^v[0-9]+$", "x42", false),
            (MatchType::In, "a,b,c", "b", true),
            (MatchType::In, "a,b,c", "d", false),
            (MatchType::NotIn, "a,b,c", "d", true),
            (MatchType::NotIn, "a,b,c", "a", false),
            (MatchType::Range, "10~20", "15", true),
            (MatchType::Range, "10~20", "21", false),
            (MatchType::Range, "10~20", "ten", false),
            (MatchType::Range, "garbage", "15", false),
        ];
        for (match_type, expected, actual, outcome) in cases {
            assert_eq!(
                match_string_value(&MatchString::new(match_type, expected), actual),
                outcome,
                "{:?} {} vs {}",
                match_type,
                expected,
                actual
            );
        }
    }

    #[test]
    fn invalid_regex_is_non_match() {
        let condition = MatchString::new(MatchType::Regex, "([unclosed");
        assert!(!match_string_value(&condition, "anything"));
        // second evaluation hits the cache, still a non-match
        assert!(!match_string_value(&condition, "anything"));
    }

    #[test]
    fn empty_clause_matches_trivially() {
        let mut env_out = HashMap::new();
        assert!(match_metadata(
            &HashMap::new(),
            &labels(&[("k", "v")]),
            true,
            &mut env_out,
            "env",
            &HashMap::new(),
        ));
    }

    #[test]
    fn clauses_and_together() {
        let rule = clause(&[
            ("region", MatchString::exact("west")),
            ("tier", MatchString::exact("gold")),
        ]);
        let mut env_out = HashMap::new();
        assert!(match_metadata(
            &rule,
            &labels(&[("region", "west"), ("tier", "gold")]),
            false,
            &mut env_out,
            "env",
            &HashMap::new(),
        ));
        assert!(!match_metadata(
            &rule,
            &labels(&[("region", "west"), ("tier", "silver")]),
            false,
            &mut env_out,
            "env",
            &HashMap::new(),
        ));
    }

    #[test]
    fn absent_label_only_matches_literal_wildcard() {
        let mut env_out = HashMap::new();
        let wildcard = clause(&[("region", MatchString::exact("*"))]);
        assert!(match_metadata(
            &wildcard,
            &HashMap::new(),
            false,
            &mut env_out,
            "env",
            &HashMap::new(),
        ));
        let literal = clause(&[("region", MatchString::exact("west"))]);
        assert!(!match_metadata(
            &literal,
            &HashMap::new(),
            false,
            &mut env_out,
            "env",
            &HashMap::new(),
        ));
    }

    #[test]
    fn variable_resolution_order() {
        let rule = clause(&[("region", MatchString::exact("$region"))]);
        let mut env_out = HashMap::new();
        let globals = labels(&[("region", "west")]);
        // resolves from globals first
        assert!(match_metadata(
            &rule,
            &labels(&[("region", "west")]),
            false,
            &mut env_out,
            "env",
            &globals,
        ));
        // falls back to the actual labels when neither globals nor env carry it
        assert!(match_metadata(
            &rule,
            &labels(&[("region", "east")]),
            false,
            &mut env_out,
            "env",
            &HashMap::new(),
        ));
        // unresolvable variable is a non-match
        assert!(!match_metadata(
            &clause(&[("zone", MatchString::exact("$zone"))]),
            &labels(&[("region", "east")]),
            false,
            &mut env_out,
            "env",
            &HashMap::new(),
        ));
    }

    #[test]
    fn env_key_captured_on_source_side() {
        let rule = clause(&[("env", MatchString::exact("staging"))]);
        let mut env_out = HashMap::new();
        assert!(match_metadata(
            &rule,
            &labels(&[("env", "staging")]),
            true,
            &mut env_out,
            "env",
            &HashMap::new(),
        ));
        assert_eq!(env_out.get("env").map(String::as_str), Some("staging"));

        // a destination-side $env clause now resolves from the capture
        let dest_rule = clause(&[("env", MatchString::exact("$env"))]);
        assert!(match_metadata(
            &dest_rule,
            &labels(&[("env", "staging")]),
            false,
            &mut env_out,
            "env",
            &HashMap::new(),
        ));
    }
}
