//! Configuration entities. MeshGuard does not read configuration files; the
//! embedding application fills these structs from whatever source it uses.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_ENV_KEY: &str = "env";

/// Behavior when no routing rule yields instances.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailoverType {
    /// Return an empty instance list.
    None,
    /// Degrade to the full candidate list.
    All,
}

impl Default for FailoverType {
    fn default() -> FailoverType {
        FailoverType::All
    }
}

/// Configuration of the rule-based router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Applied when every rule set fails; a per-request override wins.
    pub failover_type: FailoverType,
    /// Key→value map used for `$var` substitution in match strings.
    pub global_variables: HashMap<String, String>,
    /// Reserved metadata key propagated across multi-env routing.
    pub env_key: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            failover_type: FailoverType::default(),
            global_variables: HashMap::new(),
            env_key: DEFAULT_ENV_KEY.into(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let config = RouterConfig::default();
        assert_eq!(config.failover_type, FailoverType::All);
        assert_eq!(config.env_key, "env");
        assert!(config.global_variables.is_empty());
    }

    #[test]
    fn deserialize_partial() {
        let config: RouterConfig = serde_json::from_str(r#"{"failover_type":"None"}"#).unwrap();
        assert_eq!(config.failover_type, FailoverType::None);
        assert_eq!(config.env_key, "env");
    }
}
