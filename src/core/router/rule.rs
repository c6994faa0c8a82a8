use crate::matcher::MatchString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Caller-side clause of a route. Namespace or service `*` means wildcard;
/// metadata matches against the call's traffic labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Source {
    pub namespace: String,
    pub service: String,
    pub metadata: HashMap<String, MatchString>,
}

/// Callee-side clause of a route: a weighted, priority-ranked instance
/// subset. Metadata selects the member instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Destination {
    pub namespace: String,
    pub service: String,
    /// Subset name; empty for an unnamed destination, which bypasses the
    /// circuit breaker check.
    pub name: String,
    pub metadata: HashMap<String, MatchString>,
    /// Smaller is preferred.
    pub priority: u32,
    pub weight: u32,
    /// Isolated destinations never receive traffic.
    pub isolate: bool,
}

/// One routing rule: any matching source clause admits the route, the
/// destination clauses then partition the instance set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Route {
    pub sources: Vec<Source>,
    pub destinations: Vec<Destination>,
}

/// A routing rule set snapshot: ordered inbound and outbound route lists.
/// Snapshots are immutable; every `route` call reads a single snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Routing {
    pub inbounds: Vec<Route>,
    pub outbounds: Vec<Route>,
}

impl fmt::Display for Routing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmtted = serde_json::to_string_pretty(self).unwrap();
        write!(f, "{}", fmtted)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::matcher::MatchType;

    #[test]
    fn deserialize_route() {
        let json = r#"{
            "inbounds": [{
                "sources": [{"namespace": "a", "service": "b"}],
                "destinations": [{
                    "namespace": "a", "service": "c", "name": "canary",
                    "metadata": {"region": {"match_type": "Exact", "value": "west"}},
                    "priority": 0, "weight": 100
                }]
            }]
        }"#;
        let routing: Routing = serde_json::from_str(json).unwrap();
        assert_eq!(routing.inbounds.len(), 1);
        let dest = &routing.inbounds[0].destinations[0];
        assert_eq!(dest.name, "canary");
        assert_eq!(dest.metadata["region"].match_type, MatchType::Exact);
        assert!(!dest.isolate);
    }
}
