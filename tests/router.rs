//! End-to-end routing scenarios: rule matching, priority/weight groups and
//! failover, with the circuit breaker registry wired in.

use meshguard::base::{Instance, ServiceInstances, ServiceKey};
use meshguard::circuitbreaker::BreakerRegistry;
use meshguard::config::{FailoverType, RouterConfig};
use meshguard::matcher::{MatchString, MATCH_ALL};
use meshguard::router::{Destination, Route, RouteInfo, RouteState, Routing, RuleRouter, Source};
use std::collections::HashMap;
use std::sync::Arc;

fn instance(pairs: &[(&str, &str)]) -> Arc<Instance> {
    let metadata = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Arc::new(Instance::new("10.0.0.1", 8080, metadata))
}

fn dest(name: &str, pairs: &[(&str, &str)], priority: u32, weight: u32) -> Destination {
    Destination {
        namespace: MATCH_ALL.into(),
        service: MATCH_ALL.into(),
        name: name.into(),
        metadata: pairs
            .iter()
            .map(|(k, v)| (k.to_string(), MatchString::exact(*v)))
            .collect::<HashMap<_, _>>(),
        priority,
        weight,
        isolate: false,
    }
}

fn router() -> RuleRouter {
    RuleRouter::new(Arc::new(BreakerRegistry::new()), RouterConfig::default())
}

fn info_with_inbounds(routes: Vec<Route>) -> RouteInfo {
    RouteInfo {
        source_service: Some(ServiceKey::new("a", "b")),
        dest_service: ServiceKey::new("a", "callee"),
        dest_rule: Some(Arc::new(Routing {
            inbounds: routes,
            ..Default::default()
        })),
        ..Default::default()
    }
}

// an inbound rule matching the caller routes to the west subset only
#[test]
fn inbound_match_wins() {
    let router = router();
    let route = Route {
        sources: vec![Source {
            namespace: "a".into(),
            service: "b".into(),
            ..Default::default()
        }],
        destinations: vec![dest("", &[("region", "west")], 0, 100)],
    };
    let candidates = ServiceInstances::new(
        ServiceKey::new("a", "callee"),
        vec![
            instance(&[("region", "west")]),
            instance(&[("region", "east")]),
        ],
    );
    let mut info = info_with_inbounds(vec![route]);
    let result = router.route(&mut info, &candidates);
    assert_eq!(result.state, RouteState::Next);
    assert_eq!(result.instances.len(), 1);
    assert_eq!(
        result.instances[0].metadata.get("region").map(String::as_str),
        Some("west")
    );
}

// two destinations at priority 0 with weights 1 and 3, one at priority 1:
// only priority 0 receives traffic and the draw distributes roughly 25/75
#[test]
fn priority_and_weight() {
    let router = router();
    let route = Route {
        sources: Vec::new(),
        destinations: vec![
            dest("west", &[("region", "west")], 0, 1),
            dest("east", &[("region", "east")], 0, 3),
            dest("backup", &[("region", "backup")], 1, 100),
        ],
    };
    let candidates = ServiceInstances::new(
        ServiceKey::new("a", "callee"),
        vec![
            instance(&[("region", "west")]),
            instance(&[("region", "east")]),
            instance(&[("region", "backup")]),
        ],
    );

    const DRAWS: usize = 2000;
    let mut west = 0usize;
    for _ in 0..DRAWS {
        let mut info = info_with_inbounds(vec![route.clone()]);
        let result = router.route(&mut info, &candidates);
        assert_eq!(result.instances.len(), 1);
        match result.instances[0].metadata.get("region").map(String::as_str) {
            Some("west") => west += 1,
            Some("east") => {}
            other => panic!("unexpected subset drawn: {:?}", other),
        }
    }
    let west_share = west as f64 / DRAWS as f64;
    assert!(
        (west_share - 0.25).abs() < 0.1,
        "west share {} too far from 0.25",
        west_share
    );
}

// zero rule matches: failover=none yields empty, failover=all yields the
// original list
#[test]
fn failover_none_vs_all() {
    let unmatched = Route {
        sources: vec![Source {
            namespace: "x".into(),
            service: "y".into(),
            ..Default::default()
        }],
        destinations: vec![dest("", &[("region", "west")], 0, 100)],
    };
    let candidates = ServiceInstances::new(
        ServiceKey::new("a", "callee"),
        vec![
            instance(&[("region", "west")]),
            instance(&[("region", "east")]),
            instance(&[("region", "south")]),
        ],
    );

    let none_router = RuleRouter::new(
        Arc::new(BreakerRegistry::new()),
        RouterConfig {
            failover_type: FailoverType::None,
            ..Default::default()
        },
    );
    let mut info = info_with_inbounds(vec![unmatched.clone()]);
    let result = none_router.route(&mut info, &candidates);
    assert!(result.instances.is_empty());
    assert_eq!(result.state, RouteState::Next);

    let all_router = RuleRouter::new(
        Arc::new(BreakerRegistry::new()),
        RouterConfig {
            failover_type: FailoverType::All,
            ..Default::default()
        },
    );
    let mut info = info_with_inbounds(vec![unmatched]);
    let result = all_router.route(&mut info, &candidates);
    assert_eq!(result.instances.len(), 3);
}

// the per-request override beats the configured failover default
#[test]
fn failover_override_wins() {
    let unmatched = Route {
        sources: vec![Source {
            namespace: "x".into(),
            service: "y".into(),
            ..Default::default()
        }],
        destinations: vec![dest("", &[("region", "west")], 0, 100)],
    };
    let candidates = ServiceInstances::new(
        ServiceKey::new("a", "callee"),
        vec![instance(&[("region", "west")])],
    );
    let all_router = RuleRouter::new(
        Arc::new(BreakerRegistry::new()),
        RouterConfig {
            failover_type: FailoverType::All,
            ..Default::default()
        },
    );
    let mut info = info_with_inbounds(vec![unmatched]);
    info.failover_override = Some(FailoverType::None);
    assert!(all_router.route(&mut info, &candidates).instances.is_empty());
}

// inbound rules win: when the destination's inbound rule matches, the
// source's outbound rule is never consulted
#[test]
fn inbound_wins_over_outbound() {
    let router = router();
    let inbound = Route {
        sources: Vec::new(),
        destinations: vec![dest("", &[("region", "west")], 0, 100)],
    };
    let outbound = Route {
        sources: Vec::new(),
        destinations: vec![dest("", &[("region", "east")], 0, 100)],
    };
    let candidates = ServiceInstances::new(
        ServiceKey::new("a", "callee"),
        vec![
            instance(&[("region", "west")]),
            instance(&[("region", "east")]),
        ],
    );
    let mut info = info_with_inbounds(vec![inbound]);
    info.source_rule = Some(Arc::new(Routing {
        outbounds: vec![outbound],
        ..Default::default()
    }));
    let result = router.route(&mut info, &candidates);
    assert_eq!(result.instances.len(), 1);
    assert_eq!(
        result.instances[0].metadata.get("region").map(String::as_str),
        Some("west")
    );
}

// source metadata clauses match the call's traffic labels
#[test]
fn source_metadata_matches_traffic_labels() {
    let router = router();
    let route = Route {
        sources: vec![Source {
            namespace: MATCH_ALL.into(),
            service: MATCH_ALL.into(),
            metadata: vec![("tier".to_string(), MatchString::exact("gold"))]
                .into_iter()
                .collect(),
        }],
        destinations: vec![dest("", &[("region", "west")], 0, 100)],
    };
    let candidates = ServiceInstances::new(
        ServiceKey::new("a", "callee"),
        vec![
            instance(&[("region", "west")]),
            instance(&[("region", "east")]),
        ],
    );

    let mut info = info_with_inbounds(vec![route.clone()]);
    info.traffic_labels.insert("tier".into(), "gold".into());
    let result = router.route(&mut info, &candidates);
    assert_eq!(result.instances.len(), 1);

    // labels that do not satisfy the clause fall through to failover=all
    let mut info = info_with_inbounds(vec![route]);
    info.traffic_labels.insert("tier".into(), "silver".into());
    let result = router.route(&mut info, &candidates);
    assert_eq!(result.instances.len(), 2);
}
