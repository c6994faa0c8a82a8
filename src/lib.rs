//! # MeshGuard
//!
//! MeshGuard is a client-side traffic management library for service meshes.
//! It covers two cooperating concerns:
//!
//! 1. **Circuit breaking** — per-resource state machines (Closed / Open /
//!    Half-Open) fed by success/failure reports, with configurable trigger,
//!    recovery and fallback policy. See [`circuitbreaker`].
//! 2. **Rule-based routing** — filtering a candidate instance set through
//!    inbound/outbound routing rules with priority/weight destination groups,
//!    excluding destinations whose subset is currently tripped by the circuit
//!    breaker. See [`router`].
//!
//! Generally, there are a few steps when using MeshGuard:
//! 1. Build a [`circuitbreaker::BreakerRegistry`] and load circuit breaking
//!    rules for the services you call.
//! 2. Report the outcome of every RPC to the registry as a
//!    [`base::ResourceStat`].
//! 3. Build a [`router::RuleRouter`] over the registry and run candidate
//!    instance lists through it before picking an endpoint.
//!
//! ## Load rules and report outcomes
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshguard::base::{Resource, ResourceStat, RetStatus, ServiceKey, ServiceResource};
//! use meshguard::circuitbreaker::{BreakerRegistry, Rule};
//!
//! let registry = Arc::new(BreakerRegistry::new());
//! let service = ServiceKey::new("default", "payments");
//! registry.load_rules(&service, vec![Arc::new(Rule::default())]);
//!
//! let resource = Resource::Service(ServiceResource::new(service));
//! registry.report(&ResourceStat::new(resource.clone(), RetStatus::Fail, 500, 10));
//! let check = registry.check(&resource);
//! if !check.pass {
//!     // short-circuit the call, optionally serving check.fallback
//! }
//! ```
//!
//! ## Route through rules
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshguard::circuitbreaker::BreakerRegistry;
//! use meshguard::config::RouterConfig;
//! use meshguard::router::{RouteInfo, RuleRouter};
//!
//! let registry = Arc::new(BreakerRegistry::new());
//! let router = RuleRouter::new(Arc::clone(&registry), RouterConfig::default());
//! # let (mut route_info, candidates): (RouteInfo, meshguard::base::ServiceInstances) = unimplemented!();
//! if router.enabled(&route_info) {
//!     let result = router.route(&mut route_info, &candidates);
//! }
//! ```
//!
//! Rule delivery, instance discovery, configuration files and metrics export
//! are deliberately out of scope: rules enter through
//! [`circuitbreaker::BreakerRegistry::load_rules`] and instance lists enter as
//! [`base::ServiceInstances`] arguments.

/// Core implementations of MeshGuard: the resource model, the label matching
/// engine, the circuit breaker state machines and registry, and the rule-based
/// service router.
pub mod core;
/// Adapters for different logging crates.
pub mod logging;
/// Utility functions: wall-clock helpers and the delayed-task scheduler.
pub mod utils;

// re-export preludes
pub use crate::core::*;

pub type Result<T> = anyhow::Result<T>;
pub type Error = anyhow::Error;
