/// Basic data model shared by the circuit breaker and the router: service
/// keys, guarded resources, call outcome samples and instance lists.
pub mod base;
/// Circuit breaker rules, trigger counters, the per-resource state machine
/// and the registry dispatching reports and checks.
pub mod circuitbreaker;
/// Enumerated configuration entities.
pub mod config;
/// Label/metadata matching engine used by routing rule clauses and by circuit
/// breaker error conditions.
pub mod matcher;
/// Rule-based service router.
pub mod router;
