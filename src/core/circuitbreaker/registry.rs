use super::*;
use crate::base::{MeshRule, Resource, ResourceStat, ServiceKey};
use crate::utils::{self, Scheduler};
use crate::logging;
use dashmap::DashMap;
use std::sync::Arc;

/// `BreakerRegistry` maps guarded resources to their [`ResourceBreaker`]s and
/// holds the active rules per service. Reports dispatch in O(1) once a
/// breaker exists; the first report for a resource resolves the applicable
/// rule and installs a breaker through the map's entry lock, so concurrent
/// first-reports share one breaker.
///
/// The registry is in-process only and rebuilds on restart.
pub struct BreakerRegistry {
    breakers: DashMap<Resource, Arc<ResourceBreaker>>,
    rules: DashMap<ServiceKey, Vec<Arc<Rule>>>,
    scheduler: Arc<Scheduler>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::with_scheduler(Arc::new(Scheduler::new()))
    }

    pub fn with_scheduler(scheduler: Arc<Scheduler>) -> Self {
        BreakerRegistry {
            breakers: DashMap::new(),
            rules: DashMap::new(),
            scheduler,
        }
    }

    /// Replaces the given service's circuit breaking rules. Invalid rules are
    /// logged and skipped. Existing breakers of the service are dropped (and
    /// their timers cancelled) so they rebuild against the new rules on the
    /// next report. The returned `bool` indicates whether a real load
    /// happened; loading the currently active rules is a no-op.
    pub fn load_rules(&self, service: &ServiceKey, rules: Vec<Arc<Rule>>) -> bool {
        let mut valid_rules = Vec::with_capacity(rules.len());
        for rule in rules {
            match rule.is_valid() {
                Ok(_) => valid_rules.push(rule),
                Err(err) => logging::warn!(
                    "[BreakerRegistry load_rules] Ignoring invalid circuit breaking rule {:?}, reason: {:?}",
                    rule,
                    err
                ),
            }
        }

        if let Some(current) = self.rules.get(service) {
            if *current.value() == valid_rules {
                logging::info!(
                    "[BreakerRegistry] Loaded rules are the same as the current rules of service {}, so ignore load operation.",
                    service
                );
                return false;
            }
        } else if valid_rules.is_empty() {
            return false;
        }

        let start = utils::curr_time_nanos();
        self.drop_breakers_of(service);
        if valid_rules.is_empty() {
            self.rules.remove(service);
            logging::info!(
                "[BreakerRegistry] cleared circuit breaking rules of service {}",
                service
            );
        } else {
            logging::info!(
                "[BreakerRegistry] loaded {} circuit breaking rules for service {}",
                valid_rules.len(),
                service
            );
            self.rules.insert(service.clone(), valid_rules);
        }
        logging::debug!(
            "[BreakerRegistry load_rules] Time statistic(ns) for updating circuit breaking rules, time cost: {}",
            utils::curr_time_nanos() - start
        );
        true
    }

    pub fn get_rules_of_service(&self, service: &ServiceKey) -> Vec<Arc<Rule>> {
        self.rules
            .get(service)
            .map(|rules| rules.value().clone())
            .unwrap_or_default()
    }

    /// Clears every rule and breaker, cancelling outstanding timers.
    pub fn clear_rules(&self) {
        self.rules.clear();
        for entry in self.breakers.iter() {
            entry.value().cancel_pending();
        }
        self.breakers.clear();
    }

    /// Records one invocation sample. Never fails on input validity; samples
    /// for resources without an applicable rule are dropped.
    pub fn report(&self, stat: &ResourceStat) {
        let existing = self
            .breakers
            .get(&stat.resource)
            .map(|breaker| Arc::clone(breaker.value()));
        if let Some(breaker) = existing {
            breaker.report(stat);
            return;
        }
        let rule = match self.resolve_rule(&stat.resource) {
            Some(rule) => rule,
            None => return,
        };
        let breaker = Arc::clone(
            self.breakers
                .entry(stat.resource.clone())
                .or_insert_with(|| {
                    ResourceBreaker::new(
                        stat.resource.clone(),
                        rule,
                        Arc::clone(&self.scheduler),
                    )
                })
                .value(),
        );
        breaker.report(stat);
    }

    /// Answers whether calls to `resource` may pass. Resources without a
    /// breaker always pass.
    pub fn check(&self, resource: &Resource) -> CheckResult {
        match self.breakers.get(resource) {
            Some(breaker) => breaker.value().check(),
            None => CheckResult::allowed(),
        }
    }

    /// Resolves the applicable rule for a resource: the rule whose level is
    /// most specific for the resource kind wins; a method resource degrades
    /// to a service level rule when no method rule exists.
    fn resolve_rule(&self, resource: &Resource) -> Option<Arc<Rule>> {
        let rules = self.rules.get(resource.service_key())?;
        let pick = |level: BreakLevel| {
            rules
                .value()
                .iter()
                .find(|rule| rule.enable && rule.level == level)
                .cloned()
        };
        match resource {
            Resource::Service(_) => pick(BreakLevel::Service),
            Resource::Method(_) => pick(BreakLevel::Method).or_else(|| pick(BreakLevel::Service)),
            Resource::Subset(_) => pick(BreakLevel::Subset),
            Resource::Instance(_) => pick(BreakLevel::Instance),
        }
    }

    fn drop_breakers_of(&self, service: &ServiceKey) {
        self.breakers.retain(|resource, breaker| {
            if resource.service_key() == service {
                breaker.cancel_pending();
                false
            } else {
                true
            }
        });
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
