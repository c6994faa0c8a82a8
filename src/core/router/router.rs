use super::*;
use crate::base::{Instance, Resource, ServiceInstances, ServiceKey, SubsetResource};
use crate::circuitbreaker::BreakerRegistry;
use crate::config::{FailoverType, RouterConfig};
use crate::matcher::{self, MatchString, MATCH_ALL};
use crate::{logging, utils};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-call traffic label that disables the router when set to a non-`true`
/// value. The router is on by default and must be switched off explicitly.
pub const ROUTER_ENABLED_KEY: &str = "enabled";

/// Pipeline directive attached to a route result. The rule router always
/// returns `Next`; `Terminate` is reserved for the surrounding pipeline.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RouteState {
    Next,
    Terminate,
}

#[derive(Debug, Clone)]
pub struct RouteResult {
    pub instances: Vec<Arc<Instance>>,
    pub state: RouteState,
}

impl RouteResult {
    fn next(instances: Vec<Arc<Instance>>) -> Self {
        RouteResult {
            instances,
            state: RouteState::Next,
        }
    }
}

/// Subset picked by a weighted draw, reported back through
/// [`RouteInfo::chosen_subset`].
#[derive(Debug, Clone, Default)]
pub struct ChosenSubset {
    pub name: String,
    pub metadata: HashMap<String, MatchString>,
}

/// Everything the router needs to know about one call: the involved
/// services, the traffic labels, the rule snapshots and the failover
/// override.
#[derive(Debug, Clone, Default)]
pub struct RouteInfo {
    pub source_service: Option<ServiceKey>,
    pub dest_service: ServiceKey,
    /// Per-call labels: matched by source clauses and carrying the
    /// [`ROUTER_ENABLED_KEY`] switch.
    pub traffic_labels: HashMap<String, String>,
    /// Inbound rule snapshot of the destination service.
    pub dest_rule: Option<Arc<Routing>>,
    /// Outbound rule snapshot of the source service.
    pub source_rule: Option<Arc<Routing>>,
    /// Per-request failover override; wins over the configured default.
    pub failover_override: Option<FailoverType>,
    /// Filled by the router after a weighted subset draw.
    pub chosen_subset: Option<ChosenSubset>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum RuleDirection {
    /// Rules of the callee (`inbounds`); source clauses must match the
    /// calling service.
    Inbound,
    /// Rules of the caller (`outbounds`); destination clauses must match the
    /// called service.
    Outbound,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum RuleStatus {
    NoRule,
    DestRuleFail,
    SourceRuleFail,
}

/// One weighted member of a priority group.
#[derive(Debug, Clone)]
pub struct WeightedSubset {
    pub name: String,
    pub metadata: HashMap<String, MatchString>,
    pub weight: u32,
    pub instances: Vec<Arc<Instance>>,
}

/// All weighted subsets of a single priority level. Invariant: every member
/// has weight > 0 and `total_weight` is the sum of member weights.
#[derive(Debug, Clone, Default)]
pub struct PrioritySubsets {
    pub subsets: Vec<WeightedSubset>,
    pub total_weight: u32,
}

impl PrioritySubsets {
    pub fn push(&mut self, subset: WeightedSubset) {
        self.total_weight += subset.weight;
        self.subsets.push(subset);
    }
}

/// Rule-based service router. Evaluates the destination's inbound rules,
/// then the source's outbound rules, builds priority/weight destination
/// groups over the candidate instances and applies the failover policy when
/// no rule yields instances. Destinations whose subset is tripped by the
/// injected [`BreakerRegistry`] are excluded.
pub struct RuleRouter {
    registry: Arc<BreakerRegistry>,
    config: RouterConfig,
}

impl RuleRouter {
    pub fn new(registry: Arc<BreakerRegistry>, config: RouterConfig) -> Self {
        RuleRouter { registry, config }
    }

    /// Whether the router participates in this call at all.
    pub fn enabled(&self, info: &RouteInfo) -> bool {
        if info.source_service.is_none() {
            return false;
        }
        if let Some(enabled) = info.traffic_labels.get(ROUTER_ENABLED_KEY) {
            if !utils::is_blank(enabled) && !enabled.trim().eq_ignore_ascii_case("true") {
                return false;
            }
        }
        let has_inbounds = info
            .dest_rule
            .as_ref()
            .map(|routing| !routing.inbounds.is_empty())
            .unwrap_or(false);
        let has_outbounds = info
            .source_rule
            .as_ref()
            .map(|routing| !routing.outbounds.is_empty())
            .unwrap_or(false);
        has_inbounds || has_outbounds
    }

    /// Filters `instances` through the routing rules. Inbound rules win over
    /// outbound rules; when both fail the effective failover policy decides
    /// between an empty result and the unfiltered candidate list.
    pub fn route(&self, info: &mut RouteInfo, instances: &ServiceInstances) -> RouteResult {
        let mut rule_status = RuleStatus::NoRule;
        if info.dest_rule.is_some() {
            let mut matched = false;
            let filtered =
                self.rule_filtered_instances(info, instances, RuleDirection::Inbound, &mut matched);
            if !filtered.is_empty() {
                return RouteResult::next(filtered);
            }
            if matched {
                rule_status = RuleStatus::DestRuleFail;
            }
        }
        if rule_status == RuleStatus::NoRule && info.source_rule.is_some() {
            let mut matched = false;
            let filtered = self.rule_filtered_instances(
                info,
                instances,
                RuleDirection::Outbound,
                &mut matched,
            );
            if !filtered.is_empty() {
                return RouteResult::next(filtered);
            }
            rule_status = RuleStatus::SourceRuleFail;
        }

        logging::warn!(
            "[RuleRouter] route rules not matched, rule status: {:?}, source service: {:?}",
            rule_status,
            info.source_service
        );
        // the per-request override wins over the configured default
        let failover = info.failover_override.unwrap_or(self.config.failover_type);
        match failover {
            FailoverType::None => RouteResult::next(Vec::new()),
            FailoverType::All => RouteResult::next(instances.instances.clone()),
        }
    }

    fn rule_filtered_instances(
        &self,
        info: &mut RouteInfo,
        instances: &ServiceInstances,
        direction: RuleDirection,
        matched: &mut bool,
    ) -> Vec<Arc<Instance>> {
        let routing = match direction {
            RuleDirection::Inbound => info.dest_rule.clone(),
            RuleDirection::Outbound => info.source_rule.clone(),
        };
        let routing = match routing {
            Some(routing) => routing,
            None => return Vec::new(),
        };
        let routes = match direction {
            RuleDirection::Inbound => &routing.inbounds,
            RuleDirection::Outbound => &routing.outbounds,
        };
        // env captures survive across routes of one evaluation
        let mut env_out = HashMap::new();
        for route in routes {
            if !self.match_source(&route.sources, info, direction, &mut env_out) {
                continue;
            }
            *matched = true;

            let mut subsets_map: HashMap<u32, PrioritySubsets> = HashMap::new();
            let mut smallest_priority: Option<u32> = None;
            for dest in self.filter_available_destinations(info, &route.destinations) {
                if direction == RuleDirection::Outbound {
                    if dest.namespace != MATCH_ALL
                        && dest.namespace != info.dest_service.namespace
                    {
                        continue;
                    }
                    if dest.service != MATCH_ALL && dest.service != info.dest_service.service {
                        continue;
                    }
                }
                if dest.weight == 0 {
                    continue;
                }
                if self.populate_subsets(instances, dest, &mut subsets_map, &mut env_out) {
                    smallest_priority =
                        Some(smallest_priority.map_or(dest.priority, |p| p.min(dest.priority)));
                }
            }

            if subsets_map.is_empty() {
                continue;
            }
            let subsets = subsets_map
                .remove(&smallest_priority.unwrap())
                .unwrap();
            return self.select_instances(info, subsets);
        }
        Vec::new()
    }

    fn match_source(
        &self,
        sources: &[Source],
        info: &RouteInfo,
        direction: RuleDirection,
        env_out: &mut HashMap<String, String>,
    ) -> bool {
        if sources.is_empty() {
            return true;
        }
        let mut matched = true;
        for source in sources {
            // inbound rules must match the calling service itself
            if direction == RuleDirection::Inbound {
                match &info.source_service {
                    None => {
                        if source.namespace != MATCH_ALL || source.service != MATCH_ALL {
                            matched = false;
                            continue;
                        }
                    }
                    Some(key) => {
                        if source.namespace != MATCH_ALL && source.namespace != key.namespace {
                            matched = false;
                            continue;
                        }
                        if source.service != MATCH_ALL && source.service != key.service {
                            matched = false;
                            continue;
                        }
                    }
                }
            }
            if source.metadata.is_empty() {
                matched = true;
                break;
            }
            if info.source_service.is_none() {
                matched = false;
                continue;
            }
            matched = matcher::match_metadata(
                &source.metadata,
                &info.traffic_labels,
                true,
                env_out,
                &self.config.env_key,
                &self.config.global_variables,
            );
            if matched {
                break;
            }
        }
        matched
    }

    /// Drops isolated destinations and destinations whose named subset is
    /// tripped. When every named destination is tripped the tripped set is
    /// retained, giving the failover layer something to degrade onto.
    fn filter_available_destinations<'a>(
        &self,
        info: &RouteInfo,
        destinations: &'a [Destination],
    ) -> Vec<&'a Destination> {
        let mut available = Vec::new();
        let mut tripped = Vec::new();
        for dest in destinations {
            if dest.isolate {
                continue;
            }
            if !dest.name.is_empty() {
                let resource = Resource::Subset(SubsetResource::new(
                    info.dest_service.clone(),
                    dest.name.clone(),
                    dest.metadata
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                ));
                let check = self.registry.check(&resource);
                if !check.pass {
                    tripped.push(dest);
                    continue;
                }
            }
            available.push(dest);
        }
        if available.is_empty() {
            tripped
        } else {
            available
        }
    }

    fn populate_subsets(
        &self,
        instances: &ServiceInstances,
        dest: &Destination,
        subsets_map: &mut HashMap<u32, PrioritySubsets>,
        env_out: &mut HashMap<String, String>,
    ) -> bool {
        let mut filtered = Vec::new();
        for instance in &instances.instances {
            if !matcher::match_metadata(
                &dest.metadata,
                &instance.metadata,
                false,
                env_out,
                &self.config.env_key,
                &self.config.global_variables,
            ) {
                continue;
            }
            filtered.push(Arc::clone(instance));
        }
        if filtered.is_empty() {
            return false;
        }
        subsets_map
            .entry(dest.priority)
            .or_insert_with(PrioritySubsets::default)
            .push(WeightedSubset {
                name: dest.name.clone(),
                metadata: dest.metadata.clone(),
                weight: dest.weight,
                instances: filtered,
            });
        true
    }

    /// Picks from a priority group: a lone subset short-circuits, otherwise a
    /// uniform draw in `[0, total_weight)` walks the subsets in insertion
    /// order.
    fn select_instances(
        &self,
        info: &mut RouteInfo,
        subsets: PrioritySubsets,
    ) -> Vec<Arc<Instance>> {
        if subsets.subsets.len() == 1 {
            return subsets.subsets.into_iter().next().unwrap().instances;
        }
        let mut draw = rand::thread_rng().gen_range(0..subsets.total_weight) as i64;
        for subset in subsets.subsets {
            draw -= subset.weight as i64;
            if draw < 0 {
                info.chosen_subset = Some(ChosenSubset {
                    name: subset.name,
                    metadata: subset.metadata,
                });
                return subset.instances;
            }
        }
        Vec::new()
    }
}
