//! Guarded resources and call outcome samples.

use crate::matcher::MatchString;
use crate::utils;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// `ServiceKey` identifies a service inside a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ServiceKey {
    pub namespace: String,
    pub service: String,
}

impl ServiceKey {
    pub fn new<N: Into<String>, S: Into<String>>(namespace: N, service: S) -> Self {
        ServiceKey {
            namespace: namespace.into(),
            service: service.into(),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.namespace, self.service)
    }
}

/// `Resource` identifies what is being guarded by a circuit breaker: a whole
/// service, a single method, a named instance subset or one instance.
/// Identity is value-equality of all fields; resources are immutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    Service(ServiceResource),
    Method(MethodResource),
    Subset(SubsetResource),
    Instance(InstanceResource),
}

impl Resource {
    pub fn service_key(&self) -> &ServiceKey {
        match self {
            Resource::Service(r) => &r.service,
            Resource::Method(r) => &r.service,
            Resource::Subset(r) => &r.service,
            Resource::Instance(r) => &r.service,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Service(r) => write!(f, "service={}", r.service),
            Resource::Method(r) => write!(f, "service={}, method={}", r.service, r.method),
            Resource::Subset(r) => write!(f, "service={}, subset={}", r.service, r.name),
            Resource::Instance(r) => {
                write!(f, "service={}, instance={}:{}", r.service, r.host, r.port)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceResource {
    pub service: ServiceKey,
}

impl ServiceResource {
    pub fn new(service: ServiceKey) -> Self {
        ServiceResource { service }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodResource {
    pub service: ServiceKey,
    pub method: String,
}

impl MethodResource {
    pub fn new<M: Into<String>>(service: ServiceKey, method: M) -> Self {
        MethodResource {
            service,
            method: method.into(),
        }
    }
}

/// A named, metadata-defined partition of a service's instances. The metadata
/// is part of the identity, hence the ordered map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubsetResource {
    pub service: ServiceKey,
    pub name: String,
    pub metadata: BTreeMap<String, MatchString>,
}

impl SubsetResource {
    pub fn new<N: Into<String>>(
        service: ServiceKey,
        name: N,
        metadata: BTreeMap<String, MatchString>,
    ) -> Self {
        SubsetResource {
            service,
            name: name.into(),
            metadata,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceResource {
    pub service: ServiceKey,
    pub host: String,
    pub port: u32,
}

impl InstanceResource {
    pub fn new<H: Into<String>>(service: ServiceKey, host: H, port: u32) -> Self {
        InstanceResource {
            service,
            host: host.into(),
            port,
        }
    }
}

/// Caller-reported outcome classification of one invocation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetStatus {
    Success,
    Fail,
    /// Leave the classification to the rule's error conditions.
    Unknown,
}

/// A single invocation sample reported to the breaker registry.
#[derive(Debug, Clone)]
pub struct ResourceStat {
    pub resource: Resource,
    pub ret_status: RetStatus,
    pub ret_code: i64,
    pub delay_ms: u64,
    pub timestamp_ms: u64,
}

impl ResourceStat {
    pub fn new(resource: Resource, ret_status: RetStatus, ret_code: i64, delay_ms: u64) -> Self {
        ResourceStat {
            resource,
            ret_status,
            ret_code,
            delay_ms,
            timestamp_ms: utils::curr_time_millis(),
        }
    }
}

/// One discovered endpoint of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Instance {
    pub host: String,
    pub port: u32,
    pub metadata: HashMap<String, String>,
}

impl Instance {
    pub fn new<H: Into<String>>(host: H, port: u32, metadata: HashMap<String, String>) -> Self {
        Instance {
            host: host.into(),
            port,
            metadata,
        }
    }
}

/// Candidate instance list handed to the router.
#[derive(Debug, Clone, Default)]
pub struct ServiceInstances {
    pub service: ServiceKey,
    pub instances: Vec<Arc<Instance>>,
}

impl ServiceInstances {
    pub fn new(service: ServiceKey, instances: Vec<Arc<Instance>>) -> Self {
        ServiceInstances { service, instances }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resource_identity() {
        let key = ServiceKey::new("default", "orders");
        let r1 = Resource::Method(MethodResource::new(key.clone(), "create"));
        let r2 = Resource::Method(MethodResource::new(key.clone(), "create"));
        let r3 = Resource::Method(MethodResource::new(key, "cancel"));
        assert_eq!(r1, r2);
        assert_ne!(r1, r3);
    }

    #[test]
    fn subset_metadata_in_identity() {
        let key = ServiceKey::new("default", "orders");
        let mut m1 = BTreeMap::new();
        m1.insert("region".to_string(), MatchString::exact("west"));
        let mut m2 = BTreeMap::new();
        m2.insert("region".to_string(), MatchString::exact("east"));
        let s1 = Resource::Subset(SubsetResource::new(key.clone(), "canary", m1.clone()));
        let s2 = Resource::Subset(SubsetResource::new(key.clone(), "canary", m1));
        let s3 = Resource::Subset(SubsetResource::new(key, "canary", m2));
        assert_eq!(s1, s2);
        assert_ne!(s1, s3);
    }
}
