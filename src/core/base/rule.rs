use std::fmt;

/// `MeshRule` is the common trait of rule entities loaded into MeshGuard.
/// Rules failing `is_valid` are logged and skipped at load time; they never
/// poison neighboring rules.
pub trait MeshRule: fmt::Debug + Send + Sync {
    fn rule_name(&self) -> String;
    fn is_valid(&self) -> crate::Result<()>;
}
