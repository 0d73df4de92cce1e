use crate::core::types::Props;

/// Fixed set of mutation lifecycle hooks held by the index writer and
/// invoked at defined points around store and delete.
pub trait LifecycleHooks: Send + Sync {
    fn before_store(&self, _guid: &str, _props: &Props) {}
    fn after_store(&self, _guid: &str) {}
    fn before_delete(&self, _guid: &str) {}
    fn after_delete(&self, _guid: &str) {}
}

/// No-op hooks for embedders that don't observe mutations.
pub struct NoopHooks;

impl LifecycleHooks for NoopHooks {}
