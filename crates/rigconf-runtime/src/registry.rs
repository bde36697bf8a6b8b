use crate::RegistryError;
use rigconf_schema::{Configuration, ResourceState, Strictness};
use std::sync::Arc;
use std::time::Duration;

/// The component that owns hardware resources and the controllers bound to them.
///
/// Every call except [`ResourceRegistry::state`] is a blocking round-trip that
/// must give up once `timeout` has elapsed. The registry is the source of truth
/// for what is actually loaded; callers only hold resource names.
pub trait ResourceRegistry: Send + Sync {
    fn name(&self) -> &str;

    fn list_loaded(&self, timeout: Duration) -> Result<Vec<String>, RegistryError>;

    fn load(&self, resource: &str, timeout: Duration) -> Result<(), RegistryError>;

    fn unload(&self, resources: &[String], timeout: Duration) -> Result<(), RegistryError>;

    /// Unload everything the registry currently holds.
    fn purge(&self, timeout: Duration) -> Result<(), RegistryError>;

    /// Non-blocking status read. An unknown resource reads as
    /// [`ResourceState::Error`].
    fn state(&self, resource: &str) -> ResourceState;

    /// Start, on each of `resources`, the controllers `configuration` declares
    /// for it. With [`Strictness::BestEffort`] a controller that fails to start
    /// is skipped and returned as `<resource>/<controller>`; with
    /// [`Strictness::Strict`] the call fails.
    fn start_controllers(
        &self,
        resources: &[String],
        configuration: &Configuration,
        strictness: Strictness,
        timeout: Duration,
    ) -> Result<Vec<String>, RegistryError>;

    fn stop_controllers(&self, resources: &[String], timeout: Duration)
        -> Result<(), RegistryError>;
}

pub fn select_registry(name: &str) -> Result<Arc<dyn ResourceRegistry>, RegistryError> {
    match name {
        "sim" => Ok(Arc::new(
            crate::sim::SimRegistry::new().with_init_delay(Duration::from_millis(50)),
        )),
        other => Err(RegistryError::Unavailable(other.to_owned())),
    }
}
