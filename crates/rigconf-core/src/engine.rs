use crate::poll::{PollStatus, Poller};
use crate::tasks::TaskPool;
use crate::CoreError;
use rigconf_runtime::{ParamStore, ResourceRegistry};
use rigconf_schema::{Configuration, Strictness};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What a failed transition does with the resources it loaded before failing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackPolicy {
    /// Keep them loaded; the next transition's coherence check reconciles.
    #[default]
    Leave,
    /// Best-effort unload of everything this transition loaded.
    UnloadLoaded,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub verify_timeout: Duration,
    pub verify_rate_hz: u32,
    pub max_workers: usize,
    pub rollback: RollbackPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            verify_timeout: Duration::from_secs(4),
            verify_rate_hz: 250,
            max_workers: TaskPool::DEFAULT_MAX_WORKERS,
            rollback: RollbackPolicy::Leave,
        }
    }
}

/// Resource set difference between the active and the target configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceDiff {
    pub to_load: BTreeSet<String>,
    pub to_unload: BTreeSet<String>,
    pub kept: BTreeSet<String>,
}

impl ResourceDiff {
    pub fn compute(active: &BTreeSet<String>, target: &BTreeSet<String>) -> Self {
        Self {
            to_load: target.difference(active).cloned().collect(),
            to_unload: active.difference(target).cloned().collect(),
            kept: active.intersection(target).cloned().collect(),
        }
    }
}

/// Bookkeeping of one transition, returned on success.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransitionRecord {
    pub active: Option<String>,
    pub target: Option<String>,
    pub active_resources: BTreeSet<String>,
    pub target_resources: BTreeSet<String>,
    pub loaded_resources: BTreeSet<String>,
    pub to_load: BTreeSet<String>,
    pub to_unload: BTreeSet<String>,
    /// The registry disagreed with the active set and was purged.
    pub resynchronized: bool,
    pub verification: BTreeMap<String, bool>,
    /// Controllers a best-effort start skipped, as `<resource>/<controller>`.
    pub skipped_controllers: Vec<String>,
}

fn to_vec(set: &BTreeSet<String>) -> Vec<String> {
    set.iter().cloned().collect()
}

/// Drives the resource registry from one configuration to another.
///
/// The engine keeps no state between transitions. Callers serialize calls to
/// [`TransitionEngine::transition`] and commit the new active configuration
/// only when it returns `Ok`.
pub struct TransitionEngine {
    registry: Arc<dyn ResourceRegistry>,
    params: Arc<dyn ParamStore>,
    options: EngineOptions,
}

impl TransitionEngine {
    pub fn new(
        registry: Arc<dyn ResourceRegistry>,
        params: Arc<dyn ParamStore>,
        options: EngineOptions,
    ) -> Self {
        Self {
            registry,
            params,
            options,
        }
    }

    /// Move from `active` to `target`. `None` as target stops everything.
    pub fn transition(
        &self,
        active: Option<&Configuration>,
        target: Option<&Configuration>,
        strictness: Strictness,
        timeout: Duration,
    ) -> Result<TransitionRecord, CoreError> {
        let active_resources = active.map(Configuration::resource_names).unwrap_or_default();
        let target_resources = target.map(Configuration::resource_names).unwrap_or_default();

        let loaded_resources: BTreeSet<String> = self
            .registry
            .list_loaded(timeout)
            .map_err(CoreError::RegistryQuery)?
            .into_iter()
            .collect();

        let diff = ResourceDiff::compute(&active_resources, &target_resources);
        let mut record = TransitionRecord {
            active: active.map(|c| c.name().to_owned()),
            target: target.map(|c| c.name().to_owned()),
            active_resources,
            target_resources,
            loaded_resources,
            to_load: diff.to_load,
            to_unload: diff.to_unload,
            ..TransitionRecord::default()
        };
        debug!(
            "transition resources: active={:?} target={:?} loaded={:?}",
            record.active_resources, record.target_resources, record.loaded_resources
        );

        if let Some(target) = target {
            self.check_parameters(target)?;
        }

        if record.active_resources != record.loaded_resources {
            warn!(
                "registry holds {:?} but the active configuration uses {:?}; purging and reloading",
                record.loaded_resources, record.active_resources
            );
            self.registry.purge(timeout).map_err(CoreError::Purge)?;
            record.to_load.extend(record.active_resources.iter().cloned());
            record.resynchronized = true;
        }
        debug!(
            "to_load={:?} to_unload={:?}",
            record.to_load, record.to_unload
        );

        let mut loaded_now = Vec::new();
        if let Err(e) = self.run_phases(target, strictness, timeout, &mut record, &mut loaded_now)
        {
            error!("transition failed: {e}");
            self.roll_back(&loaded_now, timeout);
            return Err(e);
        }
        Ok(record)
    }

    /// Every target resource needs its own parameter block, and every
    /// declared controller needs `<resource>/<controller>`.
    fn check_parameters(&self, target: &Configuration) -> Result<(), CoreError> {
        for (resource, controllers) in target.components() {
            if !self.params.has_entry(resource) {
                return Err(CoreError::MissingParameter {
                    key: resource.clone(),
                    owner: format!("hardware interface '{resource}'"),
                });
            }
            for controller in controllers {
                if !self.params.has_entry(&controller.params_key) {
                    return Err(CoreError::MissingParameter {
                        key: controller.params_key.clone(),
                        owner: format!("controller '{}' on '{resource}'", controller.id),
                    });
                }
            }
        }
        Ok(())
    }

    fn run_phases(
        &self,
        target: Option<&Configuration>,
        strictness: Strictness,
        timeout: Duration,
        record: &mut TransitionRecord,
        loaded_now: &mut Vec<String>,
    ) -> Result<(), CoreError> {
        for resource in &record.to_load {
            info!("loading hardware interface '{resource}'");
            self.registry
                .load(resource, timeout)
                .map_err(|source| CoreError::ResourceLoad {
                    resource: resource.clone(),
                    source,
                })?;
            loaded_now.push(resource.clone());
        }

        if !record.to_load.is_empty() {
            record.verification = self.verify(&record.to_load);
            let failed: Vec<String> = record
                .verification
                .iter()
                .filter(|(_, ok)| !**ok)
                .map(|(name, _)| name.clone())
                .collect();
            if !failed.is_empty() {
                return Err(CoreError::ResourceVerification {
                    resources: failed,
                    timeout: self.options.verify_timeout,
                });
            }
        }

        if let Some(target) = target {
            if !record.target_resources.is_empty() {
                info!(
                    "starting controllers of '{}' ({strictness})",
                    target.name()
                );
                record.skipped_controllers = self
                    .registry
                    .start_controllers(
                        &to_vec(&record.target_resources),
                        target,
                        strictness,
                        timeout,
                    )
                    .map_err(CoreError::ControllerStart)?;
                if !record.skipped_controllers.is_empty() {
                    warn!(
                        "'{}' started without {}",
                        target.name(),
                        record.skipped_controllers.join(", ")
                    );
                }
            }
        }

        if !record.to_unload.is_empty() {
            let to_unload = to_vec(&record.to_unload);
            info!("stopping controllers on {}", to_unload.join(", "));
            self.registry
                .stop_controllers(&to_unload, timeout)
                .map_err(CoreError::ControllerStop)?;
            info!("unloading {}", to_unload.join(", "));
            self.registry
                .unload(&to_unload, timeout)
                .map_err(CoreError::ResourceUnload)?;
        }
        Ok(())
    }

    /// Poll every resource in parallel until it is ready or its deadline
    /// passes. Returns the per-resource outcome.
    fn verify(&self, resources: &BTreeSet<String>) -> BTreeMap<String, bool> {
        let mut pool = TaskPool::with_max_workers(self.options.max_workers);
        let handles: Vec<_> = resources
            .iter()
            .map(|resource| {
                let registry = Arc::clone(&self.registry);
                let name = resource.clone();
                let poller = Poller::new(self.options.verify_rate_hz, self.options.verify_timeout);
                let handle = pool.queue(move || {
                    poller.wait(|| registry.state(&name).is_ready()) == PollStatus::Ready
                });
                (resource.clone(), handle)
            })
            .collect();
        pool.start(resources.len());
        pool.finish();

        handles
            .into_iter()
            .map(|(resource, handle)| {
                let ok = handle.get();
                if ok {
                    debug!("'{resource}' initialized");
                } else {
                    error!(
                        "'{resource}' did not initialize within {:?} (state: {})",
                        self.options.verify_timeout,
                        self.registry.state(&resource)
                    );
                }
                (resource, ok)
            })
            .collect()
    }

    fn roll_back(&self, loaded_now: &[String], timeout: Duration) {
        if self.options.rollback != RollbackPolicy::UnloadLoaded || loaded_now.is_empty() {
            return;
        }
        warn!("rolling back: unloading {}", loaded_now.join(", "));
        if let Err(e) = self.registry.stop_controllers(loaded_now, timeout) {
            warn!("rollback: stopping controllers failed: {e}");
        }
        if let Err(e) = self.registry.unload(loaded_now, timeout) {
            warn!("rollback: unloading failed: {e}");
        }
    }

    /// Unload everything the registry reports as loaded, whatever the caller
    /// believes is active. Returns the resources that were unloaded.
    pub fn teardown(&self, timeout: Duration) -> Result<Vec<String>, CoreError> {
        let loaded = self
            .registry
            .list_loaded(timeout)
            .map_err(CoreError::RegistryQuery)?;
        if loaded.is_empty() {
            return Ok(loaded);
        }
        info!("teardown: unloading {}", loaded.join(", "));
        if let Err(e) = self.registry.stop_controllers(&loaded, timeout) {
            warn!("teardown: stopping controllers failed: {e}");
        }
        self.registry
            .unload(&loaded, timeout)
            .map_err(CoreError::ResourceUnload)?;
        Ok(loaded)
    }
}
