use crate::catalog::Catalog;
use crate::config::ManagerConfig;
use crate::engine::TransitionEngine;
use crate::poll::{Throttle, Ticker};
use crate::CoreError;
use chrono::{DateTime, Utc};
use rigconf_runtime::{ParamStore, ResourceRegistry};
use rigconf_schema::{Configuration, ResourceState, Strictness};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use tracing::{error, info, warn};

/// Everything a request handler may mutate. Only reachable through the
/// manager's lock.
struct ManagerState {
    /// The configuration as it was when it was activated. A later refresh
    /// may redefine it in the catalog; this copy still describes what was
    /// actually brought up.
    active: Option<Configuration>,
    catalog: Catalog,
    transitions: u64,
    last_transition_at: Option<DateTime<Utc>>,
}

impl ManagerState {
    fn active_name(&self) -> Option<&str> {
        self.active.as_ref().map(Configuration::name)
    }
}

/// Point-in-time view of the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerStatus {
    pub active: Option<String>,
    pub transitions: u64,
    pub last_transition_at: Option<DateTime<Utc>>,
    pub configurations: usize,
    pub registry: String,
}

/// Owns the active configuration and the catalog, and serializes every
/// transition.
///
/// All request handlers, and the monitor's emergency stop, hold the same lock
/// for their full duration, so registry calls from two transitions never
/// interleave. Dropping the manager unloads every resource the registry still
/// holds.
pub struct Manager {
    state: Mutex<ManagerState>,
    engine: TransitionEngine,
    registry: Arc<dyn ResourceRegistry>,
    params: Arc<dyn ParamStore>,
    config: ManagerConfig,
    requests: AtomicU64,
}

impl Manager {
    pub fn new(
        registry: Arc<dyn ResourceRegistry>,
        params: Arc<dyn ParamStore>,
        config: ManagerConfig,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let catalog = Catalog::from_store(params.as_ref(), &config.catalog_key, None)?;
        info!(
            "loaded {} configurations from '{}' (registry: {})",
            catalog.len(),
            config.catalog_key,
            registry.name()
        );
        params.set_status(&config.status_key, "none");

        let engine = TransitionEngine::new(
            Arc::clone(&registry),
            Arc::clone(&params),
            config.engine_options(),
        );
        Ok(Self {
            state: Mutex::new(ManagerState {
                active: None,
                catalog,
                transitions: 0,
                last_transition_at: None,
            }),
            engine,
            registry,
            params,
            config,
            requests: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("manager lock was poisoned by a panicking request; recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    /// Activate `name`. Succeeds without touching the registry when `name` is
    /// already active.
    ///
    /// Returns the controllers a best-effort start had to skip, as
    /// `<resource>/<controller>`.
    pub fn start(&self, name: &str, strictness: Strictness) -> Result<Vec<String>, CoreError> {
        let number = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        let mut guard = self.lock();
        let state = &mut *guard;

        if state.active_name() == Some(name) {
            info!("configuration '{name}' is already running");
            return Ok(Vec::new());
        }
        let target = state
            .catalog
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownConfiguration(name.to_owned()))?;

        info!(
            "==== transition #{number}: '{}' -> '{name}' ====",
            state.active_name().unwrap_or("none")
        );
        match self.engine.transition(
            state.active.as_ref(),
            Some(&target),
            strictness,
            self.config.request_timeout(),
        ) {
            Ok(record) => {
                self.commit(state, Some(target));
                if record.skipped_controllers.is_empty() {
                    info!("==== transition #{number}: '{name}' is running ====");
                } else {
                    warn!(
                        "==== transition #{number}: '{name}' is running without {} ====",
                        record.skipped_controllers.join(", ")
                    );
                }
                Ok(record.skipped_controllers)
            }
            Err(e) => {
                error!("==== transition #{number} to '{name}' failed: {e} ====");
                Err(e)
            }
        }
    }

    /// Stop the active configuration and unload its resources.
    pub fn stop(&self, strictness: Strictness) -> Result<(), CoreError> {
        let mut guard = self.lock();
        self.stop_locked(&mut guard, strictness)
    }

    fn stop_locked(&self, state: &mut ManagerState, strictness: Strictness) -> Result<(), CoreError> {
        info!(
            "stopping configuration '{}'",
            state.active_name().unwrap_or("none")
        );
        self.engine
            .transition(
                state.active.as_ref(),
                None,
                strictness,
                self.config.request_timeout(),
            )
            .inspect_err(|e| error!("stop failed: {e}"))?;
        self.commit(state, None);
        Ok(())
    }

    fn commit(&self, state: &mut ManagerState, active: Option<Configuration>) {
        state.active = active;
        let name = state.active_name().map(str::to_owned);
        state.catalog.mark_active(name.as_deref());
        state.transitions += 1;
        state.last_transition_at = Some(Utc::now());
        self.params
            .set_status(&self.config.status_key, name.as_deref().unwrap_or("none"));
    }

    fn refresh_locked(&self, state: &mut ManagerState) -> Result<(), CoreError> {
        let active = state.active.as_ref().map(Configuration::name);
        state
            .catalog
            .refresh(self.params.as_ref(), &self.config.catalog_key, active)?;
        Ok(())
    }

    /// Re-read the catalog from the parameter store. All or nothing.
    pub fn refresh(&self) -> Result<(), CoreError> {
        let mut guard = self.lock();
        self.refresh_locked(&mut guard)?;
        info!("catalog refreshed: {} configurations", guard.catalog.len());
        Ok(())
    }

    /// Refresh, then return every configuration with its state tag.
    pub fn list(&self) -> Result<Vec<Configuration>, CoreError> {
        let mut guard = self.lock();
        self.refresh_locked(&mut guard)?;
        Ok(guard.catalog.configurations().cloned().collect())
    }

    pub fn active_configuration_name(&self) -> Option<String> {
        self.lock().active_name().map(str::to_owned)
    }

    pub fn status(&self) -> ManagerStatus {
        let state = self.lock();
        ManagerStatus {
            active: state.active_name().map(str::to_owned),
            transitions: state.transitions,
            last_transition_at: state.last_transition_at,
            configurations: state.catalog.len(),
            registry: self.registry.name().to_owned(),
        }
    }

    /// Check every resource of the active configuration. If one reports an
    /// error, stop the configuration (best effort) under the same lock.
    /// Returns whether an emergency stop was performed.
    pub fn check_health(&self) -> Result<bool, CoreError> {
        let mut guard = self.lock();
        let Some(active) = &guard.active else {
            return Ok(false);
        };
        let faults: Vec<(String, ResourceState)> = active
            .resource_names()
            .into_iter()
            .map(|resource| {
                let state = self.registry.state(&resource);
                (resource, state)
            })
            .filter(|(_, state)| state.is_fault())
            .collect();
        if faults.is_empty() {
            return Ok(false);
        }
        for (resource, state) in &faults {
            error!(
                "hardware interface '{resource}' of '{}' reports {state}",
                active.name()
            );
        }
        warn!("emergency stop");
        self.stop_locked(&mut guard, Strictness::BestEffort)?;
        Ok(true)
    }

    /// Health-monitoring loop. Returns once `exit` is observed and the
    /// configuration has been stopped, or with an error if an emergency or
    /// shutdown stop fails.
    pub fn run_monitor(&self, exit: &AtomicBool) -> Result<(), CoreError> {
        let monitor = &self.config.monitor;
        let mut ticker = Ticker::new(monitor.tick_hz);
        let mut heartbeat = Throttle::new(self.config.heartbeat_period());
        let mut tick: u64 = 0;
        info!(
            "monitor running at {} Hz, health check every {} ticks",
            monitor.tick_hz, monitor.health_check_every
        );
        loop {
            if exit.load(Ordering::SeqCst) {
                info!("exit requested, stopping the running configuration");
                self.stop(Strictness::BestEffort)?;
                return Ok(());
            }
            tick += 1;
            if tick % u64::from(monitor.health_check_every) == 0
                && !self.check_health()?
                && heartbeat.ready()
            {
                info!(
                    "monitor alive, active configuration: {}",
                    self.active_configuration_name().as_deref().unwrap_or("none")
                );
            }
            ticker.tick();
        }
    }
}

/// Run [`Manager::run_monitor`] on a dedicated thread.
pub fn spawn_monitor(
    manager: Arc<Manager>,
    exit: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<Result<(), CoreError>>> {
    std::thread::Builder::new()
        .name("rigconf-monitor".to_owned())
        .spawn(move || {
            let result = manager.run_monitor(&exit);
            if let Err(e) = &result {
                error!("monitor terminated: {e}");
            }
            result
        })
}

impl Drop for Manager {
    fn drop(&mut self) {
        match self.engine.teardown(self.config.teardown_timeout()) {
            Ok(unloaded) if !unloaded.is_empty() => {
                info!("teardown unloaded {}", unloaded.join(", "));
            }
            Ok(_) => {}
            Err(e) => error!("teardown failed: {e}"),
        }
        self.params.set_status(&self.config.status_key, "none");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigconf_runtime::{ParamTree, SimRegistry};

    const PARAMS: &str = r#"
[hw1]
[hw1.c1]

[[control_configurations]]
name = "weld"
[[control_configurations.components]]
hardware_interface = "hw1"
controller = "c1"

[[control_configurations]]
name = "idle"
"#;

    fn manager() -> (Arc<SimRegistry>, Arc<ParamTree>, Manager) {
        let registry = Arc::new(SimRegistry::new());
        let params = Arc::new(ParamTree::from_toml_str(PARAMS).unwrap());
        let manager = Manager::new(registry.clone(), params.clone(), ManagerConfig::default())
            .unwrap();
        (registry, params, manager)
    }

    #[test]
    fn new_publishes_none() {
        let (_registry, params, _manager) = manager();
        assert_eq!(
            params.status("status/active_configuration").as_deref(),
            Some("none")
        );
    }

    #[test]
    fn new_without_catalog_fails() {
        let result = Manager::new(
            Arc::new(SimRegistry::new()),
            Arc::new(ParamTree::new()),
            ManagerConfig::default(),
        );
        assert!(matches!(result, Err(CoreError::Catalog(_))));
    }

    #[test]
    fn start_commits_and_publishes() {
        let (_registry, params, manager) = manager();
        manager.start("weld", Strictness::BestEffort).unwrap();
        assert_eq!(manager.active_configuration_name().as_deref(), Some("weld"));
        assert_eq!(
            params.status("status/active_configuration").as_deref(),
            Some("weld")
        );
        let status = manager.status();
        assert_eq!(status.transitions, 1);
        assert!(status.last_transition_at.is_some());
        assert_eq!(status.registry, "sim");
    }

    #[test]
    fn unknown_name_touches_nothing() {
        let (registry, _params, manager) = manager();
        let err = manager.start("paint", Strictness::Strict).unwrap_err();
        assert!(matches!(err, CoreError::UnknownConfiguration(ref n) if n == "paint"));
        assert!(registry.calls().is_empty());
    }

    #[test]
    fn list_tags_running_configuration() {
        let (_registry, _params, manager) = manager();
        manager.start("weld", Strictness::BestEffort).unwrap();
        let listed = manager.list().unwrap();
        assert_eq!(listed.len(), 2);
        for configuration in listed {
            let expected = if configuration.name() == "weld" {
                rigconf_schema::ConfigurationState::Running
            } else {
                rigconf_schema::ConfigurationState::Idle
            };
            assert_eq!(configuration.state(), expected);
        }
    }

    #[test]
    fn health_check_stops_faulted_configuration() {
        let (registry, _params, manager) = manager();
        manager.start("weld", Strictness::BestEffort).unwrap();
        assert!(!manager.check_health().unwrap());

        registry.force_state("hw1", ResourceState::Error);
        assert!(manager.check_health().unwrap());
        assert_eq!(manager.active_configuration_name(), None);
        assert!(registry.loaded().is_empty());
    }

    #[test]
    fn monitor_exits_on_flag() {
        let (registry, _params, manager) = manager();
        manager.start("weld", Strictness::BestEffort).unwrap();
        let exit = AtomicBool::new(true);
        manager.run_monitor(&exit).unwrap();
        assert_eq!(manager.active_configuration_name(), None);
        assert!(registry.loaded().is_empty());
    }

    #[test]
    fn drop_unloads_everything() {
        let (registry, _params, manager) = manager();
        manager.start("weld", Strictness::BestEffort).unwrap();
        registry.insert_loaded("stray");
        drop(manager);
        assert!(registry.loaded().is_empty());
    }
}
