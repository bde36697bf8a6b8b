use crate::registry::ResourceRegistry;
use crate::RegistryError;
use rigconf_schema::{Configuration, ResourceState, Strictness};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A registry call as observed by [`SimRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryCall {
    ListLoaded,
    Load(String),
    Unload(Vec<String>),
    Purge,
    StartControllers {
        resources: Vec<String>,
        configuration: String,
        strictness: Strictness,
    },
    StopControllers(Vec<String>),
}

struct SimResource {
    loaded_at: Instant,
    forced_state: Option<ResourceState>,
    controllers: Vec<String>,
}

#[derive(Default)]
struct SimState {
    resources: BTreeMap<String, SimResource>,
    calls: Vec<RegistryCall>,
    failing_loads: HashSet<String>,
    stalled: HashSet<String>,
    failing_controllers: HashSet<String>,
    fail_list: bool,
    fail_stop: bool,
    fail_unload: bool,
}

/// In-process resource registry.
///
/// Resources report `loading` until `init_delay` has passed since their load,
/// then `initialized`, and `running` once a controller runs on them. Faults,
/// stalls and desynchronization can be injected, and every blocking call is
/// recorded. Blocking calls are expected to be serialized by the caller; an
/// overlapping call is flagged and can be checked with
/// [`SimRegistry::reentrancy_detected`].
pub struct SimRegistry {
    state: Mutex<SimState>,
    init_delay: Duration,
    call_latency: Duration,
    busy: AtomicBool,
    reentrant: AtomicBool,
}

impl Default for SimRegistry {
    fn default() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            init_delay: Duration::ZERO,
            call_latency: Duration::ZERO,
            busy: AtomicBool::new(false),
            reentrant: AtomicBool::new(false),
        }
    }
}

struct CallGuard<'a> {
    busy: &'a AtomicBool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

impl SimRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    /// Time every blocking call spends before answering.
    #[must_use]
    pub fn with_call_latency(mut self, latency: Duration) -> Self {
        self.call_latency = latency;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, SimState>, RegistryError> {
        self.state
            .lock()
            .map_err(|e| RegistryError::Poisoned(e.to_string()))
    }

    fn lock_quiet(&self) -> MutexGuard<'_, SimState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn enter(
        &self,
        op: &'static str,
        call: RegistryCall,
        timeout: Duration,
    ) -> Result<CallGuard<'_>, RegistryError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            warn!("sim registry: overlapping call to {op}");
            self.reentrant.store(true, Ordering::SeqCst);
        }
        let guard = CallGuard { busy: &self.busy };
        self.lock()?.calls.push(call);
        if !self.call_latency.is_zero() {
            std::thread::sleep(self.call_latency.min(timeout));
        }
        if self.call_latency > timeout {
            return Err(RegistryError::Timeout { op, timeout });
        }
        Ok(guard)
    }

    pub fn fail_load(&self, resource: &str) {
        self.lock_quiet().failing_loads.insert(resource.to_owned());
    }

    /// Keep `resource` in `loading` forever once loaded.
    pub fn stall(&self, resource: &str) {
        self.lock_quiet().stalled.insert(resource.to_owned());
    }

    pub fn fail_controller(&self, resource: &str, controller: &str) {
        self.lock_quiet()
            .failing_controllers
            .insert(format!("{resource}/{controller}"));
    }

    pub fn fail_list(&self, fail: bool) {
        self.lock_quiet().fail_list = fail;
    }

    pub fn fail_stop(&self, fail: bool) {
        self.lock_quiet().fail_stop = fail;
    }

    pub fn fail_unload(&self, fail: bool) {
        self.lock_quiet().fail_unload = fail;
    }

    /// Override the reported state of a loaded resource.
    pub fn force_state(&self, resource: &str, state: ResourceState) {
        if let Some(res) = self.lock_quiet().resources.get_mut(resource) {
            res.forced_state = Some(state);
        }
    }

    /// Make the registry hold `resource` without a recorded load call, as if
    /// something else had loaded it.
    pub fn insert_loaded(&self, resource: &str) {
        self.lock_quiet().resources.insert(
            resource.to_owned(),
            SimResource {
                loaded_at: Instant::now(),
                forced_state: None,
                controllers: Vec::new(),
            },
        );
    }

    /// Drop `resource` without a recorded unload call, as if it had crashed.
    pub fn forget(&self, resource: &str) {
        self.lock_quiet().resources.remove(resource);
    }

    pub fn loaded(&self) -> Vec<String> {
        self.lock_quiet().resources.keys().cloned().collect()
    }

    pub fn running_controllers(&self, resource: &str) -> Vec<String> {
        self.lock_quiet()
            .resources
            .get(resource)
            .map(|r| r.controllers.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<RegistryCall> {
        self.lock_quiet().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock_quiet().calls.clear();
    }

    pub fn reentrancy_detected(&self) -> bool {
        self.reentrant.load(Ordering::SeqCst)
    }
}

impl ResourceRegistry for SimRegistry {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn list_loaded(&self, timeout: Duration) -> Result<Vec<String>, RegistryError> {
        let _guard = self.enter("list_loaded", RegistryCall::ListLoaded, timeout)?;
        let state = self.lock()?;
        if state.fail_list {
            return Err(RegistryError::QueryFailed(
                "registry did not answer".to_owned(),
            ));
        }
        Ok(state.resources.keys().cloned().collect())
    }

    fn load(&self, resource: &str, timeout: Duration) -> Result<(), RegistryError> {
        let _guard = self.enter("load", RegistryCall::Load(resource.to_owned()), timeout)?;
        let mut state = self.lock()?;
        if state.failing_loads.contains(resource) {
            return Err(RegistryError::LoadFailed {
                resource: resource.to_owned(),
                reason: "driver refused to load".to_owned(),
            });
        }
        if state.resources.contains_key(resource) {
            return Err(RegistryError::AlreadyLoaded(resource.to_owned()));
        }
        debug!("sim registry: loaded {resource}");
        state.resources.insert(
            resource.to_owned(),
            SimResource {
                loaded_at: Instant::now(),
                forced_state: None,
                controllers: Vec::new(),
            },
        );
        Ok(())
    }

    fn unload(&self, resources: &[String], timeout: Duration) -> Result<(), RegistryError> {
        let _guard = self.enter("unload", RegistryCall::Unload(resources.to_vec()), timeout)?;
        let mut state = self.lock()?;
        if state.fail_unload {
            return Err(RegistryError::UnloadFailed(resources.join(", ")));
        }
        for resource in resources {
            state.resources.remove(resource);
        }
        Ok(())
    }

    fn purge(&self, timeout: Duration) -> Result<(), RegistryError> {
        let _guard = self.enter("purge", RegistryCall::Purge, timeout)?;
        let mut state = self.lock()?;
        if state.fail_unload {
            return Err(RegistryError::UnloadFailed("purge".to_owned()));
        }
        state.resources.clear();
        Ok(())
    }

    fn state(&self, resource: &str) -> ResourceState {
        let state = self.lock_quiet();
        let Some(res) = state.resources.get(resource) else {
            return ResourceState::Error;
        };
        if let Some(forced) = res.forced_state {
            return forced;
        }
        if state.stalled.contains(resource) || res.loaded_at.elapsed() < self.init_delay {
            return ResourceState::Loading;
        }
        if res.controllers.is_empty() {
            ResourceState::Initialized
        } else {
            ResourceState::Running
        }
    }

    fn start_controllers(
        &self,
        resources: &[String],
        configuration: &Configuration,
        strictness: Strictness,
        timeout: Duration,
    ) -> Result<Vec<String>, RegistryError> {
        let _guard = self.enter(
            "start_controllers",
            RegistryCall::StartControllers {
                resources: resources.to_vec(),
                configuration: configuration.name().to_owned(),
                strictness,
            },
            timeout,
        )?;
        let mut state = self.lock()?;
        let state = &mut *state;
        let mut skipped = Vec::new();
        for resource in resources {
            let Some(res) = state.resources.get_mut(resource) else {
                return Err(RegistryError::NotLoaded(resource.clone()));
            };
            let declared = configuration.controllers(resource);
            res.controllers
                .retain(|running| declared.iter().any(|c| c.id == *running));
            for controller in declared {
                if res.controllers.contains(&controller.id) {
                    continue;
                }
                let key = format!("{resource}/{}", controller.id);
                if state.failing_controllers.contains(&key) {
                    let err = RegistryError::ControllerFailed {
                        resource: resource.clone(),
                        controller: controller.id.clone(),
                        reason: "init returned false".to_owned(),
                    };
                    match strictness {
                        Strictness::Strict => return Err(err),
                        Strictness::BestEffort => {
                            warn!("sim registry: {err}; continuing");
                            skipped.push(key);
                            continue;
                        }
                    }
                }
                res.controllers.push(controller.id.clone());
            }
        }
        Ok(skipped)
    }

    fn stop_controllers(
        &self,
        resources: &[String],
        timeout: Duration,
    ) -> Result<(), RegistryError> {
        let _guard = self.enter(
            "stop_controllers",
            RegistryCall::StopControllers(resources.to_vec()),
            timeout,
        )?;
        let mut state = self.lock()?;
        if state.fail_stop {
            return Err(RegistryError::StopFailed(resources.join(", ")));
        }
        for resource in resources {
            if let Some(res) = state.resources.get_mut(resource) {
                res.controllers.clear();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigconf_schema::ControllerDescriptor;

    const T: Duration = Duration::from_secs(1);

    fn weld() -> Configuration {
        let mut components = BTreeMap::new();
        components.insert(
            "hw1".to_owned(),
            vec![
                ControllerDescriptor::new("hw1", "c1"),
                ControllerDescriptor::new("hw1", "c2"),
            ],
        );
        Configuration::new("weld", components).unwrap()
    }

    #[test]
    fn sim_lifecycle() {
        let registry = SimRegistry::new();
        assert_eq!(registry.state("hw1"), ResourceState::Error);

        registry.load("hw1", T).unwrap();
        assert_eq!(registry.state("hw1"), ResourceState::Initialized);
        assert!(registry.load("hw1", T).is_err());

        let skipped = registry
            .start_controllers(&["hw1".to_owned()], &weld(), Strictness::Strict, T)
            .unwrap();
        assert!(skipped.is_empty());
        assert_eq!(registry.state("hw1"), ResourceState::Running);
        assert_eq!(registry.running_controllers("hw1"), vec!["c1", "c2"]);

        registry.stop_controllers(&["hw1".to_owned()], T).unwrap();
        assert_eq!(registry.state("hw1"), ResourceState::Initialized);

        registry.unload(&["hw1".to_owned()], T).unwrap();
        assert!(registry.list_loaded(T).unwrap().is_empty());
        assert_eq!(registry.calls().len(), 6);
    }

    #[test]
    fn init_delay_and_stall() {
        let registry = SimRegistry::new().with_init_delay(Duration::from_millis(30));
        registry.load("hw1", T).unwrap();
        assert_eq!(registry.state("hw1"), ResourceState::Loading);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(registry.state("hw1"), ResourceState::Initialized);

        registry.stall("hw2");
        registry.load("hw2", T).unwrap();
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(registry.state("hw2"), ResourceState::Loading);
    }

    #[test]
    fn controller_failure_respects_strictness() {
        let registry = SimRegistry::new();
        registry.load("hw1", T).unwrap();
        registry.fail_controller("hw1", "c1");
        let hw = ["hw1".to_owned()];

        let err = registry
            .start_controllers(&hw, &weld(), Strictness::Strict, T)
            .unwrap_err();
        assert!(matches!(err, RegistryError::ControllerFailed { .. }));

        let skipped = registry
            .start_controllers(&hw, &weld(), Strictness::BestEffort, T)
            .unwrap();
        assert_eq!(skipped, vec!["hw1/c1"]);
        assert_eq!(registry.running_controllers("hw1"), vec!["c2"]);
    }

    #[test]
    fn start_on_unloaded_resource_fails() {
        let registry = SimRegistry::new();
        let err = registry
            .start_controllers(&["hw1".to_owned()], &weld(), Strictness::BestEffort, T)
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotLoaded(_)));
    }

    #[test]
    fn latency_beyond_timeout_is_reported() {
        let registry = SimRegistry::new().with_call_latency(Duration::from_millis(20));
        let err = registry.list_loaded(Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, RegistryError::Timeout { op: "list_loaded", .. }));
    }

    #[test]
    fn forced_state_and_forget() {
        let registry = SimRegistry::new();
        registry.load("hw1", T).unwrap();
        registry.force_state("hw1", ResourceState::Error);
        assert_eq!(registry.state("hw1"), ResourceState::Error);
        registry.forget("hw1");
        assert!(registry.loaded().is_empty());
        registry.insert_loaded("ghost");
        assert_eq!(registry.loaded(), vec!["ghost"]);
        assert!(registry.calls().iter().all(|c| *c != RegistryCall::Load("ghost".to_owned())));
    }

    #[test]
    fn overlapping_calls_are_flagged() {
        let registry = std::sync::Arc::new(
            SimRegistry::new().with_call_latency(Duration::from_millis(50)),
        );
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let r = std::sync::Arc::clone(&registry);
                std::thread::spawn(move || r.list_loaded(T))
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }
        assert!(registry.reentrancy_detected());
    }
}
