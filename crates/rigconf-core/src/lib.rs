//! Core orchestration for rigconf configuration transitions.
//!
//! This crate ties the configuration schema and the registry/parameter
//! collaborators together into the `Manager`: the serialized entry point that
//! starts, stops, lists and refreshes configurations. Underneath it sit the
//! `TransitionEngine` (resource diffing, load/verify/start/stop/unload phases,
//! coherence self-healing), a bounded `TaskPool` for concurrent verification,
//! poll-with-deadline primitives, and the background health monitor.

pub mod catalog;
pub mod concurrency;
pub mod config;
pub mod engine;
pub mod manager;
pub mod poll;
pub mod service;
pub mod tasks;

pub use catalog::Catalog;
pub use concurrency::install_signal_handler;
pub use config::{ManagerConfig, MonitorConfig, VerificationConfig};
pub use engine::{EngineOptions, ResourceDiff, RollbackPolicy, TransitionEngine, TransitionRecord};
pub use manager::{spawn_monitor, Manager, ManagerStatus};
pub use poll::{PollStatus, Poller, Throttle, Ticker};
pub use tasks::{TaskHandle, TaskPool};

use rigconf_runtime::RegistryError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("catalog error: {0}")]
    Catalog(#[from] rigconf_schema::CatalogError),
    #[error("the configuration '{0}' is not among the listed")]
    UnknownConfiguration(String),
    #[error("{owner} expects its parameters under '/{key}', which does not exist")]
    MissingParameter { key: String, owner: String },
    #[error("loading of the resource '{resource}' failed: {source}")]
    ResourceLoad {
        resource: String,
        source: RegistryError,
    },
    #[error("resources not initialized within {timeout:?}: {}", .resources.join(", "))]
    ResourceVerification {
        resources: Vec<String>,
        timeout: Duration,
    },
    #[error("starting controllers failed: {0}")]
    ControllerStart(RegistryError),
    #[error("stopping controllers failed: {0}")]
    ControllerStop(RegistryError),
    #[error("unloading resources failed: {0}")]
    ResourceUnload(RegistryError),
    #[error("querying loaded resources failed: {0}")]
    RegistryQuery(RegistryError),
    #[error("purging resources failed: {0}")]
    Purge(RegistryError),
    #[error("config error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
