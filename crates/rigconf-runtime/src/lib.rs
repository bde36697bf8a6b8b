//! Collaborator interfaces for the rigconf orchestrator.
//!
//! This crate implements the boundary to everything the orchestrator does not
//! own: the pluggable `ResourceRegistry` trait that loads hardware resources and
//! starts controllers, the `ParamStore` trait for configuration definitions and
//! status publication, a TOML-backed `ParamTree`, and the in-process
//! `SimRegistry` used by the daemon's simulation mode and by tests.

pub mod params;
pub mod registry;
pub mod sim;

pub use params::{ParamStore, ParamTree};
pub use registry::{select_registry, ResourceRegistry};
pub use sim::{RegistryCall, SimRegistry};

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry '{0}' is not available")]
    Unavailable(String),
    #[error("{op} timed out after {timeout:?}")]
    Timeout { op: &'static str, timeout: Duration },
    #[error("loading '{resource}' failed: {reason}")]
    LoadFailed { resource: String, reason: String },
    #[error("resource '{0}' is already loaded")]
    AlreadyLoaded(String),
    #[error("resource '{0}' is not loaded")]
    NotLoaded(String),
    #[error("controller '{resource}/{controller}' failed to start: {reason}")]
    ControllerFailed {
        resource: String,
        controller: String,
        reason: String,
    },
    #[error("stopping controllers failed: {0}")]
    StopFailed(String),
    #[error("unloading resources failed: {0}")]
    UnloadFailed(String),
    #[error("listing loaded resources failed: {0}")]
    QueryFailed(String),
    #[error("registry state poisoned: {0}")]
    Poisoned(String),
}

#[derive(Debug, Error)]
pub enum ParamError {
    #[error("param I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse parameter file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("param key '{0}' passes through a non-table value")]
    NotATable(String),
}
