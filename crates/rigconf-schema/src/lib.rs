//! Configuration model and definition parsing for rigconf.
//!
//! This crate defines the schema layer: the raw definition records read from the
//! parameter store (`RawConfiguration`), the validated, immutable `Configuration`
//! value the orchestrator works with, and the small vocabulary shared by every
//! other crate (`ResourceState`, `Strictness`, `ConfigurationState`).

pub mod configuration;
pub mod types;

pub use configuration::{
    parse_definitions, Configuration, ControllerDescriptor, RawComponent, RawConfiguration,
};
pub use types::{ConfigurationState, ResourceState, Strictness};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("param '{0}' is not found")]
    MissingSource(String),
    #[error("failed to parse configuration definitions: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("configuration name must not be empty")]
    EmptyConfigurationName,
    #[error("configuration '{0}' is defined more than once")]
    DuplicateConfiguration(String),
    #[error("configuration '{configuration}': hardware_interface must not be empty")]
    EmptyResourceName { configuration: String },
    #[error("configuration '{configuration}': controller id on '{resource}' must not be empty")]
    EmptyControllerId {
        configuration: String,
        resource: String,
    },
    #[error("configuration '{configuration}': controller '{controller}' is declared twice on '{resource}'")]
    DuplicateController {
        configuration: String,
        resource: String,
        controller: String,
    },
    #[error("invalid strictness: {0}")]
    InvalidStrictness(String),
}
