use crate::CatalogError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a hardware resource as reported by the registry.
///
/// The orchestrator never sets this; it only reads it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    Unloaded,
    Loading,
    Initialized,
    Running,
    Error,
}

impl ResourceState {
    /// A resource is usable by controllers once it is initialized or running.
    pub fn is_ready(self) -> bool {
        matches!(self, ResourceState::Initialized | ResourceState::Running)
    }

    pub fn is_fault(self) -> bool {
        self == ResourceState::Error
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceState::Unloaded => write!(f, "unloaded"),
            ResourceState::Loading => write!(f, "loading"),
            ResourceState::Initialized => write!(f, "initialized"),
            ResourceState::Running => write!(f, "running"),
            ResourceState::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigurationState {
    #[default]
    Idle,
    Running,
}

impl fmt::Display for ConfigurationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationState::Idle => write!(f, "idle"),
            ConfigurationState::Running => write!(f, "running"),
        }
    }
}

/// Controller start policy.
///
/// On the wire this accepts the numeric codes used by controller managers
/// (`0`/`1` best effort, `2` strict) as well as the names.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", try_from = "StrictnessRepr")]
pub enum Strictness {
    #[default]
    BestEffort,
    Strict,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StrictnessRepr {
    Code(u8),
    Name(String),
}

impl TryFrom<StrictnessRepr> for Strictness {
    type Error = CatalogError;

    fn try_from(repr: StrictnessRepr) -> Result<Self, Self::Error> {
        match repr {
            StrictnessRepr::Code(code) => Strictness::try_from(code),
            StrictnessRepr::Name(name) => name.parse(),
        }
    }
}

impl TryFrom<u8> for Strictness {
    type Error = CatalogError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 | 1 => Ok(Strictness::BestEffort),
            2 => Ok(Strictness::Strict),
            other => Err(CatalogError::InvalidStrictness(other.to_string())),
        }
    }
}

impl FromStr for Strictness {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "best-effort" | "best_effort" => Ok(Strictness::BestEffort),
            "strict" => Ok(Strictness::Strict),
            other => Err(CatalogError::InvalidStrictness(other.to_owned())),
        }
    }
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strictness::BestEffort => write!(f, "best-effort"),
            Strictness::Strict => write!(f, "strict"),
        }
    }
}
