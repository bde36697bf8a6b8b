use crate::engine::{EngineOptions, RollbackPolicy};
use crate::tasks::TaskPool;
use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Daemon settings, read from a TOML file. Every field has a default, so an
/// empty file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagerConfig {
    /// Parameter key holding the configuration definitions.
    pub catalog_key: String,
    /// Parameter key the active configuration name is published to.
    pub status_key: String,
    pub request_timeout_ms: u64,
    pub teardown_timeout_ms: u64,
    pub monitor: MonitorConfig,
    pub verification: VerificationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    pub tick_hz: u32,
    /// Run a full health check every this many ticks.
    pub health_check_every: u32,
    pub heartbeat_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerificationConfig {
    pub timeout_ms: u64,
    pub rate_hz: u32,
    pub max_workers: usize,
    pub rollback: RollbackPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            catalog_key: "control_configurations".to_owned(),
            status_key: "status/active_configuration".to_owned(),
            request_timeout_ms: 10_000,
            teardown_timeout_ms: 10_000,
            monitor: MonitorConfig::default(),
            verification: VerificationConfig::default(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_hz: 100,
            health_check_every: 100,
            heartbeat_secs: 60,
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 4_000,
            rate_hz: 250,
            max_workers: TaskPool::DEFAULT_MAX_WORKERS,
            rollback: RollbackPolicy::Leave,
        }
    }
}

impl ManagerConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, CoreError> {
        let config: Self =
            toml::from_str(input).map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.catalog_key.trim_matches('/').is_empty() {
            return Err(CoreError::Config("catalog_key must not be empty".to_owned()));
        }
        if self.status_key.trim_matches('/').is_empty() {
            return Err(CoreError::Config("status_key must not be empty".to_owned()));
        }
        if self.request_timeout_ms == 0 {
            return Err(CoreError::Config(
                "request_timeout_ms must be positive".to_owned(),
            ));
        }
        if self.monitor.tick_hz == 0 || self.monitor.health_check_every == 0 {
            return Err(CoreError::Config(
                "monitor.tick_hz and monitor.health_check_every must be positive".to_owned(),
            ));
        }
        if self.verification.rate_hz == 0 || self.verification.max_workers == 0 {
            return Err(CoreError::Config(
                "verification.rate_hz and verification.max_workers must be positive".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_secs(self.monitor.heartbeat_secs)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            verify_timeout: Duration::from_millis(self.verification.timeout_ms),
            verify_rate_hz: self.verification.rate_hz,
            max_workers: self.verification.max_workers,
            rollback: self.verification.rollback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_gives_defaults() {
        let config = ManagerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ManagerConfig::default());
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        let options = config.engine_options();
        assert_eq!(options.verify_timeout, Duration::from_secs(4));
        assert_eq!(options.verify_rate_hz, 250);
        assert_eq!(options.rollback, RollbackPolicy::Leave);
    }

    #[test]
    fn partial_override() {
        let config = ManagerConfig::from_toml_str(
            r#"
catalog_key = "rig/configurations"

[monitor]
tick_hz = 50

[verification]
rollback = "unload-loaded"
"#,
        )
        .unwrap();
        assert_eq!(config.catalog_key, "rig/configurations");
        assert_eq!(config.monitor.tick_hz, 50);
        assert_eq!(config.monitor.health_check_every, 100);
        assert_eq!(config.verification.rollback, RollbackPolicy::UnloadLoaded);
    }

    #[test]
    fn unknown_field_rejected() {
        let err = ManagerConfig::from_toml_str("catalog = \"x\"").unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn zero_rate_rejected() {
        let err = ManagerConfig::from_toml_str("[monitor]\ntick_hz = 0").unwrap_err();
        assert!(err.to_string().contains("tick_hz"));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "request_timeout_ms = 2500").unwrap();
        let config = ManagerConfig::load(file.path()).unwrap();
        assert_eq!(config.request_timeout(), Duration::from_millis(2500));

        assert!(matches!(
            ManagerConfig::load(Path::new("/nonexistent/rigconf.toml")),
            Err(CoreError::Io(_))
        ));
    }
}
