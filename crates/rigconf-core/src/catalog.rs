use rigconf_runtime::ParamStore;
use rigconf_schema::{parse_definitions, CatalogError, Configuration, ConfigurationState};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// The set of configurations available for activation, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    configurations: BTreeMap<String, Configuration>,
}

impl Catalog {
    /// Read and validate every definition under `key`.
    ///
    /// `active` names the configuration to tag as running; every other
    /// configuration is tagged idle.
    pub fn from_store(
        store: &dyn ParamStore,
        key: &str,
        active: Option<&str>,
    ) -> Result<Self, CatalogError> {
        let Some(raw) = store.configuration_definitions(key) else {
            warn!("param '{key}' is not found");
            return Err(CatalogError::MissingSource(key.to_owned()));
        };
        let configurations = parse_definitions(&raw).inspect_err(|e| {
            warn!("param '{key}' error: {e}");
        })?;
        let mut catalog = Self { configurations };
        catalog.mark_active(active);
        debug!("catalog holds {} configurations", catalog.len());
        Ok(catalog)
    }

    /// Replace the whole catalog from the store. On failure the current
    /// contents are left untouched.
    pub fn refresh(
        &mut self,
        store: &dyn ParamStore,
        key: &str,
        active: Option<&str>,
    ) -> Result<(), CatalogError> {
        *self = Self::from_store(store, key, active)?;
        Ok(())
    }

    pub fn mark_active(&mut self, active: Option<&str>) {
        let configurations = std::mem::take(&mut self.configurations);
        self.configurations = configurations
            .into_iter()
            .map(|(name, configuration)| {
                let state = if Some(name.as_str()) == active {
                    ConfigurationState::Running
                } else {
                    ConfigurationState::Idle
                };
                (name, configuration.with_state(state))
            })
            .collect();
    }

    pub fn get(&self, name: &str) -> Option<&Configuration> {
        self.configurations.get(name)
    }

    pub fn configurations(&self) -> impl Iterator<Item = &Configuration> {
        self.configurations.values()
    }

    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigconf_runtime::ParamTree;

    const KEY: &str = "control_configurations";

    fn store() -> ParamTree {
        ParamTree::from_toml_str(
            r#"
[[control_configurations]]
name = "weld"
[[control_configurations.components]]
hardware_interface = "hw1"
controller = "c1"

[[control_configurations]]
name = "idle"
"#,
        )
        .unwrap()
    }

    #[test]
    fn marks_active_configuration_running() {
        let catalog = Catalog::from_store(&store(), KEY, Some("weld")).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("weld").unwrap().state(), ConfigurationState::Running);
        assert_eq!(catalog.get("idle").unwrap().state(), ConfigurationState::Idle);
        let running = catalog
            .configurations()
            .filter(|c| c.state() == ConfigurationState::Running)
            .count();
        assert_eq!(running, 1);
    }

    #[test]
    fn missing_key_fails() {
        let err = Catalog::from_store(&ParamTree::new(), KEY, None).unwrap_err();
        assert!(matches!(err, CatalogError::MissingSource(_)));
    }

    #[test]
    fn failed_refresh_keeps_previous_catalog() {
        let params = store();
        let mut catalog = Catalog::from_store(&params, KEY, None).unwrap();

        params
            .insert(KEY, toml::Value::String("garbage".to_owned()))
            .unwrap();
        assert!(catalog.refresh(&params, KEY, None).is_err());
        assert_eq!(catalog.len(), 2);
        assert!(catalog.get("weld").is_some());
    }

    #[test]
    fn refresh_replaces_wholesale() {
        let params = store();
        let mut catalog = Catalog::from_store(&params, KEY, None).unwrap();

        let replacement: toml::Table = toml::from_str(
            r#"
[[list]]
name = "inspect"
"#,
        )
        .unwrap();
        params.insert(KEY, replacement["list"].clone()).unwrap();
        catalog.refresh(&params, KEY, None).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("weld").is_none());
        assert!(catalog.get("inspect").is_some());
    }
}
