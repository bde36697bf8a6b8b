use crate::types::ConfigurationState;
use crate::CatalogError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// One entry of the configuration list as stored in the parameter tree.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RawConfiguration {
    pub name: String,
    #[serde(default)]
    pub components: Vec<RawComponent>,
}

/// A `(hardware_interface, controller)` binding inside a raw configuration.
///
/// A component without a controller only declares that the hardware
/// interface must be loaded.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RawComponent {
    pub hardware_interface: String,
    #[serde(default)]
    pub controller: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_runtime_check")]
    pub runtime_check: bool,
}

fn default_runtime_check() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ControllerDescriptor {
    pub id: String,
    /// Parameter-tree key holding this controller's parameter block.
    pub params_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub runtime_check: bool,
}

impl ControllerDescriptor {
    pub fn new(resource: &str, id: &str) -> Self {
        Self {
            id: id.to_owned(),
            params_key: format!("{resource}/{id}"),
            description: None,
            runtime_check: true,
        }
    }
}

/// A validated, immutable operating mode.
///
/// Resources are kept in a sorted map so that every set derived from a
/// configuration is deterministic; controllers keep declaration order.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Configuration {
    name: String,
    state: ConfigurationState,
    components: BTreeMap<String, Vec<ControllerDescriptor>>,
}

impl Configuration {
    pub fn new(
        name: &str,
        components: BTreeMap<String, Vec<ControllerDescriptor>>,
    ) -> Result<Self, CatalogError> {
        if name.trim().is_empty() {
            return Err(CatalogError::EmptyConfigurationName);
        }
        for (resource, controllers) in &components {
            validate_resource(name, resource, controllers)?;
        }
        Ok(Self {
            name: name.to_owned(),
            state: ConfigurationState::Idle,
            components,
        })
    }

    pub fn from_raw(raw: &RawConfiguration) -> Result<Self, CatalogError> {
        let mut components: BTreeMap<String, Vec<ControllerDescriptor>> = BTreeMap::new();
        for component in &raw.components {
            let resource = component.hardware_interface.trim();
            let controllers = components.entry(resource.to_owned()).or_default();
            if let Some(id) = &component.controller {
                let id = id.trim();
                controllers.push(ControllerDescriptor {
                    id: id.to_owned(),
                    params_key: format!("{resource}/{id}"),
                    description: component.description.clone(),
                    runtime_check: component.runtime_check,
                });
            }
        }
        Self::new(&raw.name, components)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConfigurationState {
        self.state
    }

    #[must_use]
    pub fn with_state(mut self, state: ConfigurationState) -> Self {
        self.state = state;
        self
    }

    pub fn components(&self) -> &BTreeMap<String, Vec<ControllerDescriptor>> {
        &self.components
    }

    pub fn resource_names(&self) -> BTreeSet<String> {
        self.components.keys().cloned().collect()
    }

    pub fn controllers(&self, resource: &str) -> &[ControllerDescriptor] {
        self.components.get(resource).map_or(&[], Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

fn validate_resource(
    configuration: &str,
    resource: &str,
    controllers: &[ControllerDescriptor],
) -> Result<(), CatalogError> {
    if resource.is_empty() {
        return Err(CatalogError::EmptyResourceName {
            configuration: configuration.to_owned(),
        });
    }
    let mut seen = HashSet::new();
    for controller in controllers {
        if controller.id.trim().is_empty() {
            return Err(CatalogError::EmptyControllerId {
                configuration: configuration.to_owned(),
                resource: resource.to_owned(),
            });
        }
        if !seen.insert(controller.id.as_str()) {
            return Err(CatalogError::DuplicateController {
                configuration: configuration.to_owned(),
                resource: resource.to_owned(),
                controller: controller.id.clone(),
            });
        }
    }
    Ok(())
}

/// Parse the raw configuration list into validated configurations keyed by name.
///
/// Either every definition is valid and the whole map is returned, or the
/// first problem is reported and nothing is returned.
pub fn parse_definitions(
    value: &toml::Value,
) -> Result<BTreeMap<String, Configuration>, CatalogError> {
    let raw: Vec<RawConfiguration> = value.clone().try_into()?;
    let mut configurations = BTreeMap::new();
    for entry in &raw {
        let configuration = Configuration::from_raw(entry)?;
        if configurations.contains_key(configuration.name()) {
            return Err(CatalogError::DuplicateConfiguration(
                configuration.name().to_owned(),
            ));
        }
        configurations.insert(configuration.name().to_owned(), configuration);
    }
    Ok(configurations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definitions(input: &str) -> toml::Value {
        let table: toml::Table = toml::from_str(input).unwrap();
        table["control_configurations"].clone()
    }

    #[test]
    fn parses_grouped_components() {
        let value = definitions(
            r#"
[[control_configurations]]
name = "weld"
[[control_configurations.components]]
hardware_interface = "arm"
controller = "joint_state"
[[control_configurations.components]]
hardware_interface = "arm"
controller = "trajectory"
runtime_check = false
[[control_configurations.components]]
hardware_interface = "torch"

[[control_configurations]]
name = "idle"
"#,
        );
        let configs = parse_definitions(&value).expect("should parse");
        assert_eq!(configs.len(), 2);

        let weld = &configs["weld"];
        assert_eq!(weld.state(), ConfigurationState::Idle);
        let ids: Vec<&str> = weld.controllers("arm").iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["joint_state", "trajectory"]);
        assert!(!weld.controllers("arm")[1].runtime_check);
        assert_eq!(weld.controllers("arm")[0].params_key, "arm/joint_state");
        assert!(weld.controllers("torch").is_empty());
        assert_eq!(
            weld.resource_names().into_iter().collect::<Vec<_>>(),
            vec!["arm", "torch"]
        );

        assert!(configs["idle"].is_empty());
    }

    #[test]
    fn rejects_duplicate_controller_on_same_resource() {
        let value = definitions(
            r#"
[[control_configurations]]
name = "weld"
[[control_configurations.components]]
hardware_interface = "arm"
controller = "c1"
[[control_configurations.components]]
hardware_interface = "arm"
controller = "c1"
"#,
        );
        let err = parse_definitions(&value).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateController { .. }));
    }

    #[test]
    fn controller_ids_are_trimmed_before_uniqueness_check() {
        let value = definitions(
            r#"
[[control_configurations]]
name = "weld"
[[control_configurations.components]]
hardware_interface = " arm"
controller = " c1"
[[control_configurations.components]]
hardware_interface = "arm"
controller = "c1 "
"#,
        );
        let err = parse_definitions(&value).unwrap_err();
        assert!(
            matches!(err, CatalogError::DuplicateController { ref controller, .. } if controller == "c1")
        );

        let value = definitions(
            r#"
[[control_configurations]]
name = "weld"
[[control_configurations.components]]
hardware_interface = "arm "
controller = "  c1"
"#,
        );
        let configs = parse_definitions(&value).unwrap();
        let c1 = &configs["weld"].controllers("arm")[0];
        assert_eq!(c1.id, "c1");
        assert_eq!(c1.params_key, "arm/c1");
    }

    #[test]
    fn same_controller_id_on_different_resources_is_fine() {
        let value = definitions(
            r#"
[[control_configurations]]
name = "dual"
[[control_configurations.components]]
hardware_interface = "left"
controller = "js"
[[control_configurations.components]]
hardware_interface = "right"
controller = "js"
"#,
        );
        assert!(parse_definitions(&value).is_ok());
    }

    #[test]
    fn rejects_empty_resource_name() {
        let value = definitions(
            r#"
[[control_configurations]]
name = "broken"
[[control_configurations.components]]
hardware_interface = "  "
"#,
        );
        let err = parse_definitions(&value).unwrap_err();
        assert!(matches!(err, CatalogError::EmptyResourceName { .. }));
    }

    #[test]
    fn rejects_duplicate_configuration_names() {
        let value = definitions(
            r#"
[[control_configurations]]
name = "a"
[[control_configurations]]
name = "a"
"#,
        );
        let err = parse_definitions(&value).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateConfiguration(ref n) if n == "a"));
    }

    #[test]
    fn rejects_unknown_fields_and_wrong_shape() {
        let value = definitions(
            r#"
[[control_configurations]]
name = "a"
colour = "red"
"#,
        );
        assert!(matches!(
            parse_definitions(&value).unwrap_err(),
            CatalogError::Parse(_)
        ));

        let value = definitions(r#"control_configurations = "not a list""#);
        assert!(parse_definitions(&value).is_err());
    }

    #[test]
    fn new_rejects_empty_name() {
        assert!(matches!(
            Configuration::new("", BTreeMap::new()).unwrap_err(),
            CatalogError::EmptyConfigurationName
        ));
    }
}
