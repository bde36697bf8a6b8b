use crate::ParamError;
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use tracing::warn;

/// Key-value parameter store the orchestrator reads definitions from.
///
/// Keys are `/`-separated paths; a leading `/` is ignored.
pub trait ParamStore: Send + Sync {
    fn has_entry(&self, key: &str) -> bool;

    /// Raw configuration definitions stored under `key`, if present.
    fn configuration_definitions(&self, key: &str) -> Option<toml::Value>;

    /// Publish a status value. Best effort: failures are logged, not returned.
    fn set_status(&self, key: &str, value: &str);
}

/// In-memory parameter tree backed by nested TOML tables.
#[derive(Debug)]
pub struct ParamTree {
    root: RwLock<toml::Table>,
}

impl Default for ParamTree {
    fn default() -> Self {
        Self {
            root: RwLock::new(toml::Table::new()),
        }
    }
}

fn segments(key: &str) -> impl Iterator<Item = &str> {
    key.split('/').filter(|s| !s.is_empty())
}

impl ParamTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(input: &str) -> Result<Self, ParamError> {
        let root: toml::Table = toml::from_str(input)?;
        Ok(Self {
            root: RwLock::new(root),
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ParamError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn get(&self, key: &str) -> Option<toml::Value> {
        let root = self.root.read().unwrap_or_else(PoisonError::into_inner);
        let mut parts = segments(key).peekable();
        parts.peek()?;
        let mut current = &*root;
        while let Some(part) = parts.next() {
            let value = current.get(part)?;
            if parts.peek().is_none() {
                return Some(value.clone());
            }
            current = value.as_table()?;
        }
        None
    }

    /// Set `key` to `value`, creating intermediate tables as needed.
    pub fn insert(&self, key: &str, value: toml::Value) -> Result<(), ParamError> {
        let mut root = self.root.write().unwrap_or_else(PoisonError::into_inner);
        let parts: Vec<&str> = segments(key).collect();
        let Some((last, parents)) = parts.split_last() else {
            return Err(ParamError::NotATable(key.to_owned()));
        };
        let mut current = &mut *root;
        for part in parents {
            current = current
                .entry((*part).to_owned())
                .or_insert(toml::Value::Table(toml::Table::new()))
                .as_table_mut()
                .ok_or_else(|| ParamError::NotATable(key.to_owned()))?;
        }
        current.insert((*last).to_owned(), value);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<toml::Value> {
        let mut root = self.root.write().unwrap_or_else(PoisonError::into_inner);
        let parts: Vec<&str> = segments(key).collect();
        let (last, parents) = parts.split_last()?;
        let mut current = &mut *root;
        for part in parents {
            current = current.get_mut(*part)?.as_table_mut()?;
        }
        current.remove(*last)
    }

    pub fn status(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_owned))
    }
}

impl ParamStore for ParamTree {
    fn has_entry(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn configuration_definitions(&self, key: &str) -> Option<toml::Value> {
        self.get(key)
    }

    fn set_status(&self, key: &str, value: &str) {
        if let Err(e) = self.insert(key, toml::Value::String(value.to_owned())) {
            warn!("failed to publish status '{key}': {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TREE: &str = r#"
[arm]
ip = "10.0.0.2"
[arm.joint_state]
rate = 250

[[control_configurations]]
name = "watch"
"#;

    #[test]
    fn nested_lookup() {
        let tree = ParamTree::from_toml_str(TREE).unwrap();
        assert!(tree.has_entry("arm"));
        assert!(tree.has_entry("/arm/joint_state"));
        assert!(tree.has_entry("arm/joint_state/rate"));
        assert!(!tree.has_entry("arm/trajectory"));
        assert!(!tree.has_entry("arm/ip/deeper"));
        assert!(!tree.has_entry(""));
        assert!(!tree.has_entry("/"));
    }

    #[test]
    fn definitions_are_returned_raw() {
        let tree = ParamTree::from_toml_str(TREE).unwrap();
        let defs = tree.configuration_definitions("control_configurations").unwrap();
        assert!(defs.is_array());
        assert!(tree.configuration_definitions("missing").is_none());
    }

    #[test]
    fn status_creates_intermediate_tables() {
        let tree = ParamTree::new();
        tree.set_status("status/active_configuration", "none");
        assert_eq!(
            tree.status("status/active_configuration").as_deref(),
            Some("none")
        );
        tree.set_status("status/active_configuration", "weld");
        assert_eq!(
            tree.status("/status/active_configuration").as_deref(),
            Some("weld")
        );
    }

    #[test]
    fn insert_through_scalar_fails() {
        let tree = ParamTree::from_toml_str(TREE).unwrap();
        let err = tree
            .insert("arm/ip/port", toml::Value::Integer(1))
            .unwrap_err();
        assert!(matches!(err, ParamError::NotATable(_)));
    }

    #[test]
    fn remove_entry() {
        let tree = ParamTree::from_toml_str(TREE).unwrap();
        assert!(tree.remove("arm/joint_state").is_some());
        assert!(!tree.has_entry("arm/joint_state"));
        assert!(tree.has_entry("arm"));
        assert!(tree.remove("nope/nothing").is_none());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.toml");
        std::fs::write(&path, TREE).unwrap();
        let tree = ParamTree::load(&path).unwrap();
        assert!(tree.has_entry("arm/joint_state"));

        std::fs::write(&path, "not = [valid").unwrap();
        assert!(matches!(
            ParamTree::load(&path).unwrap_err(),
            ParamError::Parse(_)
        ));
    }
}
