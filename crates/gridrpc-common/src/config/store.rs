use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use crate::protocol::error::Result;

/// Read access to a hierarchical configuration store.
///
/// Paths are `/`-separated, absolute, and name a single option, e.g.
/// `/Systems/Framework/Services/Hello/Port`. Values are returned as strings;
/// callers parse them into whatever type they need.
pub trait ConfigStore: Send + Sync {
    /// Returns the option at `path`, or `None` if it is not set.
    fn get_option(&self, path: &str) -> Option<String>;

    /// Returns the option at `path`, or `default` if it is not set.
    fn get_option_or(&self, path: &str, default: &str) -> String {
        self.get_option(path).unwrap_or_else(|| default.to_string())
    }
}

/// In-memory configuration tree.
///
/// Built from a nested JSON document where objects are sections and
/// everything else is an option:
///
/// ```
/// use gridrpc_common::config::{ConfigStore, ConfigTree};
///
/// let tree = ConfigTree::from_json_str(r#"{
///     "Systems": { "Framework": { "Services": { "Hello": {
///         "Port": 9135,
///         "RegisterAlsoAs": ["Greeter", "Hi"]
///     }}}}
/// }"#).unwrap();
///
/// assert_eq!(tree.get_option("/Systems/Framework/Services/Hello/Port").as_deref(), Some("9135"));
/// assert_eq!(
///     tree.get_option("/Systems/Framework/Services/Hello/RegisterAlsoAs").as_deref(),
///     Some("Greeter,Hi")
/// );
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigTree {
    options: BTreeMap<String, String>,
}

impl ConfigTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document into a tree.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Json`](crate::RpcError::Json) if the document is
    /// not valid JSON.
    pub fn from_json_str(document: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(document)?;
        let mut tree = Self::new();
        tree.merge_value("", &root);
        Ok(tree)
    }

    /// Reads and parses a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let document = std::fs::read_to_string(path.as_ref())?;
        let tree = Self::from_json_str(&document)?;
        tracing::debug!(path = %path.as_ref().display(), options = tree.len(), "loaded configuration");
        Ok(tree)
    }

    /// Sets a single option, replacing any previous value.
    pub fn set_option(&mut self, path: &str, value: impl Into<String>) {
        self.options.insert(normalize(path), value.into());
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    fn merge_value(&mut self, prefix: &str, value: &Value) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    self.merge_value(&format!("{}/{}", prefix, key), child);
                }
            }
            Value::Null => {}
            other => {
                if let Some(text) = option_text(other) {
                    self.options.insert(prefix.to_string(), text);
                }
            }
        }
    }
}

impl ConfigStore for ConfigTree {
    fn get_option(&self, path: &str) -> Option<String> {
        self.options.get(&normalize(path)).cloned()
    }
}

fn option_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(option_text)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Null | Value::Object(_) => None,
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    let mut normalized = String::with_capacity(trimmed.len() + 1);
    for part in trimmed.split('/').filter(|p| !p.is_empty()) {
        normalized.push('/');
        normalized.push_str(part);
    }
    normalized
}
