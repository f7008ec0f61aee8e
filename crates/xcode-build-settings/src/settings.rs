//! Build settings snapshot.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Errors raised when reading build settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("build setting not found: {0}")]
    KeyNotFound(String),

    #[error("build setting {key} is not a string (found {found})")]
    NotAString { key: String, found: &'static str },

    #[error("no build settings reported for target: {0}")]
    NoTargetEntry(String),

    #[error("failed to parse build settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl SettingsError {
    /// True when the error only means the key is absent.
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, SettingsError::KeyNotFound(_))
    }
}

/// Resolved build settings of one target in one configuration.
///
/// Values are usually strings, but xcodebuild and project files can carry
/// numbers, arrays and nested dictionaries as well.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildSettings(Map<String, Value>);

/// One entry of `xcodebuild -showBuildSettings -json` output.
#[derive(Debug, Deserialize)]
struct XcodebuildEntry {
    #[serde(default)]
    target: Option<String>,
    #[serde(rename = "buildSettings", default)]
    build_settings: Map<String, Value>,
}

impl BuildSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw value for a key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String value for a key.
    pub fn string(&self, key: &str) -> Result<&str, SettingsError> {
        match self.0.get(key) {
            None => Err(SettingsError::KeyNotFound(key.to_string())),
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(SettingsError::NotAString {
                key: key.to_string(),
                found: value_kind(other),
            }),
        }
    }

    /// String value for a key, `None` when absent or empty.
    pub fn non_empty_string(&self, key: &str) -> Result<Option<&str>, SettingsError> {
        match self.string(key) {
            Ok("") => Ok(None),
            Ok(s) => Ok(Some(s)),
            Err(SettingsError::KeyNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Overlay `other` on top of `self`; keys in `other` win.
    pub fn merge(&mut self, other: &BuildSettings) {
        for (key, value) in other.iter() {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Parse `xcodebuild -showBuildSettings -json` output, picking the entry
    /// reported for `target` (or the only entry when xcodebuild omits names).
    pub fn from_xcodebuild_json(bytes: &[u8], target: &str) -> Result<Self, SettingsError> {
        let entries: Vec<XcodebuildEntry> = serde_json::from_slice(bytes)?;

        let entry = match entries
            .iter()
            .position(|e| e.target.as_deref() == Some(target))
        {
            Some(idx) => entries.into_iter().nth(idx),
            None if entries.len() == 1 => entries.into_iter().next(),
            None => None,
        };

        entry
            .map(|e| Self(e.build_settings))
            .ok_or_else(|| SettingsError::NoTargetEntry(target.to_string()))
    }
}

impl From<Map<String, Value>> for BuildSettings {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for BuildSettings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
