//! Model schema: model name to [`ModelOptions`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::remote::RemoteOptions;
use crate::error::ConfigError;
use crate::models::KeyNames;

/// Resolved options of one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOptions {
    /// Local store name; defaults to the model name
    #[serde(default)]
    pub store_name: Option<String>,
    /// Server base URL
    pub base_url: String,
    /// Resource route under the base URL
    #[serde(default)]
    pub route: String,
    #[serde(default)]
    pub keys: KeyNames,
    #[serde(default)]
    pub server_options: RemoteOptions,
}

impl ModelOptions {
    /// Full resource URL, always ending in a single `/`.
    pub fn url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let route = self.route.trim_matches('/');
        if route.is_empty() {
            format!("{base}/")
        } else {
            format!("{base}/{route}/")
        }
    }

    pub fn store_name(&self) -> &str {
        self.store_name.as_deref().unwrap_or_default()
    }
}

/// Raw schema document. Entries stay as JSON until resolved so that
/// overrides can be deep-merged before deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelSchema {
    pub models: BTreeMap<String, Value>,
}

impl ModelSchema {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError { message: e.to_string() })
    }

    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Options for `name`, with `overrides` deep-merged over the schema entry.
    pub fn resolve(&self, name: &str, overrides: Option<&Value>) -> Result<ModelOptions, ConfigError> {
        let mut entry = self
            .models
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownModel { name: name.to_string() })?;
        if let Some(overrides) = overrides {
            merge_json(&mut entry, overrides);
        }

        let mut options: ModelOptions = serde_json::from_value(entry)
            .map_err(|e| ConfigError::ParseError { message: format!("{name}: {e}") })?;

        if options.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                field: format!("{name}.base_url"),
                message: "must not be empty".to_string(),
            });
        }
        if options.store_name.as_deref().map_or(true, str::is_empty) {
            options.store_name = Some(name.to_string());
        }
        Ok(options)
    }
}

/// Recursively merge `overlay` into `base`. Objects merge key by key; any
/// other value in `overlay` replaces the one in `base`.
pub fn merge_json(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    },
                }
            }
        },
        (base, overlay) => *base = overlay.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::Protocol;
    use serde_json::json;

    fn schema() -> ModelSchema {
        ModelSchema::from_json_str(
            r#"{
                "test": {
                    "base_url": "http://www.hyphe.me/",
                    "route": "/test",
                    "server_options": {
                        "http_headers": { "all": { "X-Token": "a" } },
                        "send_modified_since": true
                    },
                    "unknown_option": 42
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let options = schema().resolve("test", None).unwrap();
        assert_eq!(options.store_name(), "test");
        assert_eq!(options.keys, KeyNames::default());
        assert_eq!(options.server_options.protocol, Protocol::Http);
        assert!(options.server_options.send_modified_since);
        assert_eq!(options.url(), "http://www.hyphe.me/test/");
    }

    #[test]
    fn test_overrides_deep_merged() {
        let overrides = json!({
            "store_name": "local",
            "keys": { "server_key": "uuid" },
            "server_options": { "http_headers": { "get": { "Accept": "json" } } }
        });
        let options = schema().resolve("test", Some(&overrides)).unwrap();
        assert_eq!(options.store_name(), "local");
        assert_eq!(options.keys.server_key, "uuid");
        assert_eq!(options.keys.store_key, "_id");
        assert_eq!(options.server_options.http_headers.all["X-Token"], "a");
        assert_eq!(options.server_options.http_headers.get["Accept"], "json");
        assert!(options.server_options.send_modified_since);
    }

    #[test]
    fn test_unknown_model() {
        let err = schema().resolve("nope", None).unwrap_err();
        assert_eq!(err, ConfigError::UnknownModel { name: "nope".to_string() });
    }

    #[test]
    fn test_empty_base_url_rejected() {
        let overrides = json!({ "base_url": " " });
        let err = schema().resolve("test", Some(&overrides)).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn test_url_without_route() {
        let options = ModelOptions {
            store_name: None,
            base_url: "http://api".to_string(),
            route: String::new(),
            keys: KeyNames::default(),
            server_options: RemoteOptions::default(),
        };
        assert_eq!(options.url(), "http://api/");
    }
}
