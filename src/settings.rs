//! Process-level settings and default-layer loading from the environment.
//!
//! Recognised variables:
//! - `CAC_DEFAULT_CONFIG_PATH`: JSON object file forming the default layer
//! - `CAC_DEFAULT_CONFIG`: inline JSON object, deep-merged over the file
//! - `CAC_SHUTDOWN_GRACE_MS`: how long freeing a client waits for its poller
//! - `CAC_REQUEST_TIMEOUT_MS`: HTTP request timeout

use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::error::{CacError, Result};
use crate::merge::merge_replace_arrays;

const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 2000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Settings shared by every client in a registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub default_layer: Map<String, Value>,
    pub shutdown_grace: Duration,
    pub request_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_layer: Map::new(),
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

impl Settings {
    /// Read settings from the process environment.
    ///
    /// An unreadable default layer is logged and replaced by an empty one.
    pub fn from_env() -> Self {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::from_env_map(&env)
    }

    /// Read settings from a provided env map.
    pub fn from_env_map(env: &HashMap<String, String>) -> Self {
        let default_layer = Self::load_default_layer(env).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "default configuration layer unavailable, using an empty one");
            Map::new()
        });
        Self {
            default_layer,
            shutdown_grace: millis_var(env, "CAC_SHUTDOWN_GRACE_MS", DEFAULT_SHUTDOWN_GRACE_MS),
            request_timeout: millis_var(env, "CAC_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }

    /// Build the default layer: file < inline (lowest to highest precedence).
    pub fn load_default_layer(env: &HashMap<String, String>) -> Result<Map<String, Value>> {
        let mut layer = Value::Object(Map::new());

        if let Some(path) = env.get("CAC_DEFAULT_CONFIG_PATH") {
            let content = fs::read_to_string(path)
                .map_err(|e| CacError::InvalidArgument(format!("Error reading {}: {}", path, e)))?;
            let file_layer = parse_object(&content, path)?;
            layer = merge_replace_arrays(&layer, &Value::Object(file_layer));
        }

        if let Some(inline) = env.get("CAC_DEFAULT_CONFIG") {
            let inline_layer = parse_object(inline, "CAC_DEFAULT_CONFIG")?;
            layer = merge_replace_arrays(&layer, &Value::Object(inline_layer));
        }

        match layer {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }

    /// Replace the default layer (builder style).
    pub fn with_default_layer(mut self, layer: Map<String, Value>) -> Self {
        self.default_layer = layer;
        self
    }

    /// Set the poller shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

fn parse_object(content: &str, origin: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(CacError::InvalidArgument(format!("{} must hold a JSON object", origin))),
        Err(e) => Err(CacError::InvalidArgument(format!("Error parsing {}: {}", origin, e))),
    }
}

fn millis_var(env: &HashMap<String, String>, key: &str, default: u64) -> Duration {
    let millis = env
        .get(key)
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(default);
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults_when_env_empty() {
        let settings = Settings::from_env_map(&HashMap::new());
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_durations_from_env() {
        let settings = Settings::from_env_map(&env(&[
            ("CAC_SHUTDOWN_GRACE_MS", "250"),
            ("CAC_REQUEST_TIMEOUT_MS", " 1500 "),
        ]));
        assert_eq!(settings.shutdown_grace, Duration::from_millis(250));
        assert_eq!(settings.request_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_unparseable_duration_falls_back() {
        let settings = Settings::from_env_map(&env(&[("CAC_SHUTDOWN_GRACE_MS", "soon")]));
        assert_eq!(settings.shutdown_grace, Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS));
    }

    #[test]
    fn test_inline_default_layer() {
        let layer = Settings::load_default_layer(&env(&[("CAC_DEFAULT_CONFIG", r#"{"x":10,"y":20}"#)])).unwrap();
        assert_eq!(Value::Object(layer), json!({"x": 10, "y": 20}));
    }

    #[test]
    fn test_inline_merges_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("defaults.json");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(br#"{"db":{"host":"file","port":5432},"x":1}"#).unwrap();

        let layer = Settings::load_default_layer(&env(&[
            ("CAC_DEFAULT_CONFIG_PATH", path.to_str().unwrap()),
            ("CAC_DEFAULT_CONFIG", r#"{"db":{"host":"inline"}}"#),
        ]))
        .unwrap();
        assert_eq!(
            Value::Object(layer),
            json!({"db": {"host": "inline", "port": 5432}, "x": 1})
        );
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = Settings::load_default_layer(&env(&[("CAC_DEFAULT_CONFIG_PATH", "/nonexistent/defaults.json")]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_non_object_layer_is_error() {
        let err = Settings::load_default_layer(&env(&[("CAC_DEFAULT_CONFIG", "[1,2]")])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_bad_layer_degrades_to_empty() {
        let settings = Settings::from_env_map(&env(&[("CAC_DEFAULT_CONFIG", "{not json")]));
        assert!(settings.default_layer.is_empty());
    }
}
