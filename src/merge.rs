//! Layer merge strategies.

use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::CacError;

/// How a tenant layer combines with the default layer when both carry a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Top-level keys; tenant wins.
    Override,
    /// Top-level keys; arrays present in both layers are concatenated, tenant first.
    Append,
    /// Objects merge recursively, tenant wins at every leaf, arrays are replaced.
    DeepMerge,
}

impl MergeStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            MergeStrategy::Override => "override",
            MergeStrategy::Append => "append",
            MergeStrategy::DeepMerge => "deep-merge",
        }
    }

    /// Combine `tenant` over `defaults`.
    pub fn apply(self, defaults: &Map<String, Value>, tenant: &Map<String, Value>) -> Map<String, Value> {
        match self {
            MergeStrategy::Override => {
                let mut result = defaults.clone();
                for (key, value) in tenant {
                    result.insert(key.clone(), value.clone());
                }
                result
            }
            MergeStrategy::Append => {
                let mut result = defaults.clone();
                for (key, value) in tenant {
                    let merged = match (value, result.get(key)) {
                        (Value::Array(ours), Some(Value::Array(theirs))) => {
                            let mut items = ours.clone();
                            items.extend(theirs.iter().cloned());
                            Value::Array(items)
                        }
                        _ => value.clone(),
                    };
                    result.insert(key.clone(), merged);
                }
                result
            }
            MergeStrategy::DeepMerge => {
                match merge_replace_arrays(&Value::Object(defaults.clone()), &Value::Object(tenant.clone())) {
                    Value::Object(map) => map,
                    _ => Map::new(),
                }
            }
        }
    }
}

impl FromStr for MergeStrategy {
    type Err = CacError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim().to_ascii_lowercase().as_str() {
            "override" | "replace" => Ok(MergeStrategy::Override),
            "append" => Ok(MergeStrategy::Append),
            "deep-merge" | "deep_merge" | "merge" => Ok(MergeStrategy::DeepMerge),
            _ => Err(CacError::InvalidArgument(format!("unknown merge strategy `{}`", name))),
        }
    }
}

/// Deep merge where arrays replace entirely, objects recurse, primitives overwrite.
pub fn merge_replace_arrays(target: &Value, source: &Value) -> Value {
    match source {
        // Arrays: replace entirely
        Value::Array(_) => source.clone(),

        // Objects: recursive merge
        Value::Object(source_map) => {
            let mut result = match target {
                Value::Object(target_map) => target_map.clone(),
                _ => Map::new(),
            };
            for (key, value) in source_map {
                let merged = if let Some(target_value) = result.get(key) {
                    merge_replace_arrays(target_value, value)
                } else {
                    value.clone()
                };
                result.insert(key.clone(), merged);
            }
            Value::Object(result)
        }

        // Primitives: source overwrites
        _ => source.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test layer must be an object"),
        }
    }

    #[test]
    fn test_parse_known_names() {
        assert_eq!("override".parse::<MergeStrategy>().unwrap(), MergeStrategy::Override);
        assert_eq!("REPLACE".parse::<MergeStrategy>().unwrap(), MergeStrategy::Override);
        assert_eq!("append".parse::<MergeStrategy>().unwrap(), MergeStrategy::Append);
        assert_eq!("deep-merge".parse::<MergeStrategy>().unwrap(), MergeStrategy::DeepMerge);
        assert_eq!("Deep_Merge".parse::<MergeStrategy>().unwrap(), MergeStrategy::DeepMerge);
        assert_eq!(" merge ".parse::<MergeStrategy>().unwrap(), MergeStrategy::DeepMerge);
    }

    #[test]
    fn test_unknown_name_is_invalid_argument() {
        for name in ["", "overide", "union", "deep merge"] {
            let err = name.parse::<MergeStrategy>().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{}", name);
        }
    }

    #[test]
    fn test_override_tenant_wins() {
        let defaults = map(json!({"x": 10, "y": 20}));
        let tenant = map(json!({"x": 1}));
        let result = MergeStrategy::Override.apply(&defaults, &tenant);
        assert_eq!(Value::Object(result), json!({"x": 1, "y": 20}));
    }

    #[test]
    fn test_override_is_shallow() {
        let defaults = map(json!({"db": {"host": "default", "port": 5432}}));
        let tenant = map(json!({"db": {"host": "tenant"}}));
        let result = MergeStrategy::Override.apply(&defaults, &tenant);
        assert_eq!(Value::Object(result), json!({"db": {"host": "tenant"}}));
    }

    #[test]
    fn test_append_concatenates_tenant_first() {
        let defaults = map(json!({"hosts": ["d1", "d2"], "name": "default"}));
        let tenant = map(json!({"hosts": ["t1"], "name": "tenant"}));
        let result = MergeStrategy::Append.apply(&defaults, &tenant);
        assert_eq!(
            Value::Object(result),
            json!({"hosts": ["t1", "d1", "d2"], "name": "tenant"})
        );
    }

    #[test]
    fn test_append_array_over_scalar_replaces() {
        let defaults = map(json!({"hosts": "d1"}));
        let tenant = map(json!({"hosts": ["t1"]}));
        let result = MergeStrategy::Append.apply(&defaults, &tenant);
        assert_eq!(Value::Object(result), json!({"hosts": ["t1"]}));
    }

    #[test]
    fn test_deep_merge_recurses() {
        let defaults = map(json!({"db": {"host": "default", "port": 5432, "ssl": false}, "keep": true}));
        let tenant = map(json!({"db": {"host": "tenant", "ssl": true}}));
        let result = MergeStrategy::DeepMerge.apply(&defaults, &tenant);
        assert_eq!(
            Value::Object(result),
            json!({"db": {"host": "tenant", "port": 5432, "ssl": true}, "keep": true})
        );
    }

    #[test]
    fn test_deep_merge_replaces_arrays() {
        let defaults = map(json!({"a": {"items": [1, 2, 3]}}));
        let tenant = map(json!({"a": {"items": [9]}}));
        let result = MergeStrategy::DeepMerge.apply(&defaults, &tenant);
        assert_eq!(Value::Object(result), json!({"a": {"items": [9]}}));
    }

    #[test]
    fn test_empty_tenant_keeps_defaults() {
        let defaults = map(json!({"a": 1}));
        for strategy in [MergeStrategy::Override, MergeStrategy::Append, MergeStrategy::DeepMerge] {
            let result = strategy.apply(&defaults, &Map::new());
            assert_eq!(Value::Object(result), json!({"a": 1}), "{}", strategy.as_str());
        }
    }

    #[test]
    fn test_replace_arrays_primitive_replaces_object() {
        let result = merge_replace_arrays(&json!({"a": {"x": 1}}), &json!({"a": 42}));
        assert_eq!(result, json!({"a": 42}));
    }

    #[test]
    fn test_replace_arrays_object_over_non_object() {
        let result = merge_replace_arrays(&json!("not-object"), &json!({"a": 1}));
        assert_eq!(result, json!({"a": 1}));
    }
}
