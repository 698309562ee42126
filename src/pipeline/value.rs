use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_yaml::Value as YamlValue;

/// Loosely-typed attribute tree for a component body (receiver, processor, ...)
///
/// Accessors fail soft: a missing key or an unexpected shape yields `None`
/// instead of an error, so checks can degrade gracefully on partial configs.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ConfigValue {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// Mapping that preserves the key order of the source document
    Map(Vec<(String, ConfigValue)>),
    Sequence(Vec<ConfigValue>),
}

impl ConfigValue {
    /// Look up a direct child of a mapping
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Look up a nested value by a dot-separated path (e.g. `protocols.grpc.endpoint`)
    pub fn get_path(&self, path: &str) -> Option<&ConfigValue> {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |value, segment| value.get(segment))
    }

    /// String value at `path`, if present and actually a string
    pub fn get_string(&self, path: &str) -> Option<&str> {
        self.get_path(path)?.as_str()
    }

    /// Mapping entries at `path`, if present and actually a mapping
    pub fn get_map(&self, path: &str) -> Option<&[(String, ConfigValue)]> {
        self.get_path(path)?.as_map()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(String, ConfigValue)]> {
        match self {
            ConfigValue::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn is_map(&self) -> bool {
        matches!(self, ConfigValue::Map(_))
    }

    /// Convert a parsed YAML node into a tree, unwrapping tags
    pub(crate) fn from_yaml(value: YamlValue) -> Self {
        match value {
            YamlValue::Null => ConfigValue::Null,
            YamlValue::Bool(b) => ConfigValue::Bool(b),
            YamlValue::Number(n) => match n.as_i64() {
                Some(i) => ConfigValue::Integer(i),
                None => ConfigValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            YamlValue::String(s) => ConfigValue::String(s),
            YamlValue::Sequence(items) => {
                ConfigValue::Sequence(items.into_iter().map(ConfigValue::from_yaml).collect())
            }
            YamlValue::Mapping(mapping) => ConfigValue::Map(
                mapping
                    .into_iter()
                    .map(|(k, v)| (yaml_key_text(k), ConfigValue::from_yaml(v)))
                    .collect(),
            ),
            YamlValue::Tagged(tagged) => ConfigValue::from_yaml(tagged.value),
        }
    }
}

/// Render a YAML mapping key as a string
pub(crate) fn yaml_key_text(key: YamlValue) -> String {
    match key {
        YamlValue::String(s) => s,
        YamlValue::Number(n) => n.to_string(),
        YamlValue::Bool(b) => b.to_string(),
        YamlValue::Null => "null".to_string(),
        YamlValue::Tagged(tagged) => yaml_key_text(tagged.value),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

impl Serialize for ConfigValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ConfigValue::Null => serializer.serialize_unit(),
            ConfigValue::Bool(b) => serializer.serialize_bool(*b),
            ConfigValue::Integer(i) => serializer.serialize_i64(*i),
            ConfigValue::Float(f) => serializer.serialize_f64(*f),
            ConfigValue::String(s) => serializer.serialize_str(s),
            ConfigValue::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            ConfigValue::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}
