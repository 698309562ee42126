use crate::error::ParseError;
use crate::pipeline::value::{yaml_key_text, ConfigValue};
use serde::Serialize;
use serde_yaml::Value as YamlValue;
use std::collections::BTreeMap;

/// Parsed collector configuration
///
/// Component sections map a component id (`type` or `type/qualifier`) to its
/// attribute tree. Pipelines may reference ids that are not declared in the
/// sections; the model does not enforce referential integrity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineDocument {
    pub receivers: BTreeMap<String, ConfigValue>,
    pub processors: BTreeMap<String, ConfigValue>,
    pub exporters: BTreeMap<String, ConfigValue>,
    pub connectors: BTreeMap<String, ConfigValue>,
    pub service: ServiceSection,
}

/// The `service` section of a collector configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceSection {
    pub pipelines: BTreeMap<String, Pipeline>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<String>,
}

/// A named chain of receiver -> processor -> exporter references
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Pipeline {
    pub receivers: Vec<String>,
    pub processors: Vec<String>,
    pub exporters: Vec<String>,
}

/// Base component type of an id: `batch/custom` -> `batch`
pub fn component_type(id: &str) -> &str {
    id.split('/').next().unwrap_or(id)
}

impl Pipeline {
    /// Check whether any processor is `base` or `base/<qualifier>`
    pub fn has_processor(&self, base: &str) -> bool {
        self.processors_based_on(base).next().is_some()
    }

    /// Processors whose base type is `base`, in pipeline order
    pub fn processors_based_on<'a>(&'a self, base: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.processors
            .iter()
            .map(String::as_str)
            .filter(move |id| component_type(id) == base)
    }

    pub fn has_receiver(&self, id: &str) -> bool {
        self.receivers.iter().any(|r| r == id)
    }

    pub fn has_exporter(&self, id: &str) -> bool {
        self.exporters.iter().any(|e| e == id)
    }
}

impl PipelineDocument {
    /// Parse raw configuration text
    ///
    /// Empty input, or input that omits sections, yields an empty or partial
    /// document. Merge keys (`<<: *anchor`) are expanded before the sections are
    /// read. Malformed YAML and sections of the wrong shape are errors.
    ///
    /// # Example
    ///
    /// ```
    /// use otelcheck::pipeline::PipelineDocument;
    ///
    /// let yaml = b"service:\n  pipelines:\n    traces:\n      processors: [batch/custom]\n";
    /// let doc = PipelineDocument::parse(yaml).unwrap();
    /// assert!(doc.service.pipelines["traces"].has_processor("batch"));
    /// ```
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let mut root: YamlValue = serde_yaml::from_slice(bytes)?;
        root.apply_merge()?;

        let root = match untag(root) {
            YamlValue::Null => return Ok(Self::default()),
            YamlValue::Mapping(mapping) => mapping,
            _ => return Err(structure("", "top-level value must be a mapping")),
        };

        let mut document = Self::default();
        for (key, value) in root {
            let key = yaml_key_text(key);
            match key.as_str() {
                "receivers" => document.receivers = parse_components(&key, value)?,
                "processors" => document.processors = parse_components(&key, value)?,
                "exporters" => document.exporters = parse_components(&key, value)?,
                "connectors" => document.connectors = parse_components(&key, value)?,
                "service" => document.service = parse_service(value)?,
                _ => {}
            }
        }

        Ok(document)
    }

    /// Whether the document declares no components and no pipelines
    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty()
            && self.processors.is_empty()
            && self.exporters.is_empty()
            && self.connectors.is_empty()
            && self.service.pipelines.is_empty()
    }
}

fn untag(value: YamlValue) -> YamlValue {
    match value {
        YamlValue::Tagged(tagged) => untag(tagged.value),
        other => other,
    }
}

fn structure(path: &str, reason: &str) -> ParseError {
    ParseError::Structure {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_components(
    path: &str,
    value: YamlValue,
) -> Result<BTreeMap<String, ConfigValue>, ParseError> {
    match untag(value) {
        YamlValue::Null => Ok(BTreeMap::new()),
        YamlValue::Mapping(mapping) => Ok(mapping
            .into_iter()
            .map(|(k, v)| (yaml_key_text(k), ConfigValue::from_yaml(v)))
            .collect()),
        _ => Err(structure(path, "expected a mapping of component ids")),
    }
}

fn parse_service(value: YamlValue) -> Result<ServiceSection, ParseError> {
    let mapping = match untag(value) {
        YamlValue::Null => return Ok(ServiceSection::default()),
        YamlValue::Mapping(mapping) => mapping,
        _ => return Err(structure("service", "expected a mapping")),
    };

    let mut service = ServiceSection::default();
    for (key, value) in mapping {
        match yaml_key_text(key).as_str() {
            "pipelines" => service.pipelines = parse_pipelines(value)?,
            "extensions" => service.extensions = parse_id_list("service.extensions", value)?,
            _ => {}
        }
    }

    Ok(service)
}

fn parse_pipelines(value: YamlValue) -> Result<BTreeMap<String, Pipeline>, ParseError> {
    let mapping = match untag(value) {
        YamlValue::Null => return Ok(BTreeMap::new()),
        YamlValue::Mapping(mapping) => mapping,
        _ => return Err(structure("service.pipelines", "expected a mapping")),
    };

    let mut pipelines = BTreeMap::new();
    for (key, value) in mapping {
        let name = yaml_key_text(key);
        let path = format!("service.pipelines.{}", name);

        let body = match untag(value) {
            YamlValue::Null => {
                pipelines.insert(name, Pipeline::default());
                continue;
            }
            YamlValue::Mapping(body) => body,
            _ => return Err(structure(&path, "expected a mapping")),
        };

        let mut pipeline = Pipeline::default();
        for (field, list) in body {
            let field = yaml_key_text(field);
            let field_path = format!("{}.{}", path, field);
            match field.as_str() {
                "receivers" => pipeline.receivers = parse_id_list(&field_path, list)?,
                "processors" => pipeline.processors = parse_id_list(&field_path, list)?,
                "exporters" => pipeline.exporters = parse_id_list(&field_path, list)?,
                _ => {}
            }
        }
        pipelines.insert(name, pipeline);
    }

    Ok(pipelines)
}

fn parse_id_list(path: &str, value: YamlValue) -> Result<Vec<String>, ParseError> {
    let items = match untag(value) {
        YamlValue::Null => return Ok(Vec::new()),
        YamlValue::Sequence(items) => items,
        _ => return Err(structure(path, "expected a list of component ids")),
    };

    items
        .into_iter()
        .map(|item| match untag(item) {
            YamlValue::String(s) => Ok(s),
            YamlValue::Number(n) => Ok(n.to_string()),
            YamlValue::Bool(b) => Ok(b.to_string()),
            _ => Err(structure(path, "component ids must be scalars")),
        })
        .collect()
}
