/// Collector configuration model
pub mod document;
pub mod value;

pub use document::{component_type, Pipeline, PipelineDocument, ServiceSection};
pub use value::ConfigValue;
