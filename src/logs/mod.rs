/// Log classification taxonomies
pub mod classifier;

pub use classifier::{summarize, CategorySummary, ClassifiedLogLine, LogCategory, LogClassifier};
