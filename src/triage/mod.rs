/// Triage orchestration over the rule catalog
pub mod triage_engine;

pub use triage_engine::{sort_by_severity, TriageEngine, RULE_FAILURE_SUMMARY};
