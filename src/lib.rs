/// Error types for the diagnostic engine
pub mod error;

/// Shared cancellation signal
pub mod cancel;

/// Findings and report envelope
pub mod findings;

/// Collector configuration model
pub mod pipeline;

/// Diagnostic rule catalog
pub mod rules;

/// Log classification
pub mod logs;

/// Triage orchestration
pub mod triage;

/// Deployment mode detection
pub mod deployment;

/// Cluster feature discovery
pub mod discovery;

/// Cluster collaborators and the kubectl adapter
pub mod cluster;

/// Diagnostic tool flows
pub mod diagnoser;

/// Settings file management
pub mod settings;

// Re-export commonly used types
pub use error::{CollaboratorError, ParseError, ResolveError, RuleError, SettingsError};
pub use findings::{Category, DiagnosticFinding, DiagnosticReport, Severity};
