//! Application error types using thiserror
//!
//! Error hierarchy:
//! - FormatError: Issues while patching a manifest in a specific format
//! - ExecError: Subprocess (lock command / system test) failures
//! - ConfigError: Issues loading or validating the configuration
//! - UpdateError: Top-level error for update operations
//!
//! Errors classified as "unsupported" (missing lock command, missing
//! extraction pattern, unregistered format) are expected failure modes:
//! the orchestrator skips the affected package instead of aborting the
//! batch. Use [`UpdateError::is_unsupported`] to check the classification.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by format-specific manifest patchers
#[derive(Error, Debug)]
pub enum FormatError {
    /// No updater registered for the requested format
    #[error("updates not supported for format {format}; registered formats: {registered:?}")]
    UnsupportedFormat {
        format: String,
        registered: Vec<String>,
    },

    /// Raw format requires an extraction pattern
    #[error("missing extraction pattern")]
    MissingExtractionPattern,

    /// The package was not found in any configured dependency field
    #[error("package {package} not found in {manifest}")]
    PackageNotFound { package: String, manifest: String },

    /// The extraction pattern matched but captured no version group
    #[error("no version found for package {package}")]
    MissingVersionGroup { package: String },

    /// Captured version span is out of bounds for the content
    #[error("invalid version position for package {package}")]
    InvalidVersionSpan { package: String },

    /// The configured extraction pattern failed to compile
    #[error("invalid extraction pattern: {message}")]
    InvalidPattern { message: String },

    /// JSON parsing or serialization error
    #[error("invalid JSON: {message}")]
    Json { message: String },

    /// YAML parsing or serialization error
    #[error("invalid YAML: {message}")]
    Yaml { message: String },

    /// XML parsing or serialization error
    #[error("invalid XML: {message}")]
    Xml { message: String },
}

impl FormatError {
    /// Returns true for failure modes the orchestrator should skip over
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            FormatError::UnsupportedFormat { .. } | FormatError::MissingExtractionPattern
        )
    }
}

/// Errors raised while executing external commands
#[derive(Error, Debug)]
pub enum ExecError {
    /// No commands configured for the operation
    #[error("no commands configured")]
    NoCommands,

    /// The command string was empty after template substitution
    #[error("empty command")]
    EmptyCommand,

    /// The command process could not be spawned
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command exceeded its configured timeout
    #[error("command timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// The command exited with a non-zero status
    #[error("command failed: {message}")]
    CommandFailed { message: String },
}

/// Errors related to configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse the configuration file
    #[error("failed to parse config file {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
}

/// Top-level error type for update operations
#[derive(Error, Debug)]
pub enum UpdateError {
    /// Classified expected failure; the orchestrator skips rather than aborts
    #[error("update not supported: {reason}")]
    Unsupported { reason: String },

    /// Manifest patching failed
    #[error(transparent)]
    Format(#[from] FormatError),

    /// External command execution failed
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No rule configuration exists for the package's rule id
    #[error("rule configuration missing for {rule}")]
    MissingRule { rule: String },

    /// File system operation failed
    #[error("{context} {}: {source}", .path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The target file exists but is not writable by its owner
    #[error("file is read-only: {}", .path.display())]
    ReadOnly { path: PathBuf },

    /// Live package state could not be re-read during a drift check
    #[error("drift check failed: could not reload packages: {message}")]
    Reload { message: String },

    /// The package disappeared after a rollback
    #[error("drift check failed: package {package} missing after rollback")]
    MissingAfterRollback { package: String },

    /// The rolled-back version does not match the expected original
    #[error(
        "drift check failed: {package} version mismatch after rollback (expected {expected}, found {found})"
    )]
    RollbackDrift {
        package: String,
        expected: String,
        found: String,
    },

    /// System tests failed after an update
    #[error("system tests failed: {summary}")]
    SystemTests { summary: String },

    /// Generic execution failure with a preformatted message
    #[error("{message}")]
    Execution { message: String },

    /// Multiple accumulated errors
    #[error("{}", join_messages(.errors))]
    Many { errors: Vec<UpdateError> },
}

impl UpdateError {
    /// Creates an Unsupported error
    pub fn unsupported(reason: impl Into<String>) -> Self {
        UpdateError::Unsupported {
            reason: reason.into(),
        }
    }

    /// Creates a generic execution error
    pub fn execution(message: impl Into<String>) -> Self {
        UpdateError::Execution {
            message: message.into(),
        }
    }

    /// Creates an Io error with context
    pub fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        UpdateError::Io {
            context,
            path: path.into(),
            source,
        }
    }

    /// Returns true if this error is an expected, classified failure mode
    /// that the orchestrator should treat as a skip rather than an abort
    pub fn is_unsupported(&self) -> bool {
        match self {
            UpdateError::Unsupported { .. } => true,
            UpdateError::Format(err) => err.is_unsupported(),
            UpdateError::Exec(ExecError::NoCommands) => true,
            _ => false,
        }
    }

    /// Combines multiple errors into one, flattening singleton lists
    pub fn join(mut errors: Vec<UpdateError>) -> Option<UpdateError> {
        match errors.len() {
            0 => None,
            1 => Some(errors.remove(0)),
            _ => Some(UpdateError::Many { errors }),
        }
    }
}

/// Formats accumulated error messages for the Many variant
fn join_messages(errors: &[UpdateError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
