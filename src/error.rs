//! Error types for the engine
//!
//! Validation errors come from the `intent` crate and stop an operation
//! before anything runs. Collaborator failures (state store, runtime) are
//! `anyhow` errors at the trait seam and are carried here as messages with
//! the stack or resource they concern.

use crate::report::ChangeReport;
use intent::ResourceType;
use thiserror::Error;

/// Errors that can occur while planning or running an operation
#[derive(Error, Debug)]
pub enum Error {
    /// The desired set is invalid (empty/duplicate ID, dangling reference, cycle)
    #[error("invalid intent: {0}")]
    Validation(#[from] intent::Error),

    /// No runtime can materialise a resource of this type
    #[error("no runtime registered for {resource_type} (needed by {resource})")]
    RuntimeNotFound {
        resource_type: ResourceType,
        resource: String,
    },

    /// The stack's state lock could not be taken
    #[error("failed to lock state of {stack}: {message}")]
    Lock { stack: String, message: String },

    /// The prior state could not be loaded
    #[error("failed to load state of {stack}: {message}")]
    StateLoad { stack: String, message: String },

    /// A runtime failed while simulating a change; no plan is returned
    #[error("preview failed at {resource}: {message}")]
    PreviewFailed { resource: String, message: String },

    /// At least one step failed; the report shows what did and did not run
    #[error("operation failed: {failed} of {total} step(s) failed")]
    OperationFailed {
        failed: usize,
        total: usize,
        report: Box<ChangeReport>,
    },

    /// Configuration is unusable
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The worker pool could not be created
    #[error("failed to create worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether the error was raised before any runtime call
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::RuntimeNotFound { .. })
    }

    /// The partially executed report attached to an operation failure
    pub fn report(&self) -> Option<&ChangeReport> {
        match self {
            Self::OperationFailed { report, .. } => Some(report),
            _ => None,
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;
