//! Error types for the intent crate
//!
//! Every variant here is a validation error: it is raised before anything
//! touches a runtime, and it always names the offending resource(s).

use thiserror::Error;

/// Errors raised while validating or analysing a desired resource set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A resource was declared without an ID
    #[error("resource at position {index} has an empty id")]
    EmptyId { index: usize },

    /// Two resources share the same ID
    #[error("duplicate resource id: {id}")]
    DuplicateId { id: String },

    /// An implicit reference points at a resource that is not in the set
    #[error("resource {resource} references unknown resource in {reference:?}")]
    DanglingReference { resource: String, reference: String },

    /// A `dependsOn` entry or graph edge names a resource that is not in the set
    #[error("resource {resource} depends on unknown resource {dependency}")]
    UnknownDependency {
        resource: String,
        dependency: String,
    },

    /// The dependency graph contains a cycle
    #[error("dependency cycle detected: {}", .path.join(" -> "))]
    Cycle {
        /// Participating IDs in cycle order, first ID repeated at the end
        path: Vec<String>,
    },

    /// A reference could not be substituted because its target output is missing
    #[error("resource {resource}: cannot resolve {reference:?}, {target} has no value at {path}")]
    UnresolvedReference {
        resource: String,
        reference: String,
        target: String,
        path: String,
    },

    /// A field path could not be parsed
    #[error("invalid field path {0:?}")]
    InvalidPath(String),
}

/// Result type for intent operations
pub type Result<T> = std::result::Result<T, Error>;
