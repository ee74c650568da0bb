//! # Kusion
//!
//! Intent-driven orchestration core.
//!
//! Given the desired resources of a stack and what was recorded the last
//! time it was applied, the engine works out what must change, in which
//! order, and carries it out through pluggable runtimes:
//!
//! - [`engine::plan`] validates the intent and lays the change order out in
//!   dependency levels
//! - [`engine::Executor`] previews, applies or destroys it level by level,
//!   persisting each finished resource to a [`state::StateStore`]
//! - [`report::ChangeReport`] describes the outcome of every step
//!
//! The pure model (resources, references, graph, field diffs) lives in the
//! `intent` crate and is re-exported here.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use kusion::{EngineConfig, Executor, MemoryStateStore, Operation, RuntimeRegistry, StackKey};
//!
//! // Register a runtime per resource type; an empty stack needs none.
//! let executor = Executor::new(
//!     Arc::new(MemoryStateStore::new()),
//!     RuntimeRegistry::new(),
//!     EngineConfig::default(),
//! );
//!
//! let report = executor.run(&Operation::preview(StackKey::new("shop", "prod"), Vec::new()))?;
//! assert!(report.all_unchanged());
//! # Ok::<(), kusion::Error>(())
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod progress;
pub mod report;
pub mod runtime;
pub mod state;

#[cfg(test)]
mod testing;

pub use config::{EngineConfig, ProviderConfig};
pub use engine::{
    ActionType, CancellationToken, ChangeOrder, ChangeStep, ExecutionPlan, Executor, Mode,
    Operation, OperationOptions, StepStatus,
};
pub use error::{Error, Result};
pub use intent::{Attributes, FieldPath, Resource, ResourceType, Value};
pub use progress::{LogProgress, NoProgress, ProgressCallback};
pub use report::{ChangeRecord, ChangeReport, ChangeSummary, OperationStatus};
pub use runtime::{ApplyRequest, Runtime, RuntimeRegistry};
pub use state::{FileStateStore, MemoryStateStore, StackKey, StateLock, StateSnapshot, StateStore};
