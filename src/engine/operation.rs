use intent::{FieldPath, Resource};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::state::StackKey;

/// Default bound on concurrent runtime calls
pub const DEFAULT_CONCURRENCY: usize = 10;

/// What an operation does with its change order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Simulate every change; nothing is mutated
    Preview,
    /// Converge the stack to the desired set
    Apply,
    /// Delete everything recorded for the stack
    Destroy,
}

impl Mode {
    pub fn is_dry_run(self) -> bool {
        self == Self::Preview
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Preview => "Preview",
            Self::Apply => "Apply",
            Self::Destroy => "Destroy",
        };
        f.write_str(name)
    }
}

/// Per-operation tuning
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationOptions {
    /// Attribute paths excluded from diffing
    pub ignored_fields: Vec<FieldPath>,
    /// Maximum number of runtime calls in flight; `None` uses the engine's
    /// configured limit
    pub concurrency: Option<usize>,
}

impl OperationOptions {
    /// Limit for this operation, falling back to `configured`
    pub fn concurrency_or(&self, configured: usize) -> usize {
        self.concurrency.unwrap_or(configured).max(1)
    }
}

/// Cooperative cancellation flag shared with the caller
///
/// Checked before each level starts and before each queued step begins;
/// calls already in flight run to completion.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One preview, apply or destroy request against a stack
#[derive(Debug, Clone)]
pub struct Operation {
    pub stack: StackKey,
    pub mode: Mode,
    pub desired: Vec<Resource>,
    pub options: OperationOptions,
    pub cancel: CancellationToken,
}

impl Operation {
    pub fn new(stack: StackKey, mode: Mode, desired: Vec<Resource>) -> Self {
        Self {
            stack,
            mode,
            desired,
            options: OperationOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn preview(stack: StackKey, desired: Vec<Resource>) -> Self {
        Self::new(stack, Mode::Preview, desired)
    }

    pub fn apply(stack: StackKey, desired: Vec<Resource>) -> Self {
        Self::new(stack, Mode::Apply, desired)
    }

    /// Destroy; `desired` only contributes ordering edges between recorded IDs
    pub fn destroy(stack: StackKey, desired: Vec<Resource>) -> Self {
        Self::new(stack, Mode::Destroy, desired)
    }

    pub fn with_options(mut self, options: OperationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}
