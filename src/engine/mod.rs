//! Execution engine
//!
//! The engine orchestrates:
//! 1. Planning - validate the intent, build the dependency graph and levels
//! 2. Diffing - pair desired and recorded resources into a change order
//! 3. Executing - run the change order level by level on a bounded pool

pub mod differ;
pub mod executor;
pub mod operation;
pub mod planner;

pub use differ::{ActionType, ChangeOrder, ChangeStep, StepStatus, diff};
pub use executor::Executor;
pub use operation::{CancellationToken, DEFAULT_CONCURRENCY, Mode, Operation, OperationOptions};
pub use planner::{ExecutionPlan, plan};
