//! Progress callbacks for operations
//!
//! Workers never call back into a progress sink; the executor reports
//! after each level has joined, so implementations need no locking.

use crate::engine::{ChangeStep, Mode, StepStatus};

/// Progress callback for execution operations
///
/// Implement this trait to receive progress updates during execution.
pub trait ProgressCallback: Send {
    /// Called before the steps of one level are dispatched
    fn on_level_start(&mut self, mode: Mode, level: usize, steps: usize);

    /// Called once per step when its outcome is known
    fn on_step_complete(&mut self, step: &ChangeStep);

    /// Called after every step of a level has finished
    fn on_level_complete(&mut self, level: usize);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_level_start(&mut self, _mode: Mode, _level: usize, _steps: usize) {}
    fn on_step_complete(&mut self, _step: &ChangeStep) {}
    fn on_level_complete(&mut self, _level: usize) {}
}

/// Progress callback that writes to the `log` facade
pub struct LogProgress;

impl ProgressCallback for LogProgress {
    fn on_level_start(&mut self, mode: Mode, level: usize, steps: usize) {
        log::info!("{mode}: level {level} with {steps} step(s)");
    }

    fn on_step_complete(&mut self, step: &ChangeStep) {
        match step.status {
            StepStatus::Failed => log::warn!(
                "{} {} failed: {}",
                step.action,
                step.id,
                step.error.as_deref().unwrap_or("unknown error")
            ),
            StepStatus::Skipped => log::info!(
                "{} {} skipped: {}",
                step.action,
                step.id,
                step.error.as_deref().unwrap_or("not started")
            ),
            _ => log::info!("{} {} {}", step.action, step.id, step.status),
        }
    }

    fn on_level_complete(&mut self, level: usize) {
        log::debug!("level {level} complete");
    }
}
