//! Change report
//!
//! The outcome of an operation: every step in execution order with its
//! final status, plus machine-readable and human-readable renderings.

use intent::{Attributes, FieldDiffKind};
use serde::{Deserialize, Serialize};
use similar::TextDiff;
use std::fmt;

use crate::engine::{ActionType, ChangeOrder, ChangeStep, Mode, StepStatus};

/// Overall result of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Succeeded,
    Failed,
}

/// One line of the machine-readable report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: String,
    pub action: ActionType,
    pub before: Option<Attributes>,
    pub after: Option<Attributes>,
    pub status: StepStatus,
}

/// Step counts per action and per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub unchanged: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending: usize,
}

impl ChangeSummary {
    pub fn total_changes(&self) -> usize {
        self.create + self.update + self.delete
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete, {} unchanged",
            self.create, self.update, self.delete, self.unchanged
        )
    }
}

/// Outcome of a preview, apply or destroy
#[derive(Debug, Clone)]
pub struct ChangeReport {
    mode: Mode,
    order: ChangeOrder,
    status: OperationStatus,
    cancelled: bool,
}

impl ChangeReport {
    pub fn new(mode: Mode, order: ChangeOrder, cancelled: bool) -> Self {
        let failed = order.iter().any(|s| s.status == StepStatus::Failed);
        Self {
            mode,
            order,
            status: if failed {
                OperationStatus::Failed
            } else {
                OperationStatus::Succeeded
            },
            cancelled,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn status(&self) -> OperationStatus {
        self.status
    }

    /// Whether the run stopped early on a cancellation request
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn order(&self) -> &ChangeOrder {
        &self.order
    }

    /// Steps in execution order
    pub fn steps(&self) -> impl Iterator<Item = &ChangeStep> {
        self.order.iter()
    }

    pub fn get(&self, id: &str) -> Option<&ChangeStep> {
        self.order.get(id)
    }

    /// True when nothing would change, including for an empty order
    pub fn all_unchanged(&self) -> bool {
        self.steps().all(|s| s.action == ActionType::UnChanged)
    }

    pub fn changed_steps(&self) -> impl Iterator<Item = &ChangeStep> {
        self.steps().filter(|s| s.action.is_change())
    }

    pub fn summary(&self) -> ChangeSummary {
        let mut summary = ChangeSummary::default();
        for step in self.steps() {
            match step.action {
                ActionType::Create => summary.create += 1,
                ActionType::Update => summary.update += 1,
                ActionType::Delete => summary.delete += 1,
                ActionType::UnChanged => summary.unchanged += 1,
            }
            match step.status {
                StepStatus::Succeeded => summary.succeeded += 1,
                StepStatus::Failed => summary.failed += 1,
                StepStatus::Skipped => summary.skipped += 1,
                StepStatus::Pending | StepStatus::Running => summary.pending += 1,
            }
        }
        summary
    }

    pub fn records(&self) -> Vec<ChangeRecord> {
        self.steps()
            .map(|s| ChangeRecord {
                id: s.id.clone(),
                action: s.action,
                before: s.before.clone(),
                after: s.after.clone(),
                status: s.status,
            })
            .collect()
    }

    /// Pretty JSON array of [`ChangeRecord`]s
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.records())
    }

    /// Unified before/after diff of one step, followed by its field changes
    pub fn detail(&self, id: &str) -> Option<String> {
        let step = self.get(id)?;
        let before = pretty(step.before.as_ref());
        let after = pretty(step.after.as_ref());

        let mut out = format!("{} {} ({})\n", step.action.symbol(), step.id, step.action);
        let diff = TextDiff::from_lines(&before, &after);
        let unified = diff.unified_diff().context_radius(3).header("before", "after").to_string();
        out.push_str(&unified);

        for change in &step.diffs {
            let symbol = match change.kind {
                FieldDiffKind::Added => '+',
                FieldDiffKind::Removed => '-',
                FieldDiffKind::Changed => '~',
            };
            out.push_str(&format!(
                "  {symbol} {}: {} -> {}\n",
                change.path,
                change.before.as_ref().map_or_else(|| "<none>".to_string(), ToString::to_string),
                change.after.as_ref().map_or_else(|| "<none>".to_string(), ToString::to_string),
            ));
        }
        if let Some(error) = &step.error {
            out.push_str(&format!("  error: {error}\n"));
        }
        Some(out)
    }
}

fn pretty(attributes: Option<&Attributes>) -> String {
    attributes
        .and_then(|a| serde_json::to_string_pretty(a).ok())
        .map(|mut s| {
            s.push('\n');
            s
        })
        .unwrap_or_default()
}

impl fmt::Display for ChangeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} plan:", self.mode)?;
        for step in self.changed_steps() {
            write!(f, "  {} {}", step.action.symbol(), step.id)?;
            if step.status != StepStatus::Pending {
                write!(f, " [{}]", step.status)?;
            }
            writeln!(f)?;
        }
        let summary = self.summary();
        write!(f, "{summary}")?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}
