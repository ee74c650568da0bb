//! Change order computation
//!
//! Pairs desired and recorded resources by ID and decides one action per
//! ID. Attribute comparison ignores the configured fields and never
//! coerces between value types.

use intent::{Attributes, FieldDiff, FieldPath, Resource, ResourceType, diff_attributes, strip_ignored};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// What a step does to its resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    UnChanged,
    Create,
    Update,
    Delete,
}

impl ActionType {
    /// Whether the step needs a runtime call
    pub fn is_change(self) -> bool {
        self != Self::UnChanged
    }

    /// Plan listing symbol
    pub fn symbol(self) -> char {
        match self {
            Self::UnChanged => ' ',
            Self::Create => '+',
            Self::Update => '~',
            Self::Delete => '-',
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UnChanged => "UnChanged",
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
        };
        f.write_str(name)
    }
}

/// Progress of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Skipped => "Skipped",
        };
        f.write_str(name)
    }
}

/// The planned (and later actual) change of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStep {
    pub id: String,
    pub resource_type: ResourceType,
    pub action: ActionType,
    /// Recorded attributes, absent on create
    pub before: Option<Attributes>,
    /// Desired attributes while planned; the runtime's result once applied
    pub after: Option<Attributes>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diffs: Vec<FieldDiff>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChangeStep {
    fn new(id: &str, resource_type: ResourceType, action: ActionType) -> Self {
        Self {
            id: id.to_string(),
            resource_type,
            action,
            before: None,
            after: None,
            diffs: Vec::new(),
            status: StepStatus::Pending,
            error: None,
        }
    }

    pub fn succeed(&mut self, after: Option<Attributes>) {
        self.status = StepStatus::Succeeded;
        self.after = after;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = StepStatus::Skipped;
        self.error = Some(reason.into());
    }
}

/// Ordered steps of one operation
///
/// `step_keys` is the report order; once planned it is the flattened
/// execution levels.
#[derive(Debug, Clone, Default)]
pub struct ChangeOrder {
    step_keys: Vec<String>,
    steps: HashMap<String, ChangeStep>,
    levels: Vec<Vec<String>>,
}

impl ChangeOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step; a step with the same ID is replaced in place
    pub fn insert(&mut self, step: ChangeStep) {
        if !self.steps.contains_key(&step.id) {
            self.step_keys.push(step.id.clone());
        }
        self.steps.insert(step.id.clone(), step);
    }

    pub fn get(&self, id: &str) -> Option<&ChangeStep> {
        self.steps.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ChangeStep> {
        self.steps.get_mut(id)
    }

    /// Steps in order
    pub fn iter(&self) -> impl Iterator<Item = &ChangeStep> {
        self.step_keys.iter().filter_map(|id| self.steps.get(id))
    }

    pub fn step_keys(&self) -> &[String] {
        &self.step_keys
    }

    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.step_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.step_keys.is_empty()
    }

    /// Whether any step needs a runtime call
    pub fn has_changes(&self) -> bool {
        self.iter().any(|s| s.action.is_change())
    }

    /// Adopt execution levels and order steps along them
    ///
    /// Level entries without a step are dropped; steps missing from every
    /// level keep their relative order at the end.
    pub fn set_levels(&mut self, levels: Vec<Vec<String>>) {
        let levels: Vec<Vec<String>> = levels
            .into_iter()
            .map(|level| level.into_iter().filter(|id| self.steps.contains_key(id)).collect())
            .filter(|level: &Vec<String>| !level.is_empty())
            .collect();

        let placed: HashSet<&String> = levels.iter().flatten().collect();
        let mut keys: Vec<String> = levels.iter().flatten().cloned().collect();
        keys.extend(self.step_keys.iter().filter(|k| !placed.contains(k)).cloned());

        self.step_keys = keys;
        self.levels = levels;
    }
}

/// Decide one action per resource ID
///
/// Desired IDs come first in ascending order, then IDs only present in
/// `prior`. `before` holds the recorded attributes and `after` the desired
/// ones, both unstripped; only the comparison skips `ignored` paths.
pub fn diff(desired: &[Resource], prior: &[Resource], ignored: &[FieldPath]) -> ChangeOrder {
    let prior_by_id: BTreeMap<&str, &Resource> = prior.iter().map(|r| (r.id.as_str(), r)).collect();
    let desired_by_id: BTreeMap<&str, &Resource> = desired.iter().map(|r| (r.id.as_str(), r)).collect();

    let mut order = ChangeOrder::new();
    for (id, resource) in &desired_by_id {
        let step = match prior_by_id.get(id) {
            None => {
                let mut step = ChangeStep::new(id, resource.resource_type, ActionType::Create);
                step.after = Some(resource.attributes.clone());
                step
            }
            Some(recorded) => {
                let diffs = diff_attributes(
                    &strip_ignored(&recorded.attributes, ignored),
                    &strip_ignored(&resource.attributes, ignored),
                );
                let action = if diffs.is_empty() {
                    ActionType::UnChanged
                } else {
                    ActionType::Update
                };
                let mut step = ChangeStep::new(id, resource.resource_type, action);
                step.before = Some(recorded.attributes.clone());
                step.after = Some(resource.attributes.clone());
                step.diffs = diffs;
                step
            }
        };
        order.insert(step);
    }

    for (id, recorded) in &prior_by_id {
        if !desired_by_id.contains_key(id) {
            let mut step = ChangeStep::new(id, recorded.resource_type, ActionType::Delete);
            step.before = Some(recorded.attributes.clone());
            order.insert(step);
        }
    }

    log::debug!(
        "Diffed {} desired against {} recorded resource(s)",
        desired.len(),
        prior.len()
    );
    order
}
