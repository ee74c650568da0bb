//! Operation executor
//!
//! Runs a plan level by level on a bounded worker pool. A level starts only
//! after every step of the previous one has finished; that barrier is what
//! makes dependency order hold. Failures skip the failed step's descendants
//! and nothing else.

use anyhow::Context as _;
use intent::{Attributes, FieldPath, ReferenceResolver, Resource, Substitution};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use super::differ::{ActionType, ChangeOrder, StepStatus};
use super::operation::{Mode, Operation};
use super::planner::{self, ExecutionPlan};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::progress::{NoProgress, ProgressCallback};
use crate::report::{ChangeReport, OperationStatus};
use crate::runtime::{ApplyRequest, RuntimeRegistry};
use crate::state::{StackKey, StateLock, StateStore};

/// What one worker produced for one step
#[derive(Debug)]
struct StepOutcome {
    id: String,
    result: StepResult,
}

#[derive(Debug)]
enum StepResult {
    /// Live (or, in preview, predicted) attributes
    Applied(Attributes),
    /// Deleted; in preview, the live attributes if the object still exists
    Deleted { observed: Option<Attributes> },
    Failed(String),
    /// Cancelled before the worker picked it up
    NotStarted,
}

/// Executes preview, apply and destroy operations against one state store
pub struct Executor {
    store: Arc<dyn StateStore>,
    runtimes: RuntimeRegistry,
    config: EngineConfig,
    resolver: ReferenceResolver,
}

impl Executor {
    pub fn new(store: Arc<dyn StateStore>, runtimes: RuntimeRegistry, config: EngineConfig) -> Self {
        let resolver = config.resolver();
        Self {
            store,
            runtimes,
            config,
            resolver,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Plan an operation against the current state without running it
    pub fn plan(&self, op: &Operation) -> Result<ExecutionPlan> {
        let _lock = self.lock(&op.stack)?;
        let prior = self.load(&op.stack)?;
        self.plan_with(op, &prior)
    }

    pub fn run(&self, op: &Operation) -> Result<ChangeReport> {
        self.run_with_progress(op, &mut NoProgress)
    }

    /// Run an operation, reporting progress after each step
    ///
    /// Returns `Err(OperationFailed)` carrying the full report if any step
    /// failed, and `Err(PreviewFailed)` without a report if a preview
    /// simulation failed. The stack lock is held for the whole call.
    pub fn run_with_progress<P: ProgressCallback>(
        &self,
        op: &Operation,
        progress: &mut P,
    ) -> Result<ChangeReport> {
        let _lock = self.lock(&op.stack)?;
        let prior = self.load(&op.stack)?;
        let mut plan = self.plan_with(op, &prior)?;
        self.check_runtimes(&plan)?;
        if op.mode == Mode::Apply {
            self.refresh_dependencies(op, &mut plan);
        }

        let cancelled = if plan.order.has_changes() {
            self.execute(op, &mut plan, progress)?
        } else {
            log::info!("{}: {} is up to date", op.mode, op.stack);
            succeed_unchanged(&mut plan.order);
            false
        };
        let report = ChangeReport::new(op.mode, plan.order, cancelled);
        if report.status() == OperationStatus::Failed {
            let summary = report.summary();
            log::warn!(
                "{} of {}: {} step(s) failed, {} skipped",
                op.mode,
                op.stack,
                summary.failed,
                summary.skipped
            );
            return Err(Error::OperationFailed {
                failed: summary.failed,
                total: report.order().len(),
                report: Box::new(report),
            });
        }
        Ok(report)
    }

    fn lock(&self, stack: &StackKey) -> Result<StateLock> {
        self.store.lock(stack).map_err(|e| Error::Lock {
            stack: stack.to_string(),
            message: format!("{e:#}"),
        })
    }

    fn load(&self, stack: &StackKey) -> Result<Vec<Resource>> {
        self.store.load(stack).map_err(|e| Error::StateLoad {
            stack: stack.to_string(),
            message: format!("{e:#}"),
        })
    }

    fn plan_with(&self, op: &Operation, prior: &[Resource]) -> Result<ExecutionPlan> {
        let mut ignored: Vec<FieldPath> = self.config.ignored_fields.clone();
        for field in &op.options.ignored_fields {
            if !ignored.contains(field) {
                ignored.push(field.clone());
            }
        }
        planner::plan(op.mode, &op.desired, prior, &ignored, &self.resolver)
    }

    /// Every step that needs a runtime call must have one
    fn check_runtimes(&self, plan: &ExecutionPlan) -> Result<()> {
        for step in plan.order.iter().filter(|s| s.action.is_change()) {
            let resource = if step.action == ActionType::Delete {
                plan.prior.get(&step.id)
            } else {
                plan.desired.get(&step.id)
            };
            if let Some(resource) = resource {
                self.runtimes.require(resource)?;
            }
        }
        Ok(())
    }

    /// Re-record unchanged resources whose dependency edges moved
    ///
    /// Attributes stay as recorded. A failed save fails that step only.
    fn refresh_dependencies(&self, op: &Operation, plan: &mut ExecutionPlan) {
        let stale: Vec<Resource> = plan
            .order
            .iter()
            .filter(|step| step.action == ActionType::UnChanged)
            .filter_map(|step| {
                let recorded = plan.prior.get(&step.id)?;
                let deps = plan.recorded_dependencies(&step.id);
                let current: BTreeSet<&String> = recorded.depends_on.iter().collect();
                let wanted: BTreeSet<&String> = deps.iter().collect();
                (current != wanted).then(|| Resource {
                    depends_on: deps,
                    ..recorded.clone()
                })
            })
            .collect();

        for record in stale {
            let id = record.id.clone();
            match self.store.save(&op.stack, &record) {
                Ok(()) => {
                    log::debug!("Re-recorded dependencies of {id}: {:?}", record.depends_on);
                    plan.prior.insert(id, record);
                }
                Err(e) => {
                    if let Some(step) = plan.order.get_mut(&id) {
                        step.fail(format!("failed to save state of {id}: {e:#}"));
                    }
                }
            }
        }
    }

    /// Walk the levels; returns whether the run was cancelled
    fn execute<P: ProgressCallback>(
        &self,
        op: &Operation,
        plan: &mut ExecutionPlan,
        progress: &mut P,
    ) -> Result<bool> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(op.options.concurrency_or(self.config.concurrency))
            .build()?;

        // Outputs visible to reference substitution: recorded attributes,
        // overwritten by each level's results
        let mut outputs: BTreeMap<String, Attributes> = plan
            .prior
            .iter()
            .map(|(id, r)| (id.clone(), r.attributes.clone()))
            .collect();

        let levels = plan.order.levels().to_vec();
        let mut cancelled = false;

        for (index, level) in levels.iter().enumerate() {
            if op.cancel.is_cancelled() {
                log::warn!("{} of {} cancelled before level {index}", op.mode, op.stack);
                cancelled = true;
                skip_unfinished(&mut plan.order, "operation cancelled");
                break;
            }

            let mut work: Vec<String> = Vec::new();
            for id in level {
                let Some(step) = plan.order.get_mut(id) else {
                    continue;
                };
                if step.status != StepStatus::Pending {
                    continue;
                }
                if step.action == ActionType::UnChanged {
                    step.status = StepStatus::Succeeded;
                    progress.on_step_complete(step);
                    continue;
                }
                step.status = StepStatus::Running;
                work.push(id.clone());
            }
            if work.is_empty() {
                continue;
            }

            progress.on_level_start(op.mode, index, work.len());
            let outcomes = self.run_level(&pool, op, plan, &outputs, &work);

            let mut failed: Vec<(String, String)> = Vec::new();
            for outcome in outcomes {
                let Some(step) = plan.order.get_mut(&outcome.id) else {
                    continue;
                };
                match outcome.result {
                    StepResult::Applied(attributes) => {
                        outputs.insert(outcome.id.clone(), attributes.clone());
                        step.succeed(Some(attributes));
                    }
                    StepResult::Deleted { observed } => {
                        if observed.is_some() {
                            step.before = observed;
                        }
                        outputs.remove(&outcome.id);
                        step.succeed(None);
                    }
                    StepResult::Failed(message) => {
                        step.fail(message.clone());
                        failed.push((outcome.id.clone(), message));
                    }
                    StepResult::NotStarted => {
                        step.skip("operation cancelled");
                        cancelled = true;
                    }
                }
                progress.on_step_complete(step);
            }

            if op.mode == Mode::Preview {
                if let Some((resource, message)) = failed.into_iter().next() {
                    log::warn!("Preview of {} failed at {resource}", op.stack);
                    return Err(Error::PreviewFailed { resource, message });
                }
            } else {
                for (id, _) in &failed {
                    for descendant in plan.graph.descendants(id) {
                        if let Some(step) = plan.order.get_mut(&descendant) {
                            if step.status == StepStatus::Pending {
                                step.skip(format!("dependency {id} failed"));
                                progress.on_step_complete(step);
                            }
                        }
                    }
                }
            }

            progress.on_level_complete(index);
        }

        Ok(cancelled)
    }

    /// Dispatch one level to the pool and wait for all of it
    fn run_level(
        &self,
        pool: &rayon::ThreadPool,
        op: &Operation,
        plan: &ExecutionPlan,
        outputs: &BTreeMap<String, Attributes>,
        work: &[String],
    ) -> Vec<StepOutcome> {
        let results: Mutex<Vec<StepOutcome>> = Mutex::new(Vec::with_capacity(work.len()));

        pool.install(|| {
            work.par_iter().for_each(|id| {
                let result = if op.cancel.is_cancelled() {
                    StepResult::NotStarted
                } else {
                    self.execute_step(op, plan, outputs, id)
                };
                push_outcome(
                    &results,
                    StepOutcome {
                        id: id.clone(),
                        result,
                    },
                );
            });
        });

        let mut outcomes = into_outcomes(results);
        outcomes.sort_by(|a, b| a.id.cmp(&b.id));
        outcomes
    }

    fn execute_step(
        &self,
        op: &Operation,
        plan: &ExecutionPlan,
        outputs: &BTreeMap<String, Attributes>,
        id: &str,
    ) -> StepResult {
        let Some(step) = plan.order.get(id) else {
            return StepResult::Failed(format!("{id} is not part of the plan"));
        };
        let result = match step.action {
            ActionType::Create | ActionType::Update => self.apply_step(op, plan, outputs, id),
            ActionType::Delete => self.delete_step(op, plan, id),
            ActionType::UnChanged => Ok(StepResult::Applied(step.after.clone().unwrap_or_default())),
        };
        result.unwrap_or_else(|e| {
            log::debug!("{} {id} failed: {e:#}", step.action);
            StepResult::Failed(format!("{e:#}"))
        })
    }

    fn apply_step(
        &self,
        op: &Operation,
        plan: &ExecutionPlan,
        outputs: &BTreeMap<String, Attributes>,
        id: &str,
    ) -> anyhow::Result<StepResult> {
        let desired = plan
            .desired
            .get(id)
            .with_context(|| format!("{id} is not in the desired set"))?;
        let dry_run = op.mode.is_dry_run();

        let planned = match plan.references.get(id) {
            Some(refs) => {
                let substitution = if dry_run {
                    Substitution::Lenient
                } else {
                    Substitution::Strict
                };
                let attributes = self.resolver.substitute(
                    &desired.attributes,
                    refs,
                    |target| outputs.get(target),
                    substitution,
                )?;
                Resource {
                    attributes,
                    ..desired.clone()
                }
            }
            None => desired.clone(),
        };

        let runtime = self.runtimes.require(&planned)?;
        let request = ApplyRequest {
            planned: &planned,
            prior: plan.prior.get(id),
            dry_run,
            provider: self.config.provider_for(&planned),
        };
        let live = runtime.apply(&request)?;

        if !dry_run {
            let record = Resource {
                attributes: live.clone(),
                depends_on: plan.recorded_dependencies(id),
                ..planned
            };
            self.store
                .save(&op.stack, &record)
                .with_context(|| format!("failed to save state of {id}"))?;
            log::debug!("Saved {id} to state of {}", op.stack);
        }
        Ok(StepResult::Applied(live))
    }

    fn delete_step(&self, op: &Operation, plan: &ExecutionPlan, id: &str) -> anyhow::Result<StepResult> {
        let recorded = plan
            .prior
            .get(id)
            .with_context(|| format!("{id} has no recorded state"))?;
        let runtime = self.runtimes.require(recorded)?;
        let provider = self.config.provider_for(recorded);

        if op.mode.is_dry_run() {
            let observed = runtime.read(recorded, provider)?;
            if observed.is_none() {
                log::info!("{id} is already gone");
            }
            return Ok(StepResult::Deleted { observed });
        }

        runtime.delete(recorded, provider)?;
        self.store
            .remove(&op.stack, id)
            .with_context(|| format!("failed to remove {id} from state"))?;
        Ok(StepResult::Deleted { observed: None })
    }
}

fn succeed_unchanged(order: &mut ChangeOrder) {
    let ids = order.step_keys().to_vec();
    for id in ids {
        if let Some(step) = order.get_mut(&id) {
            if step.status == StepStatus::Pending {
                step.status = StepStatus::Succeeded;
            }
        }
    }
}

fn skip_unfinished(order: &mut ChangeOrder, reason: &str) {
    let ids = order.step_keys().to_vec();
    for id in ids {
        if let Some(step) = order.get_mut(&id) {
            if !step.status.is_finished() {
                step.skip(reason);
            }
        }
    }
}

fn push_outcome(results: &Mutex<Vec<StepOutcome>>, outcome: StepOutcome) {
    match results.lock() {
        Ok(mut locked) => locked.push(outcome),
        Err(poisoned) => poisoned.into_inner().push(outcome),
    }
}

fn into_outcomes(results: Mutex<Vec<StepOutcome>>) -> Vec<StepOutcome> {
    match results.into_inner() {
        Ok(collected) => collected,
        Err(poisoned) => poisoned.into_inner(),
    }
}
