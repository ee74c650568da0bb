//! Execution planning
//!
//! Turns a desired set and the recorded state into a [`ChangeOrder`] laid
//! out along dependency levels. Every validation error surfaces here,
//! before a single runtime call.

use intent::{
    Attributes, FieldPath, Graph, ReferenceIndex, ReferenceResolver, Resource, Substitution,
    Value, validate_ids,
};
use std::collections::{BTreeMap, BTreeSet};

use super::differ::{self, ChangeOrder};
use super::operation::Mode;
use crate::error::Result;

/// A validated, levelled change order ready for execution
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub mode: Mode,
    pub order: ChangeOrder,
    /// Edges along which a failure skips later steps
    pub graph: Graph,
    pub references: ReferenceIndex,
    pub desired: BTreeMap<String, Resource>,
    pub prior: BTreeMap<String, Resource>,
}

impl ExecutionPlan {
    pub fn levels(&self) -> &[Vec<String>] {
        self.order.levels()
    }

    /// Dependencies to record for a resource: explicit plus implicit, sorted
    pub fn recorded_dependencies(&self, id: &str) -> Vec<String> {
        let mut deps: BTreeSet<String> = self
            .desired
            .get(id)
            .map(|r| r.depends_on.iter().cloned().collect())
            .unwrap_or_default();
        if let Some(refs) = self.references.get(id) {
            deps.extend(refs.targets().into_iter().map(str::to_string));
        }
        deps.into_iter().collect()
    }
}

/// Build the execution plan of one operation
pub fn plan(
    mode: Mode,
    desired: &[Resource],
    prior: &[Resource],
    ignored: &[FieldPath],
    resolver: &ReferenceResolver,
) -> Result<ExecutionPlan> {
    validate_ids(desired)?;
    validate_ids(prior)?;

    let references = resolver.resolve_all(desired)?;
    let forward = Graph::from_resources(desired, references.edges())?;
    let forward_levels = forward.levels()?;

    let prior_by_id: BTreeMap<String, Resource> =
        prior.iter().map(|r| (r.id.clone(), r.clone())).collect();

    let (mut order, graph, levels) = match mode {
        Mode::Preview | Mode::Apply => {
            let normalized = normalize(desired, &forward_levels, &references, &prior_by_id, resolver)?;
            let order = differ::diff(&normalized, prior, ignored);

            let desired_ids: BTreeSet<&str> = desired.iter().map(|r| r.id.as_str()).collect();
            let orphans: BTreeSet<String> = prior
                .iter()
                .filter(|r| !desired_ids.contains(r.id.as_str()))
                .map(|r| r.id.clone())
                .collect();
            let teardown = recorded_graph(prior, &orphans, &[])?.reversed();

            let mut levels = forward_levels;
            levels.extend(teardown.levels()?);

            let edges = forward
                .edges()
                .into_iter()
                .chain(teardown.edges())
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect::<Vec<_>>();
            let nodes = forward.nodes().chain(teardown.nodes()).map(str::to_string).collect::<Vec<_>>();
            (order, Graph::new(nodes, edges)?, levels)
        }
        Mode::Destroy => {
            let order = differ::diff(&[], prior, ignored);
            let ids: BTreeSet<String> = prior_by_id.keys().cloned().collect();
            let extra: Vec<(String, String)> = forward
                .edges()
                .into_iter()
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect();
            let graph = recorded_graph(prior, &ids, &extra)?.reversed();
            let levels = graph.levels()?;
            (order, graph, levels)
        }
    };

    order.set_levels(levels);
    log::debug!(
        "{mode} plan: {} step(s) in {} level(s)",
        order.len(),
        order.levels().len()
    );

    Ok(ExecutionPlan {
        mode,
        order,
        graph,
        references,
        desired: desired.iter().map(|r| (r.id.clone(), r.clone())).collect(),
        prior: prior_by_id,
    })
}

/// Substitute references with the best value known before execution
///
/// A target's known output is its recorded attributes overlaid with its
/// own desired (normalised) attributes, so an unchanged reference compares
/// equal to what it resolved to last time while a changed input shows up
/// in every dependent. Placeholders with no known value stay as written.
fn normalize(
    desired: &[Resource],
    levels: &[Vec<String>],
    references: &ReferenceIndex,
    prior: &BTreeMap<String, Resource>,
    resolver: &ReferenceResolver,
) -> Result<Vec<Resource>> {
    let by_id: BTreeMap<&str, &Resource> = desired.iter().map(|r| (r.id.as_str(), r)).collect();
    let mut known: BTreeMap<String, Attributes> = prior
        .iter()
        .map(|(id, r)| (id.clone(), r.attributes.clone()))
        .collect();

    let mut normalized = Vec::with_capacity(desired.len());
    for id in levels.iter().flatten() {
        let Some(resource) = by_id.get(id.as_str()) else {
            continue;
        };
        let attributes = match references.get(id) {
            Some(refs) => resolver.substitute(
                &resource.attributes,
                refs,
                |target| known.get(target),
                Substitution::Lenient,
            )?,
            None => resource.attributes.clone(),
        };
        overlay(known.entry(id.clone()).or_default(), &attributes);
        normalized.push(Resource {
            attributes,
            ..(*resource).clone()
        });
    }
    Ok(normalized)
}

/// Deep-merge `top` into `base`; maps merge, everything else replaces
fn overlay(base: &mut Attributes, top: &Attributes) {
    for (key, value) in top {
        match (base.get_mut(key), value) {
            (Some(Value::Map(existing)), Value::Map(incoming)) => overlay(existing, incoming),
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Dependency graph of recorded resources restricted to `ids`
///
/// Recorded edges to resources outside `ids` are dropped; state written
/// by a partially failed apply may point at records that never existed.
fn recorded_graph(
    prior: &[Resource],
    ids: &BTreeSet<String>,
    extra: &[(String, String)],
) -> Result<Graph> {
    let recorded = prior
        .iter()
        .filter(|r| ids.contains(&r.id))
        .flat_map(|r| r.depends_on.iter().map(move |d| (r.id.clone(), d.clone())));
    let edges: Vec<(String, String)> = recorded
        .chain(extra.iter().cloned())
        .filter(|(a, b)| ids.contains(a) && ids.contains(b))
        .collect();
    Ok(Graph::new(ids.iter().cloned(), edges)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::differ::ActionType;
    use crate::error::Error;
    use intent::{ResourceType, Value, attributes_from_json};
    use serde_json::json;

    fn res(id: &str, attrs: serde_json::Value) -> Resource {
        Resource::new(id, ResourceType::Terraform).with_attributes(attributes_from_json(attrs))
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    fn plan_for(mode: Mode, desired: &[Resource], prior: &[Resource]) -> Result<ExecutionPlan> {
        plan(mode, desired, prior, &[], &ReferenceResolver::default())
    }

    #[test]
    fn test_implicit_reference_orders_levels() {
        let desired = vec![
            res("secret", json!({"length": 16})),
            res("db", json!({"password": "$kusion_path.secret.result"})),
        ];
        let plan = plan_for(Mode::Apply, &desired, &[]).unwrap();
        assert_eq!(plan.levels(), [ids(&["secret"]), ids(&["db"])]);
        assert_eq!(plan.order.step_keys(), ["secret", "db"]);
        assert_eq!(plan.recorded_dependencies("db"), ids(&["secret"]));
    }

    #[test]
    fn test_dangling_reference_is_rejected() {
        let desired = vec![res("db", json!({"password": "$kusion_path.missing.result"}))];
        let err = plan_for(Mode::Apply, &desired, &[]).unwrap_err();
        assert!(matches!(err, Error::Validation(intent::Error::DanglingReference { .. })));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let desired = vec![
            res("a", json!({"x": "$kusion_path.b.x"})),
            res("b", json!({})).with_dependency("a"),
        ];
        let err = plan_for(Mode::Preview, &desired, &[]).unwrap_err();
        assert!(matches!(err, Error::Validation(intent::Error::Cycle { .. })));
    }

    #[test]
    fn test_duplicate_prior_id_is_rejected() {
        let prior = vec![res("a", json!({})), res("a", json!({}))];
        assert!(plan_for(Mode::Destroy, &[], &prior).unwrap_err().is_validation());
    }

    #[test]
    fn test_unchanged_reference_is_normalised() {
        let prior = vec![
            res("secret", json!({"length": 16, "result": "s3cr3t"})),
            res("db", json!({"password": "s3cr3t"})),
        ];
        let desired = vec![
            res("secret", json!({"length": 16, "result": "s3cr3t"})),
            res("db", json!({"password": "$kusion_path.secret.result"})),
        ];
        let plan = plan_for(Mode::Preview, &desired, &prior).unwrap();
        assert_eq!(plan.order.get("db").unwrap().action, ActionType::UnChanged);
        assert!(!plan.order.has_changes());
    }

    #[test]
    fn test_reference_to_new_resource_stays_a_placeholder() {
        let desired = vec![
            res("secret", json!({"length": 16})),
            res("db", json!({"password": "$kusion_path.secret.result"})),
        ];
        let plan = plan_for(Mode::Preview, &desired, &[]).unwrap();
        let after = plan.order.get("db").unwrap().after.clone().unwrap();
        assert_eq!(after["password"], Value::from("$kusion_path.secret.result"));
    }

    #[test]
    fn test_changed_input_reaches_dependents() {
        let prior = vec![
            res("net", json!({"cidr": "10.0.0.0/16", "id": "vpc-1"})),
            res("db", json!({"subnet": "10.0.0.0/16", "vpc": "vpc-1"})),
        ];
        let desired = vec![
            res("net", json!({"cidr": "10.1.0.0/16"})),
            res("db", json!({"subnet": "$kusion_path.net.cidr", "vpc": "$kusion_path.net.id"})),
        ];
        let plan = plan_for(Mode::Preview, &desired, &prior).unwrap();
        let db = plan.order.get("db").unwrap();
        assert_eq!(db.action, ActionType::Update);
        assert_eq!(db.diffs.len(), 1);
        assert_eq!(db.diffs[0].path.to_string(), "subnet");
    }

    #[test]
    fn test_orphans_are_deleted_last_dependents_first() {
        let desired = vec![res("web", json!({}))];
        let prior = vec![
            res("web", json!({})),
            res("net", json!({})),
            res("db", json!({})).with_dependency("net"),
            res("app", json!({})).with_dependency("db"),
        ];
        let plan = plan_for(Mode::Apply, &desired, &prior).unwrap();
        assert_eq!(
            plan.levels(),
            [ids(&["web"]), ids(&["app"]), ids(&["db"]), ids(&["net"])]
        );
        assert_eq!(plan.order.get("net").unwrap().action, ActionType::Delete);
        let skipped: Vec<String> = plan.graph.descendants("app").into_iter().collect();
        assert_eq!(skipped, ids(&["db", "net"]));
    }

    #[test]
    fn test_destroy_reverses_recorded_dependencies() {
        let prior = vec![
            res("net", json!({})),
            res("db", json!({})).with_dependency("net"),
            res("cache", json!({})).with_dependency("net"),
            res("app", json!({})).with_dependency("db").with_dependency("ghost"),
        ];
        let plan = plan_for(Mode::Destroy, &[], &prior).unwrap();
        assert_eq!(
            plan.levels(),
            [ids(&["app", "cache"]), ids(&["db"]), ids(&["net"])]
        );
        assert!(plan.order.iter().all(|s| s.action == ActionType::Delete));
    }

    #[test]
    fn test_destroy_uses_desired_edges_between_recorded_ids() {
        let prior = vec![res("secret", json!({})), res("db", json!({}))];
        let desired = vec![
            res("secret", json!({})),
            res("db", json!({"password": "$kusion_path.secret.result"})),
        ];
        let plan = plan_for(Mode::Destroy, &desired, &prior).unwrap();
        assert_eq!(plan.levels(), [ids(&["db"]), ids(&["secret"])]);
    }
}
