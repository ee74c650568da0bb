//! Dependency graph and execution levels
//!
//! Levels come from Kahn's algorithm: each round takes every node whose
//! dependencies are all placed, sorted by ID, as one level. Nodes within
//! a level have no edges between them and may run concurrently.

use crate::error::{Error, Result};
use crate::resource::Resource;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Directed acyclic graph over resource IDs
///
/// An edge `(dependent, dependency)` means `dependency` must be
/// materialised before `dependent`.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: BTreeSet<String>,
    dependencies: BTreeMap<String, BTreeSet<String>>,
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl Graph {
    /// Build a graph; every edge endpoint must be a node
    pub fn new<N, E>(nodes: N, edges: E) -> Result<Self>
    where
        N: IntoIterator<Item = String>,
        E: IntoIterator<Item = (String, String)>,
    {
        let mut graph = Self {
            nodes: nodes.into_iter().collect(),
            ..Self::default()
        };
        for (dependent, dependency) in edges {
            if !graph.nodes.contains(&dependent) || !graph.nodes.contains(&dependency) {
                return Err(Error::UnknownDependency {
                    resource: dependent,
                    dependency,
                });
            }
            graph.add_edge(dependent, dependency);
        }
        Ok(graph)
    }

    /// Graph of a resource set: explicit `depends_on` plus `extra` edges
    pub fn from_resources(resources: &[Resource], extra: Vec<(String, String)>) -> Result<Self> {
        let explicit = resources.iter().flat_map(|r| {
            r.depends_on
                .iter()
                .map(move |dependency| (r.id.clone(), dependency.clone()))
        });
        Self::new(
            resources.iter().map(|r| r.id.clone()),
            explicit.chain(extra),
        )
    }

    fn add_edge(&mut self, dependent: String, dependency: String) {
        self.dependents
            .entry(dependency.clone())
            .or_default()
            .insert(dependent.clone());
        self.dependencies
            .entry(dependent)
            .or_default()
            .insert(dependency);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    /// Direct dependencies of `id`
    pub fn dependencies(&self, id: &str) -> impl Iterator<Item = &str> {
        self.dependencies
            .get(id)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Direct dependents of `id`
    pub fn dependents(&self, id: &str) -> impl Iterator<Item = &str> {
        self.dependents
            .get(id)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// All edges as `(dependent, dependency)`
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.dependencies
            .iter()
            .flat_map(|(dependent, deps)| deps.iter().map(move |d| (dependent.as_str(), d.as_str())))
            .collect()
    }

    /// The same nodes with every edge flipped
    ///
    /// Used for teardown, where dependents must go first.
    pub fn reversed(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
            dependencies: self.dependents.clone(),
            dependents: self.dependencies.clone(),
        }
    }

    /// Everything that transitively depends on `id`
    pub fn descendants(&self, id: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = self.dependents(id).collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next.to_string()) {
                queue.extend(self.dependents(next));
            }
        }
        seen
    }

    /// Execution levels, each sorted by ID
    ///
    /// Flattening the levels gives a total order respecting every edge.
    pub fn levels(&self) -> Result<Vec<Vec<String>>> {
        let mut in_degree: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.as_str(), self.dependencies.get(n).map_or(0, BTreeSet::len)))
            .collect();

        let mut frontier: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(node, _)| *node)
            .collect();

        let mut levels = Vec::new();
        let mut placed = 0;
        while !frontier.is_empty() {
            let mut next = BTreeSet::new();
            for node in &frontier {
                for dependent in self.dependents(node) {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.insert(dependent);
                        }
                    }
                }
            }
            placed += frontier.len();
            levels.push(frontier.iter().map(|n| (*n).to_string()).collect());
            frontier = next;
        }

        if placed < self.nodes.len() {
            let remaining: BTreeSet<&str> = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(node, _)| node)
                .collect();
            return Err(Error::Cycle {
                path: self.find_cycle(&remaining),
            });
        }

        Ok(levels)
    }

    /// Walk unplaced dependencies until a node repeats
    ///
    /// Every unplaced node has at least one unplaced dependency, so the
    /// walk always closes a loop.
    fn find_cycle(&self, remaining: &BTreeSet<&str>) -> Vec<String> {
        let Some(&start) = remaining.iter().next() else {
            return Vec::new();
        };
        let mut path: Vec<&str> = Vec::new();
        let mut position: HashMap<&str, usize> = HashMap::new();
        let mut current = start;
        loop {
            if let Some(&index) = position.get(current) {
                let mut cycle: Vec<String> = path[index..].iter().map(|n| (*n).to_string()).collect();
                cycle.push(current.to_string());
                return cycle;
            }
            position.insert(current, path.len());
            path.push(current);
            match self.dependencies(current).find(|d| remaining.contains(d)) {
                Some(next) => current = next,
                None => return path.iter().map(|n| (*n).to_string()).collect(),
            }
        }
    }
}
