//! Implicit reference resolution
//!
//! A string attribute of the exact form `<marker>.<ResourceID>.<path>`
//! means "the value at `path` in the materialised output of `ResourceID`".
//! Such a reference is a dependency edge as strong as `dependsOn`, and the
//! placeholder is substituted once the target has been applied.
//!
//! Scanning is a pure, total function over the attribute tree; it never
//! looks at anything but the desired set, so cycles and dangling targets
//! are caught before any side effect.

use crate::error::{Error, Result};
use crate::resource::Resource;
use crate::value::{Attributes, FieldPath, Value, get_attribute};
use std::collections::{BTreeMap, BTreeSet};

/// Marker used when no other is configured
pub const DEFAULT_MARKER: &str = "$kusion_path";

/// One placeholder found inside a resource's attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSite {
    /// Where the placeholder sits in the referring resource
    pub location: FieldPath,
    /// ID of the referenced resource
    pub target: String,
    /// Attribute path inside the referenced resource's output
    pub path: FieldPath,
    /// The placeholder text as written
    pub raw: String,
}

/// All references made by one resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceReferences {
    pub resource: String,
    pub sites: Vec<ReferenceSite>,
}

impl ResourceReferences {
    /// Referenced IDs; several references to one target collapse into one
    pub fn targets(&self) -> BTreeSet<&str> {
        self.sites.iter().map(|s| s.target.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

/// References of a whole desired set, keyed by referring resource ID
#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    by_resource: BTreeMap<String, ResourceReferences>,
}

impl ReferenceIndex {
    pub fn get(&self, id: &str) -> Option<&ResourceReferences> {
        self.by_resource.get(id)
    }

    /// Dependency edges as `(dependent, dependency)` pairs, one per target
    pub fn edges(&self) -> Vec<(String, String)> {
        self.by_resource
            .values()
            .flat_map(|refs| {
                refs.targets()
                    .into_iter()
                    .map(|target| (refs.resource.clone(), target.to_string()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_resource.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_resource.is_empty()
    }
}

/// How a missing target output is handled during substitution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Substitution {
    /// A missing output is an error (apply time)
    Strict,
    /// A missing output leaves the placeholder in place (preview, diffing)
    Lenient,
}

/// Finds and substitutes implicit references
#[derive(Debug, Clone)]
pub struct ReferenceResolver {
    prefix: String,
}

impl Default for ReferenceResolver {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER)
    }
}

impl ReferenceResolver {
    pub fn new(marker: &str) -> Self {
        Self {
            prefix: format!("{marker}."),
        }
    }

    /// Marker without the trailing dot
    pub fn marker(&self) -> &str {
        self.prefix.trim_end_matches('.')
    }

    pub fn is_reference(&self, s: &str) -> bool {
        s.starts_with(&self.prefix)
    }

    /// Split a placeholder into target ID and attribute path
    ///
    /// IDs may contain dots, so the longest known ID followed by a `.` wins.
    fn parse(
        &self,
        resource: &str,
        raw: &str,
        known_ids: &BTreeSet<String>,
    ) -> Result<(String, FieldPath)> {
        let dangling = || Error::DanglingReference {
            resource: resource.to_string(),
            reference: raw.to_string(),
        };
        let rest = raw.strip_prefix(&self.prefix).ok_or_else(dangling)?;

        for (pos, _) in rest.rmatch_indices('.') {
            let (candidate, path) = (&rest[..pos], &rest[pos + 1..]);
            if path.is_empty() || !known_ids.contains(candidate) {
                continue;
            }
            let path = FieldPath::parse(path).map_err(|_| dangling())?;
            return Ok((candidate.to_string(), path));
        }
        Err(dangling())
    }

    /// Collect every reference in one resource's attributes
    pub fn scan(
        &self,
        resource: &Resource,
        known_ids: &BTreeSet<String>,
    ) -> Result<ResourceReferences> {
        let mut sites = Vec::new();
        for (key, value) in &resource.attributes {
            self.walk(
                &resource.id,
                value,
                &FieldPath::root().child(key.as_str()),
                known_ids,
                &mut sites,
            )?;
        }
        Ok(ResourceReferences {
            resource: resource.id.clone(),
            sites,
        })
    }

    fn walk(
        &self,
        resource: &str,
        value: &Value,
        location: &FieldPath,
        known_ids: &BTreeSet<String>,
        sites: &mut Vec<ReferenceSite>,
    ) -> Result<()> {
        match value {
            Value::String(s) if self.is_reference(s) => {
                let (target, path) = self.parse(resource, s, known_ids)?;
                sites.push(ReferenceSite {
                    location: location.clone(),
                    target,
                    path,
                    raw: s.clone(),
                });
            }
            Value::Map(map) => {
                for (key, child) in map {
                    self.walk(resource, child, &location.child(key.as_str()), known_ids, sites)?;
                }
            }
            Value::Sequence(items) => {
                for (index, child) in items.iter().enumerate() {
                    self.walk(resource, child, &location.child(index.to_string()), known_ids, sites)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Scan a whole desired set
    ///
    /// Resources are visited in ascending ID order so the first dangling
    /// reference reported is stable.
    pub fn resolve_all(&self, resources: &[Resource]) -> Result<ReferenceIndex> {
        let known_ids: BTreeSet<String> = resources.iter().map(|r| r.id.clone()).collect();
        let mut ordered: Vec<&Resource> = resources.iter().collect();
        ordered.sort_by(|a, b| a.id.cmp(&b.id));

        let mut by_resource = BTreeMap::new();
        for resource in ordered {
            let refs = self.scan(resource, &known_ids)?;
            if !refs.is_empty() {
                log::debug!(
                    "{} references {} resource(s)",
                    resource.id,
                    refs.targets().len()
                );
                by_resource.insert(resource.id.clone(), refs);
            }
        }
        Ok(ReferenceIndex { by_resource })
    }

    /// Replace placeholders with the values found in their targets' outputs
    pub fn substitute<'a, F>(
        &self,
        attributes: &Attributes,
        refs: &ResourceReferences,
        lookup: F,
        mode: Substitution,
    ) -> Result<Attributes>
    where
        F: Fn(&str) -> Option<&'a Attributes>,
    {
        let mut root = Value::Map(attributes.clone());
        for site in &refs.sites {
            let resolved = lookup(site.target.as_str()).and_then(|output| get_attribute(output, &site.path));
            match (resolved, mode) {
                (Some(value), _) => {
                    root.set_path(&site.location, value.clone());
                }
                (None, Substitution::Lenient) => {}
                (None, Substitution::Strict) => {
                    return Err(Error::UnresolvedReference {
                        resource: refs.resource.clone(),
                        reference: site.raw.clone(),
                        target: site.target.clone(),
                        path: site.path.to_string(),
                    });
                }
            }
        }
        match root {
            Value::Map(map) => Ok(map),
            _ => Ok(attributes.clone()),
        }
    }
}
