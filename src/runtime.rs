//! Runtime boundary
//!
//! A runtime materialises resources of one [`ResourceType`]. The engine
//! never inspects attributes on a runtime's behalf; it hands over the
//! planned resource with every reference substituted and records what
//! comes back.

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use intent::{Attributes, Resource, ResourceType};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Input of one create/update call
#[derive(Debug, Clone, Copy)]
pub struct ApplyRequest<'a> {
    /// Desired resource, references already substituted
    pub planned: &'a Resource,
    /// Recorded resource, `None` on create
    pub prior: Option<&'a Resource>,
    /// Simulate only: predict the resulting attributes without side effects
    pub dry_run: bool,
    /// Provider settings selected by the resource
    pub provider: Option<&'a ProviderConfig>,
}

/// Materialises resources of one type
///
/// Implementations are shared across worker threads. The engine never
/// calls them twice at once for the same resource.
pub trait Runtime: Send + Sync {
    /// Create or update a resource and return its live attributes
    ///
    /// With `dry_run` set, return the predicted attributes instead; values
    /// that are only known after a real apply may be echoed back unresolved.
    fn apply(&self, request: &ApplyRequest<'_>) -> anyhow::Result<Attributes>;

    /// Live attributes of a resource, `None` if it no longer exists
    fn read(
        &self,
        resource: &Resource,
        provider: Option<&ProviderConfig>,
    ) -> anyhow::Result<Option<Attributes>>;

    /// Delete a resource; deleting an absent resource succeeds
    fn delete(&self, resource: &Resource, provider: Option<&ProviderConfig>) -> anyhow::Result<()>;
}

/// Runtimes keyed by the resource type they serve
#[derive(Clone, Default)]
pub struct RuntimeRegistry {
    runtimes: HashMap<ResourceType, Arc<dyn Runtime>>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `runtime` for `resource_type`, replacing any previous one
    pub fn register(mut self, resource_type: ResourceType, runtime: Arc<dyn Runtime>) -> Self {
        self.runtimes.insert(resource_type, runtime);
        self
    }

    pub fn get(&self, resource_type: ResourceType) -> Option<&dyn Runtime> {
        self.runtimes.get(&resource_type).map(AsRef::as_ref)
    }

    /// Runtime for a resource, or a validation error naming it
    pub fn require(&self, resource: &Resource) -> Result<&dyn Runtime> {
        self.get(resource.resource_type)
            .ok_or_else(|| Error::RuntimeNotFound {
                resource_type: resource.resource_type,
                resource: resource.id.clone(),
            })
    }

    pub fn contains(&self, resource_type: ResourceType) -> bool {
        self.runtimes.contains_key(&resource_type)
    }
}

impl fmt::Debug for RuntimeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&ResourceType> = self.runtimes.keys().collect();
        types.sort();
        f.debug_struct("RuntimeRegistry").field("types", &types).finish()
    }
}
