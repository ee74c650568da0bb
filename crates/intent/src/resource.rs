//! Resource model
//!
//! A [`Resource`] is one addressable unit of desired or recorded
//! configuration. Its `id` is unique within a desired set and within a
//! recorded state; the `resource_type` selects the runtime that
//! materialises it.

use crate::error::{Error, Result};
use crate::value::{Attributes, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Extension key naming the provider configuration a resource uses
pub const PROVIDER_EXTENSION: &str = "provider";

/// Runtime discriminator of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    /// Objects managed by a Kubernetes cluster
    Kubernetes,
    /// Cloud resources provisioned through Terraform providers
    Terraform,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kubernetes => "Kubernetes",
            Self::Terraform => "Terraform",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A desired or recorded resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Globally unique address, e.g. `v1:Service:default:web`
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    /// Comparable desired configuration
    #[serde(default)]
    pub attributes: Attributes,
    /// Resources that must be materialised before this one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Runtime metadata that is not part of the comparable configuration
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, Value>,
}

impl Resource {
    pub fn new(id: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            id: id.into(),
            resource_type,
            attributes: Attributes::new(),
            depends_on: Vec::new(),
            extensions: BTreeMap::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Add an explicit dependency, ignoring duplicates
    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !self.depends_on.contains(&id) {
            self.depends_on.push(id);
        }
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    /// Name of the provider configuration selected in `extensions`
    pub fn provider(&self) -> Option<&str> {
        self.extensions.get(PROVIDER_EXTENSION).and_then(Value::as_str)
    }
}

/// The flat desired resource list of one stack
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl Intent {
    pub fn new(resources: Vec<Resource>) -> Self {
        Self { resources }
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// ID of a Kubernetes object: `apiVersion:Kind:Namespace:Name`
///
/// Cluster-scoped objects have no namespace segment.
pub fn kubernetes_resource_id(api_version: &str, kind: &str, namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        format!("{api_version}:{kind}:{name}")
    } else {
        format!("{api_version}:{kind}:{namespace}:{name}")
    }
}

/// ID of a Terraform resource: `providerNamespace:providerName:resourceType:resourceName`
pub fn terraform_resource_id(
    provider_namespace: &str,
    provider_name: &str,
    resource_type: &str,
    resource_name: &str,
) -> String {
    format!("{provider_namespace}:{provider_name}:{resource_type}:{resource_name}")
}

/// Reject empty and duplicate IDs
pub fn validate_ids(resources: &[Resource]) -> Result<()> {
    let mut seen = HashSet::with_capacity(resources.len());
    for (index, resource) in resources.iter().enumerate() {
        if resource.id.is_empty() {
            return Err(Error::EmptyId { index });
        }
        if !seen.insert(resource.id.as_str()) {
            return Err(Error::DuplicateId {
                id: resource.id.clone(),
            });
        }
    }
    Ok(())
}
