use crate::engine::OperationOptions;
use crate::engine::operation::DEFAULT_CONCURRENCY;
use crate::error::{Error, Result};
use intent::{DEFAULT_MARKER, FieldPath, ReferenceResolver, Resource, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

// ============================================================================
// Engine Config
// ============================================================================

/// Engine-wide settings
///
/// Provider endpoints and versions live here instead of in process
/// environment variables; runtimes receive the entry a resource selects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of runtime calls in flight
    pub concurrency: usize,
    /// Attribute paths excluded from diffing
    pub ignored_fields: Vec<FieldPath>,
    /// Marker that starts an implicit reference
    pub reference_marker: String,
    /// Provider settings keyed by the name resources use in `extensions.provider`
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            ignored_fields: Vec::new(),
            reference_marker: DEFAULT_MARKER.to_string(),
            providers: BTreeMap::new(),
        }
    }
}

/// Where and how a runtime reaches one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider source address, e.g. `registry.terraform.io/hashicorp/aws`
    pub source: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// Provider-specific settings passed through untouched
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
}

impl EngineConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("could not read {}: {e}", path.display())))?;
        let config = Self::from_toml_str(&content)?;
        log::debug!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".into()));
        }
        if self.reference_marker.is_empty() || self.reference_marker.contains('.') {
            return Err(Error::Config(format!(
                "reference marker {:?} must be non-empty and contain no '.'",
                self.reference_marker
            )));
        }
        Ok(())
    }

    /// Provider settings selected by a resource, if any
    pub fn provider_for(&self, resource: &Resource) -> Option<&ProviderConfig> {
        resource.provider().and_then(|name| self.providers.get(name))
    }

    pub fn resolver(&self) -> ReferenceResolver {
        ReferenceResolver::new(&self.reference_marker)
    }

    /// Operation options seeded from this config
    pub fn operation_options(&self) -> OperationOptions {
        OperationOptions {
            ignored_fields: self.ignored_fields.clone(),
            concurrency: Some(self.concurrency),
        }
    }
}
