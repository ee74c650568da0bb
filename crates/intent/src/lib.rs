//! # Intent
//!
//! The desired-state side of the orchestration engine.
//!
//! This crate models what a stack should look like and answers the pure
//! questions about it: which resources reference which, in what order they
//! can be materialised, and how two attribute trees differ. Nothing in here
//! talks to a runtime or a state store.
//!
//! ## Core Concepts
//!
//! - **Resource**: one addressable unit of configuration (ID, type, attributes)
//! - **Value**: the tagged attribute tree every comparison walks
//! - **Implicit reference**: a `$kusion_path.<id>.<path>` placeholder that
//!   becomes a dependency edge and is substituted at apply time
//! - **Graph**: the dependency DAG and its parallel execution levels
//!
//! ## Example
//!
//! ```
//! use intent::{Graph, ReferenceResolver, Resource, ResourceType};
//!
//! let secret = Resource::new("secret", ResourceType::Terraform);
//! let db = Resource::new("db", ResourceType::Terraform)
//!     .with_attribute("password", "$kusion_path.secret.result");
//! let resources = vec![secret, db];
//!
//! let refs = ReferenceResolver::default().resolve_all(&resources)?;
//! let graph = Graph::from_resources(&resources, refs.edges())?;
//! let levels = graph.levels()?;
//!
//! assert_eq!(levels, vec![vec!["secret".to_string()], vec!["db".to_string()]]);
//! # Ok::<(), intent::Error>(())
//! ```

pub mod diff;
pub mod error;
pub mod graph;
pub mod reference;
pub mod resource;
pub mod value;

// Re-export main types at crate root
pub use diff::{FieldDiff, FieldDiffKind, diff_attributes, strip_ignored};
pub use error::{Error, Result};
pub use graph::Graph;
pub use reference::{
    DEFAULT_MARKER, ReferenceIndex, ReferenceResolver, ReferenceSite, ResourceReferences,
    Substitution,
};
pub use resource::{
    Intent, PROVIDER_EXTENSION, Resource, ResourceType, kubernetes_resource_id,
    terraform_resource_id, validate_ids,
};
pub use value::{
    Attributes, FieldPath, Value, attributes_from_json, get_attribute, remove_attribute,
};
