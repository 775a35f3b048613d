//! Resource, property, and catalog collaborator traits
//!
//! The engine never builds resources itself; it converges a catalog of
//! externally supplied resources. Everything it needs from them is
//! expressed through the traits in this module:
//!
//! - [`Resource`]: identity, live-state retrieval, properties, and the
//!   optional hooks (generation, flush, provider, containment)
//! - [`Property`]: one manageable attribute with a desired value, an
//!   in-sync check, and a sync operation
//! - [`Provider`]: class-level batch prefetch
//! - [`Catalog`]: the resource set for one run

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Name of the property governing a resource's existence state.
///
/// When a resource carries a property with this name, it is evaluated
/// before (and, when out of sync, instead of) every other property.
pub const ENSURE: &str = "ensure";

/// Current or desired value of a single property
///
/// `Absent` doubles as the existence sentinel for `ensure` and as the
/// recorded value of audited properties on resources that do not exist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyValue {
    /// The property (or the resource itself) is not present
    Absent,
    /// A concrete value
    Value(String),
}

impl PropertyValue {
    /// Convenience constructor from anything string-like
    pub fn value(v: impl Into<String>) -> Self {
        Self::Value(v.into())
    }

    /// Check if this is the absent sentinel
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Render for log messages: quoted values, bare `absent`
    pub fn quoted(&self) -> String {
        match self {
            Self::Absent => "absent".to_string(),
            Self::Value(v) => format!("'{v}'"),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Value(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::Value(v.to_string())
    }
}

/// One manageable attribute of a resource
///
/// The engine compares the live value against `desired()` via `insync`
/// and calls `sync` to converge it. Properties are applied strictly in
/// the order the owning resource returns them from
/// [`Resource::properties`].
pub trait Property {
    /// Property name, unique within its resource (e.g. "mode", "owner")
    fn name(&self) -> &str;

    /// The desired value from the catalog
    fn desired(&self) -> PropertyValue;

    /// Whether the live value already matches the desired value
    fn insync(&self, current: &PropertyValue) -> bool {
        *current == self.desired()
    }

    /// Converge the live value to the desired value
    ///
    /// Errors are caught by the engine and turned into failure events;
    /// they never abort the run.
    fn sync(&self) -> Result<()>;

    /// Render a change for logging, e.g. `mode changed '750' to '755'`
    fn change_to_s(&self, is: &PropertyValue, should: &PropertyValue) -> String {
        format!("{} changed {} to {}", self.name(), is.quoted(), should.quoted())
    }
}

/// Core trait for resources the engine converges
///
/// Only `id`, `name`, `resource_type`, `properties`, and `retrieve` are
/// required; everything else has a conservative default so simple
/// resource types stay simple.
pub trait Resource: Send + Sync + fmt::Debug {
    /// Canonical reference, unique within the catalog (e.g. "file[/etc/motd]")
    fn id(&self) -> String;

    /// The resource title (e.g. "/etc/motd")
    ///
    /// Used as the prefetch grouping key and by the parent-matching
    /// heuristic during dynamic expansion.
    fn name(&self) -> String;

    /// Resource type category (e.g. "file", "package", "service")
    fn resource_type(&self) -> &'static str;

    /// Properties in the order the type requires them to be applied
    ///
    /// The engine never reorders these; ownership before permission
    /// bits and similar constraints are the type's to express here.
    fn properties(&self) -> Vec<&dyn Property>;

    /// Retrieve the current live state, keyed by property name
    ///
    /// Properties missing from the map are treated as absent.
    fn retrieve(&self) -> Result<HashMap<String, PropertyValue>>;

    /// Tags used for run filtering
    fn tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Inherit tags from a generating parent
    ///
    /// Generated children receive their parent's tags through this hook.
    /// Implementations that support generation should store tags behind
    /// interior mutability; the default ignores the call.
    fn add_tags(&self, _tags: &[String]) {}

    /// Property names to audit across runs (drift detection)
    fn audited(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether this resource is in no-op mode
    fn noop(&self) -> bool {
        false
    }

    /// Declared but not realized; virtual resources are skipped
    fn is_virtual(&self) -> bool {
        false
    }

    /// Whether this is a grouping vertex to be spliced out of the
    /// relationship graph before traversal
    fn is_container(&self) -> bool {
        false
    }

    /// Whether this resource is being purged
    fn purging(&self) -> bool {
        false
    }

    /// Whether converging this resource deletes it
    fn deleting(&self) -> bool {
        false
    }

    /// Whether the resource's schedule permits evaluation now
    ///
    /// `last_checked` is the persisted timestamp of the previous
    /// evaluation, if any. The default is always due.
    fn schedule_due(&self, _last_checked: Option<DateTime<Utc>>) -> bool {
        true
    }

    /// Produce additional resources before the run starts
    ///
    /// Called to a fixed point: generated resources are themselves asked
    /// to generate.
    fn generate(&self) -> Result<Vec<Arc<dyn Resource>>> {
        Ok(Vec::new())
    }

    /// Whether this resource expands the graph at evaluation time
    fn expands_at_eval(&self) -> bool {
        false
    }

    /// Produce additional resources immediately before evaluation
    ///
    /// Only called when [`expands_at_eval`](Self::expands_at_eval)
    /// returns true; recursive directory management is the canonical
    /// use.
    fn eval_generate(&self) -> Result<Vec<Arc<dyn Resource>>> {
        Ok(Vec::new())
    }

    /// Whether generated children must be converged before this resource
    ///
    /// Flips the direction of the automatic containment edge (e.g. a
    /// purged directory wants its contents removed first).
    fn depthfirst(&self) -> bool {
        false
    }

    /// Post-change hook, called once after any property changed
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Provider handle for batch prefetch grouping
    fn provider(&self) -> Option<Arc<dyn Provider>> {
        None
    }
}

/// Provider-class capabilities
///
/// Providers are grouped by `name` and asked once per run to prefetch
/// state for all resources they back.
pub trait Provider: Send + Sync + fmt::Debug {
    /// Provider class name (the prefetch grouping key)
    fn name(&self) -> &str;

    /// Batch-prefetch live state for the given resources, keyed by title
    fn prefetch(&self, resources: &HashMap<String, Arc<dyn Resource>>) -> Result<()>;
}

/// The resource set for one run
///
/// Methods take `&self`: generation adds resources mid-run while the
/// engine holds other borrows, so implementations choose their own
/// interior mutability. The engine itself is strictly single-threaded
/// per run.
pub trait Catalog {
    /// Look up a resource by its canonical reference
    fn resource(&self, id: &str) -> Option<Arc<dyn Resource>>;

    /// Add a resource, rejecting duplicates by id
    fn add_resource(&self, resource: Arc<dyn Resource>) -> Result<(), CatalogError>;

    /// All resources currently in the catalog
    fn resources(&self) -> Vec<Arc<dyn Resource>>;
}

/// Errors from catalog mutation
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A resource with the same id already exists
    #[error("duplicate resource {id}")]
    DuplicateResource { id: String },
}
