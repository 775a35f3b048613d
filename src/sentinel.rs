//! No-op resources owned by the engine itself
//!
//! Container splicing and evaluation-time expansion both need graph
//! vertices that carry ordering and notification semantics but manage
//! nothing: admission/completion pairs around spliced containers, and
//! relay vertices that forward refresh events past an expanding
//! resource's children.

use crate::resource::{Property, PropertyValue, Resource};
use anyhow::Result;
use std::collections::HashMap;

/// A resource with no properties and no live state
///
/// Always in sync; evaluating one produces no events. Only its identity
/// and its graph edges matter.
#[derive(Debug, Clone)]
pub struct SentinelResource {
    name: String,
}

impl SentinelResource {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Admission sentinel for a spliced container
    pub fn admissible(container_name: &str) -> Self {
        Self::new(format!("admissible_{container_name}"))
    }

    /// Completion sentinel for a spliced container
    pub fn completed(container_name: &str) -> Self {
        Self::new(format!("completed_{container_name}"))
    }

    /// Notification relay for an expanding resource
    pub fn notify_relay(resource_name: &str) -> Self {
        Self::new(format!("notify_relay_{resource_name}"))
    }
}

impl Resource for SentinelResource {
    fn id(&self) -> String {
        format!("sentinel[{}]", self.name)
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn resource_type(&self) -> &'static str {
        "sentinel"
    }

    fn properties(&self) -> Vec<&dyn Property> {
        Vec::new()
    }

    fn retrieve(&self) -> Result<HashMap<String, PropertyValue>> {
        Ok(HashMap::new())
    }
}
