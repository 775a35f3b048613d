//! Event and status records produced by a run
//!
//! One [`Event`] describes one property's before/after state and
//! outcome; one [`ResourceStatus`] collects a resource's events plus
//! its run flags; a [`Report`] collects every status of a run. All
//! three are plain serializable value objects: the engine produces
//! and hands them off, it never formats or persists them.

use crate::resource::PropertyValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Outcome of one property-level change attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    /// The property was converged
    Success,
    /// The property would have been converged (noop in effect)
    Noop,
    /// An audited value drifted; nothing was changed
    Audit,
    /// The property's sync operation failed
    Failure,
}

/// One property's before/after state and outcome
///
/// Immutable once emitted; owned by the [`ResourceStatus`] it is
/// attached to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event name, e.g. `mode_changed`
    pub name: String,
    /// Canonical reference of the originating resource
    pub resource: String,
    /// The property this event describes
    pub property: String,
    /// Live value before the change
    pub previous_value: PropertyValue,
    /// Desired value from the catalog
    pub desired_value: PropertyValue,
    /// Audit snapshot from a previous run, if one existed
    pub historical_value: Option<PropertyValue>,
    pub status: EventStatus,
    pub message: String,
    pub time: DateTime<Utc>,
}

impl Event {
    /// Emit this event to the log at a level matching its status
    pub fn log(&self) {
        match self.status {
            EventStatus::Failure => log::error!("{}/{}: {}", self.resource, self.property, self.message),
            EventStatus::Noop | EventStatus::Audit | EventStatus::Success => {
                log::info!("{}/{}: {}", self.resource, self.property, self.message);
            }
        }
    }
}

/// Run flags and events for one resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceStatus {
    /// Canonical reference of the resource
    pub resource: String,
    /// The resource passed the skip policy and was evaluated
    pub scheduled: bool,
    /// The resource was skipped (tags, schedule, failed dependency, virtual)
    pub skipped: bool,
    /// Evaluation failed, at the resource or property level
    pub failed: bool,
    /// At least one property was actually converged
    pub changed: bool,
    /// Wall-clock time spent evaluating
    pub evaluation_time: Duration,
    /// When evaluation started
    pub time: DateTime<Utc>,
    /// Property events, in application order
    pub events: Vec<Event>,
}

impl ResourceStatus {
    /// A fresh status for one resource
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            scheduled: false,
            skipped: false,
            failed: false,
            changed: false,
            evaluation_time: Duration::ZERO,
            time: Utc::now(),
            events: Vec::new(),
        }
    }

    /// Attach an event, updating the changed/failed flags
    pub fn add_event(&mut self, event: Event) {
        match event.status {
            EventStatus::Success => self.changed = true,
            EventStatus::Failure => self.failed = true,
            EventStatus::Noop | EventStatus::Audit => {}
        }
        self.events.push(event);
    }
}

/// Every resource status of one run, in evaluation order
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Report {
    order: Vec<String>,
    statuses: HashMap<String, ResourceStatus>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a status, replacing any earlier one for the same resource
    pub fn add_status(&mut self, status: ResourceStatus) {
        if !self.statuses.contains_key(&status.resource) {
            self.order.push(status.resource.clone());
        }
        self.statuses.insert(status.resource.clone(), status);
    }

    /// Status for one resource, if it was reached
    pub fn status(&self, resource: &str) -> Option<&ResourceStatus> {
        self.statuses.get(resource)
    }

    /// Whether a resource failed; false if it was never reached
    pub fn is_failed(&self, resource: &str) -> bool {
        self.statuses.get(resource).is_some_and(|s| s.failed)
    }

    /// Whether any resource failed
    pub fn any_failed(&self) -> bool {
        self.statuses.values().any(|s| s.failed)
    }

    /// Resources with at least one converged property, in run order
    pub fn changed(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|id| self.statuses[*id].changed)
            .map(String::as_str)
            .collect()
    }

    /// All statuses in evaluation order
    pub fn statuses(&self) -> impl Iterator<Item = &ResourceStatus> {
        self.order.iter().map(|id| &self.statuses[id])
    }

    /// Number of recorded statuses
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
