//! One pending property change and its application
//!
//! A [`Change`] binds a property to the live value observed for it this
//! run. Applying it produces exactly one [`Event`] describing what
//! happened: converged, would-have-converged (noop), audit-only drift,
//! or failure. Sync errors are contained here; they become failure
//! events, never panics or run aborts.

use crate::event::{Event, EventStatus};
use crate::resource::{Property, PropertyValue};
use chrono::Utc;

/// A property plus the live value it was compared against
pub struct Change<'a> {
    property: &'a dyn Property,
    is: PropertyValue,
    historical: Option<PropertyValue>,
    noop: bool,
}

impl<'a> Change<'a> {
    pub fn new(property: &'a dyn Property, is: PropertyValue) -> Self {
        Self { property, is, historical: None, noop: false }
    }

    /// Attach the audit snapshot recorded by a previous run
    pub fn with_historical(mut self, historical: Option<PropertyValue>) -> Self {
        self.historical = historical;
        self
    }

    /// Mark this change as simulate-only
    pub fn with_noop(mut self, noop: bool) -> Self {
        self.noop = noop;
        self
    }

    /// Apply the change, producing and logging exactly one event
    pub fn apply(&self, resource: &str) -> Event {
        let should = self.property.desired();
        let name = self.property.name();
        let mut event = Event {
            name: format!("{name}_changed"),
            resource: resource.to_string(),
            property: name.to_string(),
            previous_value: self.is.clone(),
            desired_value: should.clone(),
            historical_value: self.historical.clone(),
            status: EventStatus::Success,
            message: String::new(),
            time: Utc::now(),
        };

        if self.property.insync(&self.is) {
            // In sync but still built: an audited snapshot diverged.
            event.status = EventStatus::Audit;
            event.message = match &self.historical {
                Some(historical) => format!(
                    "audit change: previously recorded value {} has been changed to {}",
                    historical.quoted(),
                    self.is.quoted()
                ),
                None => format!("audit change: newly-recorded value {}", self.is.quoted()),
            };
            event.log();
            return event;
        }

        if self.noop {
            event.status = EventStatus::Noop;
            event.message = format!(
                "current_value {}, should be {} (noop)",
                self.is.quoted(),
                should.quoted()
            );
            event.log();
            return event;
        }

        match self.property.sync() {
            Ok(()) => {
                event.message = self.property.change_to_s(&self.is, &should);
                if let Some(historical) = &self.historical {
                    if *historical != self.is {
                        event.message.push_str(&format!(
                            " (previously recorded value was {})",
                            historical.quoted()
                        ));
                    }
                }
            }
            Err(err) => {
                event.status = EventStatus::Failure;
                event.message = format!(
                    "change from {} to {} failed: {err:#}",
                    self.is.quoted(),
                    should.quoted()
                );
            }
        }
        event.log();
        event
    }
}
