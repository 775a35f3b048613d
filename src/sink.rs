//! Notification hand-off
//!
//! The engine decides *which* events travel along *which* refresh edges;
//! what a refresh actually does to a subscriber is outside its scope.
//! An [`EventSink`] receives that hand-off: `queue` once per matching
//! edge as events are emitted, then `process` once per resource after
//! its evaluation settles.

use crate::event::Event;
use crate::graph::Callback;
use crate::resource::Resource;

/// Receiver for refresh notifications crossing the engine boundary
///
/// Both methods default to doing nothing, so implementations only
/// override what they care about.
pub trait EventSink {
    /// An event matched a refresh edge pointing at `target`
    fn queue(&mut self, _target: &str, _callback: Callback, _event: &Event) {}

    /// A resource finished evaluating; deliver anything queued for it
    fn process(&mut self, _resource: &dyn Resource) {}
}

/// Sink that drops every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {}
