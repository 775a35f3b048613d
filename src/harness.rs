//! Per-resource evaluation
//!
//! [`ResourceHarness`] turns one resource into a [`ResourceStatus`]:
//! retrieve live state, record audit snapshots, build and apply the
//! property changes that are out of sync, and contain every failure to
//! the resource that caused it. It owns the persistent [`Storage`]
//! where audit snapshots and the `checked`/`synced` timestamps live.

use crate::change::Change;
use crate::event::{Event, EventStatus, ResourceStatus};
use crate::graph::RelationshipGraph;
use crate::resource::{Catalog, ENSURE, PropertyValue, Resource};
use crate::storage::Storage;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

/// Evaluates resources and records their state between runs
pub struct ResourceHarness {
    storage: Box<dyn Storage>,
}

impl ResourceHarness {
    pub fn new(storage: Box<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub fn storage_mut(&mut self) -> &mut dyn Storage {
        self.storage.as_mut()
    }

    /// Store a raw value for a resource
    pub fn cache(&mut self, resource: &dyn Resource, key: &str, value: Value) {
        self.storage.set(&resource.id(), key, value);
    }

    /// Fetch a raw stored value for a resource
    pub fn cached(&self, resource: &dyn Resource, key: &str) -> Option<Value> {
        self.storage.get(&resource.id(), key)
    }

    fn cache_property(&mut self, resource: &dyn Resource, name: &str, value: &PropertyValue) {
        match serde_json::to_value(value) {
            Ok(v) => self.cache(resource, name, v),
            Err(err) => log::warn!("{}: could not record audit value: {err}", resource.id()),
        }
    }

    fn cached_property(&self, resource: &dyn Resource, name: &str) -> Option<PropertyValue> {
        let value = self.cached(resource, name)?;
        serde_json::from_value(value).ok()
    }

    fn checked_at(&self, resource: &dyn Resource) -> Option<DateTime<Utc>> {
        let value = self.cached(resource, "checked")?;
        serde_json::from_value(value).ok()
    }

    /// Whether the resource's schedule permits evaluation this run
    pub fn scheduled(&self, resource: &dyn Resource) -> bool {
        resource.schedule_due(self.checked_at(resource))
    }

    /// Evaluate one resource, containing any failure to its status
    pub fn evaluate(
        &mut self,
        resource: &dyn Resource,
        graph: &RelationshipGraph<String>,
        catalog: &dyn Catalog,
        noop: bool,
    ) -> ResourceStatus {
        let start = Instant::now();
        let mut status = ResourceStatus::new(resource.id());

        match self.perform_changes(resource, graph, catalog, noop) {
            Ok(events) => {
                for event in events {
                    status.add_event(event);
                }
                if status.changed {
                    match serde_json::to_value(Utc::now()) {
                        Ok(now) => self.cache(resource, "synced", now),
                        Err(err) => {
                            log::warn!("{}: could not record sync time: {err}", resource.id());
                        }
                    }
                    if let Err(err) = resource.flush() {
                        log::error!("{}: failed to flush: {err:#}", resource.id());
                        status.failed = true;
                    }
                }
            }
            Err(err) => {
                log::error!("{}: could not evaluate: {err:#}", resource.id());
                status.failed = true;
            }
        }

        status.evaluation_time = start.elapsed();
        status
    }

    /// Diff live state against the catalog and apply what is out of sync
    fn perform_changes(
        &mut self,
        resource: &dyn Resource,
        graph: &RelationshipGraph<String>,
        catalog: &dyn Catalog,
        global_noop: bool,
    ) -> Result<Vec<Event>> {
        match serde_json::to_value(Utc::now()) {
            Ok(now) => self.cache(resource, "checked", now),
            Err(err) => log::warn!("{}: could not record check time: {err}", resource.id()),
        }

        if !self.allow_changes(resource, graph, catalog) {
            return Ok(Vec::new());
        }

        let current = resource.retrieve()?;
        let historical = self.record_audited(resource, &current);

        let noop = global_noop || resource.noop();
        let properties = resource.properties();
        let mut events = Vec::new();

        // Existence first: an out-of-sync ensure preempts every other
        // property, and an in-sync absent resource has nothing to manage.
        if let Some(ensure) = properties.iter().find(|p| p.name() == ENSURE) {
            let live = current.get(ENSURE).cloned().unwrap_or(PropertyValue::Absent);
            if !ensure.insync(&live) {
                let change = Change::new(*ensure, live)
                    .with_historical(historical.get(ENSURE).cloned())
                    .with_noop(noop);
                events.push(change.apply(&resource.id()));
                Self::leftover_audit_events(resource, &current, &historical, &mut events);
                return Ok(events);
            }
            if ensure.desired().is_absent() {
                Self::leftover_audit_events(resource, &current, &historical, &mut events);
                return Ok(events);
            }
        }

        for property in properties {
            if property.name() == ENSURE {
                continue;
            }
            let live = current.get(property.name()).cloned().unwrap_or(PropertyValue::Absent);
            let snapshot = historical.get(property.name()).cloned();
            let divergent = snapshot.as_ref().is_some_and(|h| *h != live);
            if !property.insync(&live) || divergent {
                let change =
                    Change::new(property, live).with_historical(snapshot).with_noop(noop);
                events.push(change.apply(&resource.id()));
            }
        }
        Self::leftover_audit_events(resource, &current, &historical, &mut events);
        Ok(events)
    }

    /// Report audit drift the property walk did not already cover
    ///
    /// A property handled by a change this run carries its snapshot in
    /// that change's event. Anything else audited and diverged still
    /// gets an audit event, even when ensure preempted the walk
    /// entirely.
    fn leftover_audit_events(
        resource: &dyn Resource,
        current: &HashMap<String, PropertyValue>,
        historical: &HashMap<String, PropertyValue>,
        events: &mut Vec<Event>,
    ) {
        let mut names: Vec<&String> = historical.keys().collect();
        names.sort();
        for name in names {
            if events.iter().any(|e| e.property == **name) {
                continue;
            }
            let snapshot = &historical[name];
            let live = current.get(name.as_str()).cloned().unwrap_or(PropertyValue::Absent);
            if *snapshot == live {
                continue;
            }
            let event = Event {
                name: format!("{name}_changed"),
                resource: resource.id(),
                property: (*name).clone(),
                previous_value: live.clone(),
                desired_value: live.clone(),
                historical_value: Some(snapshot.clone()),
                status: EventStatus::Audit,
                message: format!(
                    "audit change: previously recorded value {} has been changed to {}",
                    snapshot.quoted(),
                    live.quoted()
                ),
                time: Utc::now(),
            };
            event.log();
            events.push(event);
        }
    }

    /// Record audited values, returning the snapshots from previous runs
    ///
    /// A first sighting is logged and recorded without producing an
    /// event; a diverged snapshot is refreshed here so the next run sees
    /// the value this run observed, whatever syncing does to it later.
    fn record_audited(
        &mut self,
        resource: &dyn Resource,
        current: &HashMap<String, PropertyValue>,
    ) -> HashMap<String, PropertyValue> {
        let mut historical = HashMap::new();
        for name in resource.audited() {
            let live = current.get(&name).cloned().unwrap_or(PropertyValue::Absent);
            match self.cached_property(resource, &name) {
                None => {
                    log::info!(
                        "{}/{name}: audit change: newly-recorded value {}",
                        resource.id(),
                        live.quoted()
                    );
                    self.cache_property(resource, &name, &live);
                }
                Some(snapshot) => {
                    if snapshot != live {
                        self.cache_property(resource, &name, &live);
                    }
                    historical.insert(name, snapshot);
                }
            }
        }
        historical
    }

    /// Refuse to delete a purged resource that others still depend on
    fn allow_changes(
        &self,
        resource: &dyn Resource,
        graph: &RelationshipGraph<String>,
        catalog: &dyn Catalog,
    ) -> bool {
        if !(resource.purging() && resource.deleting()) {
            return true;
        }
        let mut blockers: Vec<String> = graph
            .dependents(&resource.id())
            .into_iter()
            .filter(|id| catalog.resource(id).is_some_and(|r| !r.deleting()))
            .collect();
        if blockers.is_empty() {
            return true;
        }
        blockers.sort();
        log::warn!(
            "{}: not removing because other resources depend on it: {}",
            resource.id(),
            blockers.join(", ")
        );
        false
    }
}
