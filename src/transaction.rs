//! One convergence run over a catalog
//!
//! [`Transaction`] owns the run from start to finish:
//!
//! 1. splice containers out of the relationship graph
//! 2. expand the catalog to a fixed point via [`Resource::generate`]
//! 3. refuse to run a cyclic graph
//! 4. prefetch provider state in batches
//! 5. traverse in dependency order, evaluating or skipping each
//!    resource, expanding eval-time generators as they are reached
//!
//! Failures stay contained: a failing resource fails its own status and
//! taints its dependents through the skip policy, and the run carries on
//! with everything else. Only a dependency cycle aborts the run.

use crate::event::{Event, Report, ResourceStatus};
use crate::graph::cycle::CycleError;
use crate::graph::{Callback, EdgeLabel, RelationshipGraph};
use crate::harness::ResourceHarness;
use crate::resource::{Catalog, CatalogError, Provider, Resource};
use crate::scheduler::{Expansion, Scheduler};
use crate::sentinel::SentinelResource;
use crate::sink::{EventSink, NullEventSink};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Knobs for one run
#[derive(Debug, Default, Clone)]
pub struct TransactionOptions {
    /// When non-empty, only resources carrying at least one of these
    /// tags are evaluated
    pub tags: Vec<String>,
    /// Evaluate even resources whose schedule says not to
    pub ignore_schedules: bool,
    /// Simulate every change instead of applying it
    pub noop: bool,
    /// Cooperative cancellation flag, polled between resources
    pub cancel: Option<Arc<AtomicBool>>,
}

/// Fatal errors aborting a run before or during traversal
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error(transparent)]
    Cycle(#[from] CycleError),
}

/// One run of the convergence engine
pub struct Transaction<'a> {
    catalog: &'a dyn Catalog,
    graph: RelationshipGraph<String>,
    containment: Option<RelationshipGraph<String>>,
    harness: ResourceHarness,
    sink: Box<dyn EventSink + 'a>,
    report: Report,
    options: TransactionOptions,
}

impl<'a> Transaction<'a> {
    pub fn new(
        catalog: &'a dyn Catalog,
        graph: RelationshipGraph<String>,
        harness: ResourceHarness,
        options: TransactionOptions,
    ) -> Self {
        Self {
            catalog,
            graph,
            containment: None,
            harness,
            sink: Box::new(NullEventSink),
            report: Report::new(),
            options,
        }
    }

    /// Provide the containment graph whose containers get spliced out
    pub fn with_containment(mut self, containment: RelationshipGraph<String>) -> Self {
        self.containment = Some(containment);
        self
    }

    /// Receive refresh notifications crossing the engine boundary
    pub fn with_event_sink(mut self, sink: Box<dyn EventSink + 'a>) -> Self {
        self.sink = sink;
        self
    }

    /// Run to completion, consuming the transaction
    pub fn evaluate(mut self) -> Result<Report, TransactionError> {
        self.splice_containers();
        self.generate();
        self.graph.check_acyclic()?;
        self.prefetch();

        let graph = std::mem::take(&mut self.graph);
        self.traverse(Scheduler::new(graph));

        if let Err(err) = self.harness.storage_mut().persist() {
            log::warn!("could not persist state cache: {err:#}");
        }
        Ok(self.report)
    }

    /// Replace containers with admission/completion sentinel pairs
    fn splice_containers(&mut self) {
        let Some(containment) = self.containment.take() else {
            return;
        };
        let catalog = self.catalog;
        self.graph.splice(
            &containment,
            |id| catalog.resource(id).is_some_and(|r| r.is_container()),
            |id| {
                let name = catalog.resource(id).map_or_else(|| id.clone(), |r| r.name());
                let admissible = Arc::new(SentinelResource::admissible(&name));
                let completed = Arc::new(SentinelResource::completed(&name));
                let pair = (admissible.id(), completed.id());
                for sentinel in [admissible, completed] {
                    if let Err(CatalogError::DuplicateResource { id }) =
                        catalog.add_resource(sentinel)
                    {
                        log::debug!("{id}: sentinel already in catalog");
                    }
                }
                pair
            },
        );
    }

    /// Expand the catalog to a fixed point before traversal
    fn generate(&mut self) {
        for resource in self.catalog.resources() {
            self.generate_additional(&resource);
        }
    }

    fn generate_additional(&mut self, parent: &Arc<dyn Resource>) {
        let made = match parent.generate() {
            Ok(made) => made,
            Err(err) => {
                log::error!("{}: failed to generate additional resources: {err:#}", parent.id());
                return;
            }
        };
        for child in made {
            child.add_tags(&parent.tags());
            match self.catalog.add_resource(child.clone()) {
                Ok(()) => {
                    self.containment_edge(parent.as_ref(), child.as_ref());
                    self.generate_additional(&child);
                }
                Err(CatalogError::DuplicateResource { id }) => {
                    log::info!("{id}: duplicate generated resource, ignoring");
                }
            }
        }
    }

    /// Automatic ordering between a generator and its child
    ///
    /// Parent before child normally; a depthfirst parent wants its
    /// children converged first. An explicit opposing edge wins over
    /// the automatic one.
    fn containment_edge(&mut self, parent: &dyn Resource, child: &dyn Resource) {
        self.graph.add_vertex(child.id());
        let (source, target) = if parent.depthfirst() {
            (child.id(), parent.id())
        } else {
            (parent.id(), child.id())
        };
        if self.graph.has_edge(&target, &source) {
            log::debug!("{}: skipping automatic relationship to {}", parent.id(), child.id());
        } else {
            self.graph.add_edge(source, target, EdgeLabel::ordering());
        }
    }

    /// Batch-prefetch live state, one call per provider class
    fn prefetch(&self) {
        let mut groups: HashMap<String, (Arc<dyn Provider>, HashMap<String, Arc<dyn Resource>>)> =
            HashMap::new();
        for resource in self.catalog.resources() {
            if let Some(provider) = resource.provider() {
                groups
                    .entry(provider.name().to_string())
                    .or_insert_with(|| (provider.clone(), HashMap::new()))
                    .1
                    .insert(resource.name(), resource);
            }
        }

        let mut names: Vec<&String> = groups.keys().collect();
        names.sort();
        for name in names.into_iter().cloned().collect::<Vec<_>>() {
            let (provider, resources) = &groups[&name];
            log::debug!("prefetching {name} resources ({})", resources.len());
            if let Err(err) = provider.prefetch(resources) {
                log::error!("could not prefetch provider '{name}': {err:#}");
            }
        }
    }

    fn canceled(&self) -> bool {
        self.options.cancel.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn traverse(&mut self, mut scheduler: Scheduler<String>) {
        while let Some(id) = scheduler.next_resource() {
            if self.canceled() {
                log::info!("transaction canceled, stopping");
                break;
            }
            if scheduler.is_expanded(&id) {
                scheduler.begin(&id);
                self.eval_resource(&id, scheduler.graph());
                scheduler.finish(&id);
            } else {
                let expansion = self.eval_generate(&id, scheduler.graph());
                scheduler.integrate(expansion);
                scheduler.mark_expanded(id);
            }
        }
    }

    /// Evaluate one resource, or record why it was skipped
    fn eval_resource(&mut self, id: &str, graph: &RelationshipGraph<String>) {
        let Some(resource) = self.catalog.resource(id) else {
            log::warn!("{id}: not in catalog, ignoring");
            return;
        };

        if self.skip(resource.as_ref(), graph) {
            let mut status = ResourceStatus::new(id);
            status.skipped = true;
            self.report.add_status(status);
        } else {
            let mut status = self.harness.evaluate(
                resource.as_ref(),
                graph,
                self.catalog,
                self.options.noop,
            );
            status.scheduled = true;
            for event in &status.events {
                self.queue_event(id, event, graph);
            }
            self.report.add_status(status);
        }

        self.sink.process(resource.as_ref());
    }

    /// Queue an event along every matching edge out of `source`
    ///
    /// Sentinel targets are transparent: an event arriving at one is
    /// forwarded along the sentinel's own matching edges, so relays and
    /// spliced containers pass notifications through to real resources.
    fn queue_event(&mut self, source: &str, event: &Event, graph: &RelationshipGraph<String>) {
        let source = source.to_string();
        let mut pending: Vec<(String, Callback)> = Vec::new();
        for edge in graph.matching_edges(&source, &event.name) {
            if let Some(callback) = edge.label.callback {
                pending.push((edge.target, callback));
            }
        }
        while let Some((target, callback)) = pending.pop() {
            let sentinel = self
                .catalog
                .resource(&target)
                .is_some_and(|r| r.resource_type() == "sentinel");
            if sentinel {
                for edge in graph.matching_edges(&target, &event.name) {
                    if let Some(onward) = edge.label.callback {
                        pending.push((edge.target, onward));
                    }
                }
            } else {
                self.sink.queue(&target, callback, event);
            }
        }
    }

    /// Whether the skip policy rules this resource out, in precedence
    /// order: tags, schedule, failed dependencies, virtual
    fn skip(&self, resource: &dyn Resource, graph: &RelationshipGraph<String>) -> bool {
        if self.missing_tags(resource) {
            log::debug!(
                "{}: skipping, not tagged with {}",
                resource.id(),
                self.options.tags.join(", ")
            );
            true
        } else if !self.scheduled(resource) {
            log::debug!("{}: skipping, not scheduled", resource.id());
            true
        } else if self.failed_dependencies(resource, graph) {
            true
        } else if resource.is_virtual() {
            log::debug!("{}: skipping, virtual resource", resource.id());
            true
        } else {
            false
        }
    }

    fn missing_tags(&self, resource: &dyn Resource) -> bool {
        if self.options.tags.is_empty() {
            return false;
        }
        let tags = resource.tags();
        !tags.iter().any(|tag| self.options.tags.contains(tag))
    }

    fn scheduled(&self, resource: &dyn Resource) -> bool {
        self.options.ignore_schedules || self.harness.scheduled(resource)
    }

    /// Whether anything upstream of this resource has failed
    fn failed_dependencies(&self, resource: &dyn Resource, graph: &RelationshipGraph<String>) -> bool {
        let mut failed: Vec<String> = graph
            .dependencies(&resource.id())
            .into_iter()
            .filter(|dep| self.report.is_failed(dep))
            .collect();
        if failed.is_empty() {
            return false;
        }
        failed.sort();
        for dep in &failed {
            log::warn!("{}: skipping because dependency {dep} has failures", resource.id());
        }
        true
    }

    /// Run a resource's eval-time generator and wire up its children
    ///
    /// The children are inserted between the generator and a relay
    /// sentinel that forwards refresh events to the generator's own
    /// subscribers, so notifications are not delivered until the whole
    /// expansion has converged.
    fn eval_generate(&mut self, id: &str, graph: &RelationshipGraph<String>) -> Expansion<String> {
        let mut expansion = Expansion::none();
        let Some(resource) = self.catalog.resource(id) else {
            return expansion;
        };
        if !resource.expands_at_eval() {
            return expansion;
        }

        let made = match resource.eval_generate() {
            Ok(made) => made,
            Err(err) => {
                log::error!("{id}: failed to generate resources during evaluation: {err:#}");
                return expansion;
            }
        };
        if made.is_empty() {
            return expansion;
        }

        let relay = Arc::new(SentinelResource::notify_relay(&resource.name()));
        let relay_id = relay.id();
        if let Err(CatalogError::DuplicateResource { id }) = self.catalog.add_resource(relay) {
            log::debug!("{id}: relay already in catalog");
        }
        expansion.add_vertex(relay_id.clone());
        expansion.add_edge(id.to_string(), relay_id.clone(), EdgeLabel::ordering());
        for edge in graph.matching_edges(&id.to_string(), "") {
            expansion.add_edge(relay_id.clone(), edge.target.clone(), edge.label);
        }

        let mut parents: Vec<Arc<dyn Resource>> = vec![resource.clone()];
        for child in made {
            child.add_tags(&resource.tags());
            if let Err(CatalogError::DuplicateResource { id }) =
                self.catalog.add_resource(child.clone())
            {
                log::info!("{id}: duplicate generated resource, ignoring");
                continue;
            }

            expansion.add_vertex(child.id());
            expansion.add_edge(child.id(), relay_id.clone(), EdgeLabel::notify());

            // Nearest enclosing parent: the closest already-seen resource
            // whose name prefixes the child's (directory trees).
            let parent = parents
                .iter()
                .rev()
                .find(|p| child.name().starts_with(&p.name()))
                .cloned()
                .unwrap_or_else(|| resource.clone());
            let (source, target) = if parent.depthfirst() {
                (child.id(), parent.id())
            } else {
                (parent.id(), child.id())
            };
            if graph.has_edge(&target, &source) {
                log::debug!("{}: skipping automatic relationship to {}", parent.id(), child.id());
            } else {
                expansion.add_edge(source, target, EdgeLabel::ordering());
            }
            parents.push(child);
        }
        expansion
    }
}
