//! # Converge
//!
//! A convergence engine: given a catalog of declared resources and the
//! dependency relationships between them, bring the live system to the
//! declared state, one resource at a time, in dependency order.
//!
//! ## Core Concepts
//!
//! - **Resource**: Something with declared and live state (files,
//!   packages, services), compared property by property
//! - **RelationshipGraph**: A directed multigraph over resource
//!   identities; an edge `a -> b` means `a` converges before `b`
//! - **Scheduler**: Yields resources whose dependencies are done, in a
//!   deterministic order, expanding the graph mid-run when asked
//! - **Transaction**: One run end to end: splice, generate, cycle
//!   check, prefetch, traverse
//! - **ResourceHarness**: Evaluates a single resource into events,
//!   containing failures and persisting audit state between runs
//!
//! ## Example
//!
//! ```ignore
//! use converge::{
//!     MemoryStorage, RelationshipGraph, ResourceHarness, Transaction,
//!     TransactionOptions,
//! };
//!
//! let graph = build_relationships(&catalog);
//! let harness = ResourceHarness::new(Box::new(MemoryStorage::new()));
//! let report = Transaction::new(&catalog, graph, harness, TransactionOptions::default())
//!     .evaluate()?;
//! for status in report.statuses() {
//!     println!("{}: changed={}", status.resource, status.changed);
//! }
//! ```
//!
//! ## Collaborator Traits
//!
//! The engine owns ordering and diffing, never resource semantics.
//! Everything domain-specific arrives through traits:
//!
//! - [`Resource`] / [`Property`]: declared state, live state, and how
//!   to converge one attribute
//! - [`Provider`]: batch prefetch for a class of resources
//! - [`Catalog`]: the resource set for one run
//! - [`Storage`]: persisted audit snapshots and timestamps
//! - [`EventSink`]: delivery of refresh notifications
//!
//! The engine is strictly single-threaded per run; determinism comes
//! from ordering by a content hash of resource identities, never from
//! map iteration order.

pub mod change;
pub mod event;
pub mod graph;
pub mod harness;
pub mod resource;
pub mod scheduler;
pub mod sentinel;
pub mod sink;
pub mod storage;
pub mod transaction;

// Re-export main types at crate root
pub use change::Change;
pub use event::{Event, EventStatus, Report, ResourceStatus};
pub use graph::cycle::CycleError;
pub use graph::{Callback, Direction, Edge, EdgeLabel, EventFilter, RelationshipGraph};
pub use harness::ResourceHarness;
pub use resource::{Catalog, CatalogError, ENSURE, Property, PropertyValue, Provider, Resource};
pub use scheduler::{Expansion, Scheduler};
pub use sentinel::SentinelResource;
pub use sink::{EventSink, NullEventSink};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use transaction::{Transaction, TransactionError, TransactionOptions};
