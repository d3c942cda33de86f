//! taskgraph - dependency-aware, concurrency-bounded task scheduling
//!
//! Work items are deferred computations with an identity, a priority, a set
//! of prerequisite identities and a per-item timeout and retry policy. The
//! [`Scheduler`] runs a validated item set so that no item starts before its
//! dependencies completed, at most `max_concurrent` items run at once, and
//! every item ends in exactly one of the completed or failed registries.
//!
//! # Modules
//!
//! - [`domain`] - work items, priorities and retry policies
//! - [`scheduler`] - ready queue, run slots, retry executor and the coordinator
//! - [`placement`] - least-loaded assignment of tasks onto capable nodes
//! - [`events`] - scheduler event streaming and JSONL event logs
//! - [`config`] - configuration types and loading
//! - [`job`] - YAML job and cluster files for the `tg` binary
//! - [`cli`] - command-line interface

pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod job;
pub mod placement;
pub mod scheduler;

// Re-export commonly used types
pub use config::Config;
pub use domain::{Computation, Priority, RetryPolicy, WorkItem, computation};
pub use error::{ConfigError, ErrorKind, PlacementError, SchedulerError, TaskError};
pub use events::{EventBus, EventLogEntry, SchedulerEvent};
pub use placement::{NodeRecord, NodeRegistry, ResourceKind, Resources, SharedNodeRegistry};
pub use scheduler::{QueueState, RunReport, Scheduler, SchedulerConfig, SchedulerHandle, SchedulerStats};
