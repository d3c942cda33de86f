//! Dependency-aware work scheduler
//!
//! Runs a set of [`WorkItem`](crate::domain::WorkItem)s with priority
//! ordering, a concurrency bound and per-item timeout and retry, starting each
//! item only after all of its dependencies completed.

mod config;
mod core;
mod graph;
mod queue;
mod retry;
mod slots;

pub use config::{ItemDefaults, SchedulerConfig};
pub use core::{RunReport, Scheduler, SchedulerHandle};
pub use graph::{topological_sort, validate_dependency_graph, validate_submission};
pub use queue::{QueueEntry, QueueState, ReadyQueue, SchedulerStats};
pub use retry::{Execution, RetryExecutor};
pub use slots::RunSlotManager;
