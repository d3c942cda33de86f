//! Domain types for taskgraph
//!
//! Core domain types: WorkItem, Priority, RetryPolicy

mod item;
mod priority;

pub use item::{
    Computation, ComputationFuture, DEFAULT_RETRIES, DEFAULT_RETRY_DELAY, RetryPolicy, WorkItem, computation,
};
pub use priority::Priority;
