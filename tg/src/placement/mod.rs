//! Task placement onto a pool of capability-described nodes

mod node;
mod registry;

pub use node::{NodeRecord, ResourceKind, Resources, resources};
pub use registry::{NodeRegistry, SharedNodeRegistry};
