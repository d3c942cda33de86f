//! Node records and typed resource capabilities

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A kind of resource a node offers or a task requires
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceKind {
    Cpu,
    Memory,
    Gpu,
    Disk,
    Custom(String),
}

impl FromStr for ResourceKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "cpu" => Self::Cpu,
            "memory" | "mem" => Self::Memory,
            "gpu" => Self::Gpu,
            "disk" => Self::Disk,
            _ => Self::Custom(s.to_string()),
        })
    }
}

impl From<String> for ResourceKind {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(kind) => kind,
            Err(never) => match never {},
        }
    }
}

impl From<&str> for ResourceKind {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<ResourceKind> for String {
    fn from(kind: ResourceKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Memory => write!(f, "memory"),
            Self::Gpu => write!(f, "gpu"),
            Self::Disk => write!(f, "disk"),
            Self::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Capacity per resource kind; also used for task requirements
pub type Resources = HashMap<ResourceKind, f64>;

/// Build a [`Resources`] map from `(kind, amount)` pairs
pub fn resources<K, I>(pairs: I) -> Resources
where
    K: Into<ResourceKind>,
    I: IntoIterator<Item = (K, f64)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// One registered execution node
#[derive(Debug, Clone, Serialize)]
pub struct NodeRecord {
    pub id: String,

    pub capabilities: Resources,

    #[serde(rename = "tasks-assigned")]
    pub tasks_assigned: u64,

    #[serde(rename = "tasks-completed")]
    pub tasks_completed: u64,

    /// Position in registration order, used to break score ties
    #[serde(skip)]
    pub(crate) order: usize,

    #[serde(rename = "last-heartbeat")]
    pub last_heartbeat: DateTime<Utc>,
}

impl NodeRecord {
    pub(crate) fn new(id: String, capabilities: Resources, order: usize) -> Self {
        Self {
            id,
            capabilities,
            tasks_assigned: 0,
            tasks_completed: 0,
            order,
            last_heartbeat: Utc::now(),
        }
    }

    /// Outstanding tasks
    pub fn load(&self) -> u64 {
        self.tasks_assigned - self.tasks_completed
    }

    /// Placement score; higher means less loaded
    pub fn score(&self) -> f64 {
        1.0 / (self.load() as f64 + 1.0)
    }

    /// Check if every requirement is offered with enough capacity
    pub fn satisfies(&self, requirements: &Resources) -> bool {
        requirements.iter().all(|(kind, required)| {
            self.capabilities
                .get(kind)
                .is_some_and(|available| available >= required)
        })
    }
}
