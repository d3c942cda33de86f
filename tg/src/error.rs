//! Error types for scheduling runs

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why an item ended in the failed registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The final attempt exceeded its deadline
    Timeout,
    /// The computation itself returned an error on the final attempt
    Computation,
    /// A prerequisite terminated in the failed registry
    DependencyFailed,
    /// The item was cancelled through the scheduler handle
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Computation => write!(f, "computation"),
            Self::DependencyFailed => write!(f, "dependency_failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Terminal error recorded for a failed item
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
    /// Attempts consumed before the item failed (0 when it never ran)
    pub attempts: u32,
}

impl TaskError {
    pub fn timeout(timeout: std::time::Duration, attempts: u32) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            message: format!("Timed out after {:?}", timeout),
            attempts,
        }
    }

    pub fn computation(message: impl Into<String>, attempts: u32) -> Self {
        Self {
            kind: ErrorKind::Computation,
            message: message.into(),
            attempts,
        }
    }

    pub fn dependency_failed(dependency: &str) -> Self {
        Self {
            kind: ErrorKind::DependencyFailed,
            message: format!("Dependency '{}' failed", dependency),
            attempts: 0,
        }
    }

    pub fn cancelled(attempts: u32) -> Self {
        Self {
            kind: ErrorKind::Cancelled,
            message: "Cancelled".to_string(),
            attempts,
        }
    }

    /// Check if the item was never run because of a failed prerequisite
    pub fn is_dependency_failure(&self) -> bool {
        self.kind == ErrorKind::DependencyFailed
    }
}

/// Problems with a submitted item set, detected before anything runs
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("Item '{item}' depends on unknown item '{dependency}'")]
    UnknownDependency { item: String, dependency: String },

    #[error("Duplicate item id: {0}")]
    DuplicateId(String),

    #[error("Item '{0}' must allow at least one attempt")]
    ZeroRetries(String),
}

/// Failures talking to a running scheduler
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Scheduler is not running")]
    Closed,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Node registry failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlacementError {
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Task '{0}' is not assigned to any node")]
    UnknownTask(String),

    #[error("Node '{0}' has no outstanding tasks")]
    NoOutstandingTasks(String),
}
