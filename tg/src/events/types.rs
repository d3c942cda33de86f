//! Event types for scheduler activity streaming

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Priority;
use crate::error::ErrorKind;

/// Everything observable about a scheduling run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SchedulerEvent {
    /// An item was accepted into the run
    Queued { item_id: String, priority: Priority },
    /// An item took a run slot
    Started { item_id: String },
    /// One attempt of an item began
    AttemptStarted { item_id: String, attempt: u32, max_attempts: u32 },
    /// An item reached the completed registry
    Completed { item_id: String, attempts: u32 },
    /// An item reached the failed registry
    Failed {
        item_id: String,
        kind: ErrorKind,
        message: String,
        attempts: u32,
    },
    /// An item was cancelled through the handle
    Cancelled { item_id: String, was_running: bool },
}

impl SchedulerEvent {
    /// Short name of the event variant
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Queued { .. } => "queued",
            Self::Started { .. } => "started",
            Self::AttemptStarted { .. } => "attempt_started",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// The item the event is about
    pub fn item_id(&self) -> &str {
        match self {
            Self::Queued { item_id, .. }
            | Self::Started { item_id }
            | Self::AttemptStarted { item_id, .. }
            | Self::Completed { item_id, .. }
            | Self::Failed { item_id, .. }
            | Self::Cancelled { item_id, .. } => item_id,
        }
    }

    /// Check if the event marks a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. })
    }
}

/// Event with the time it was observed, for logs and reports
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SchedulerEvent,
}

impl EventLogEntry {
    pub fn now(event: SchedulerEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}
