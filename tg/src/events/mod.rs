//! Scheduler event streaming
//!
//! The scheduler and the retry executor emit a [`SchedulerEvent`] for every
//! state change; callers subscribe through [`crate::Scheduler::subscribe`]
//! and may persist a run with [`EventLogger`].

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter};
pub use logger::{EventLogger, read_events, spawn_event_logger};
pub use types::{EventLogEntry, SchedulerEvent};
