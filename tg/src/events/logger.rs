//! Event Logger - persists a run's events to a JSONL file
//!
//! The EventLogger consumes a scheduler subscription and appends every event,
//! timestamped, as one JSON line for later inspection or replay.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::types::{EventLogEntry, SchedulerEvent};

/// Event logger that writes events to a JSONL file
pub struct EventLogger {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl EventLogger {
    /// Open (or create) the log file for appending
    pub fn open(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!(?path, "EventLogger::open: called");
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one event as a JSON line
    pub fn write_event(&mut self, event: &SchedulerEvent) -> eyre::Result<()> {
        let entry = EventLogEntry::now(event.clone());
        let json = serde_json::to_string(&entry)?;
        writeln!(self.writer, "{}", json)?;
        self.written += 1;

        // Terminal events are the ones worth seeing promptly
        if event.is_terminal() {
            self.writer.flush()?;
        }
        Ok(())
    }

    /// Consume events until every sender is gone; returns the count written
    ///
    /// This is meant to be spawned as a background task.
    pub async fn run(mut self, mut rx: broadcast::Receiver<SchedulerEvent>) -> usize {
        debug!(path = ?self.path, "EventLogger::run: starting event logger");

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(e) = self.write_event(&event) {
                        error!(item_id = event.item_id(), error = %e, "EventLogger: failed to write event");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "EventLogger: lagged behind, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventLogger: channel closed, shutting down");
                    break;
                }
            }
        }

        if let Err(e) = self.writer.flush() {
            error!(path = ?self.path, error = %e, "EventLogger: failed to flush");
        }
        self.written
    }
}

/// Read events back from a log file
///
/// Unparseable lines are skipped with a warning.
pub fn read_events(path: impl AsRef<Path>) -> eyre::Result<Vec<EventLogEntry>> {
    let path = path.as_ref();
    debug!(?path, "read_events: reading log file");

    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)?;
    let mut entries = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(line, error = %e, "read_events: failed to parse line");
            }
        }
    }

    debug!(count = entries.len(), "read_events: loaded entries");
    Ok(entries)
}

/// Spawn an event logger for a subscription as a background task
pub fn spawn_event_logger(
    rx: broadcast::Receiver<SchedulerEvent>,
    path: impl AsRef<Path>,
) -> eyre::Result<tokio::task::JoinHandle<usize>> {
    let logger = EventLogger::open(path)?;
    Ok(tokio::spawn(logger.run(rx)))
}
