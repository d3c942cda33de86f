//! Scheduler implementation
//!
//! A single coordinator task owns the ready queue, run slots, dependency
//! bookkeeping and both registries. Executions run as spawned tasks and
//! report back over a channel; nothing else mutates scheduler state.

use std::collections::{HashMap, HashSet};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::WorkItem;
use crate::error::{ConfigError, ErrorKind, SchedulerError, TaskError};
use crate::events::{EventBus, EventEmitter, SchedulerEvent};

use super::config::SchedulerConfig;
use super::graph::{validate_dependency_graph, validate_submission};
use super::queue::{QueueEntry, QueueState, ReadyQueue, SchedulerStats};
use super::retry::{Execution, RetryExecutor};
use super::slots::RunSlotManager;

/// Final result of a scheduling run
#[derive(Debug)]
pub struct RunReport<T> {
    /// Results of items that completed
    pub completed: HashMap<String, T>,

    /// Terminal errors of items that failed
    pub failed: HashMap<String, TaskError>,

    /// Attempts consumed per item
    pub attempts: HashMap<String, u32>,

    pub stats: SchedulerStats,
}

impl<T> RunReport<T> {
    /// Check if every item completed
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Failed ids with the given error kind, sorted
    pub fn failed_with(&self, kind: ErrorKind) -> Vec<&str> {
        let mut ids: Vec<_> = self
            .failed
            .iter()
            .filter(|(_, err)| err.kind == kind)
            .map(|(id, _)| id.as_str())
            .collect();
        ids.sort();
        ids
    }
}

/// Requests from a [`SchedulerHandle`] to the running coordinator
pub(crate) enum SchedulerRequest<T> {
    Submit {
        item: WorkItem<T>,
        reply: oneshot::Sender<Result<(), ConfigError>>,
    },
    Cancel {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    GetState {
        reply: oneshot::Sender<QueueState>,
    },
}

/// Message from an execution task back to the coordinator
struct Completion<T> {
    id: String,
    execution: Execution<T>,
}

/// A spawned execution and the emitter counting its attempts
struct RunningItem {
    handle: JoinHandle<()>,
    emitter: EventEmitter,
}

/// An item waiting on dependencies that have not completed yet
struct BlockedItem<T> {
    item: WorkItem<T>,
    waiting_on: HashSet<String>,
}

/// Dependency-aware scheduler with bounded concurrency and per-item retries
pub struct Scheduler<T> {
    config: SchedulerConfig,
    events: EventBus,
    tx: mpsc::Sender<SchedulerRequest<T>>,
    rx: mpsc::Receiver<SchedulerRequest<T>>,
}

impl<T: Send + 'static> Scheduler<T> {
    /// Create a new scheduler with the given configuration
    pub fn new(config: SchedulerConfig) -> Self {
        debug!(?config, "Scheduler::new: called");
        let (tx, rx) = mpsc::channel(config.channel_buffer.max(1));
        Self {
            events: EventBus::new(config.event_capacity),
            config,
            tx,
            rx,
        }
    }

    /// Handle for submitting, cancelling and inspecting during a run
    pub fn handle(&self) -> SchedulerHandle<T> {
        SchedulerHandle { tx: self.tx.clone() }
    }

    /// Subscribe to scheduler events
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// Run every item to a terminal state
    ///
    /// The item set is validated first; a cycle, unknown dependency,
    /// duplicate identity or zero-attempt item rejects the whole run before
    /// anything executes. The run ends once nothing is queued, blocked or
    /// running. Handle requests made afterwards fail with
    /// [`SchedulerError::Closed`].
    pub async fn execute_all(self, items: Vec<WorkItem<T>>) -> Result<RunReport<T>, ConfigError> {
        debug!(count = items.len(), "Scheduler::execute_all: called");
        validate_dependency_graph(&items)?;

        let Self { config, events, tx, mut rx } = self;
        // Only handles keep the request channel open from here on
        drop(tx);

        let (done_tx, done_rx) = mpsc::channel(config.channel_buffer.max(1));
        let mut run = RunState::new(&config, events, done_tx);

        info!(items = items.len(), max_concurrent = run.slots.max(), "Scheduling run started");
        for item in items {
            run.admit(item);
        }

        run.drive(&config, &mut rx, done_rx).await;
        let report = run.into_report();

        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            attempts = report.stats.total_attempts,
            "Scheduling run finished"
        );
        Ok(report)
    }
}

/// Mutable state of one run, owned by the coordinator loop
struct RunState<T> {
    queue: ReadyQueue<T>,
    slots: RunSlotManager,
    blocked: HashMap<String, BlockedItem<T>>,
    /// identity -> items still waiting on it
    dependents: HashMap<String, Vec<String>>,
    running: HashMap<String, RunningItem>,
    known: HashSet<String>,
    completed: HashMap<String, T>,
    failed: HashMap<String, TaskError>,
    attempts: HashMap<String, u32>,
    stats: SchedulerStats,
    events: EventBus,
    done_tx: mpsc::Sender<Completion<T>>,
}

impl<T: Send + 'static> RunState<T> {
    fn new(config: &SchedulerConfig, events: EventBus, done_tx: mpsc::Sender<Completion<T>>) -> Self {
        if config.max_concurrent == 0 {
            warn!("max_concurrent is 0, running one item at a time");
        }
        Self {
            queue: ReadyQueue::new(),
            slots: RunSlotManager::new(config.max_concurrent.max(1)),
            blocked: HashMap::new(),
            dependents: HashMap::new(),
            running: HashMap::new(),
            known: HashSet::new(),
            completed: HashMap::new(),
            failed: HashMap::new(),
            attempts: HashMap::new(),
            stats: SchedulerStats::default(),
            events,
            done_tx,
        }
    }

    async fn drive(
        &mut self,
        config: &SchedulerConfig,
        requests: &mut mpsc::Receiver<SchedulerRequest<T>>,
        mut done_rx: mpsc::Receiver<Completion<T>>,
    ) {
        let poll_interval = config.poll_interval();

        loop {
            while let Ok(request) = requests.try_recv() {
                self.handle_request(request);
            }

            self.dispatch();

            if self.queue.is_empty() && self.running.is_empty() {
                if self.blocked.is_empty() {
                    break;
                }
                self.fail_stalled();
                continue;
            }

            tokio::select! {
                Some(done) = done_rx.recv() => self.on_completion(done),
                Some(request) = requests.recv() => self.handle_request(request),
                _ = tokio::time::sleep(poll_interval) => {
                    debug!(
                        queued = self.queue.len(),
                        running = self.running.len(),
                        blocked = self.blocked.len(),
                        "RunState::drive: idle poll"
                    );
                }
            }
        }
    }

    /// Accept a validated item into the run
    fn admit(&mut self, item: WorkItem<T>) {
        debug!(id = %item.id, priority = %item.priority, deps = ?item.dependencies, "RunState::admit: called");
        self.known.insert(item.id.clone());
        self.stats.total_scheduled += 1;
        self.events.emit(SchedulerEvent::Queued {
            item_id: item.id.clone(),
            priority: item.priority,
        });

        if let Some(dep) = item.dependencies.iter().find(|dep| self.failed.contains_key(dep.as_str())) {
            let err = TaskError::dependency_failed(dep);
            let id = item.id.clone();
            self.record_failure(&id, err);
            return;
        }

        let waiting_on: HashSet<String> = item
            .dependencies
            .iter()
            .filter(|dep| !self.completed.contains_key(dep.as_str()))
            .cloned()
            .collect();

        if waiting_on.is_empty() {
            self.enqueue(item);
            return;
        }

        for dep in &waiting_on {
            self.dependents.entry(dep.clone()).or_default().push(item.id.clone());
        }
        debug!(id = %item.id, waiting_on = waiting_on.len(), "RunState::admit: blocked on dependencies");
        self.blocked.insert(item.id.clone(), BlockedItem { item, waiting_on });
    }

    fn enqueue(&mut self, item: WorkItem<T>) {
        self.queue.push(item);
        self.stats.peak_queue_depth = self.stats.peak_queue_depth.max(self.queue.len());
    }

    /// Start queued items while slots are free
    fn dispatch(&mut self) {
        while self.slots.available() > 0 {
            let Some(item) = self.queue.pop() else {
                break;
            };
            if !self.slots.try_acquire(&item.id) {
                self.queue.push(item);
                break;
            }
            self.start(item);
        }
        self.stats.peak_concurrent = self.slots.peak();
    }

    fn start(&mut self, item: WorkItem<T>) {
        debug!(id = %item.id, priority = %item.priority, "RunState::start: called");
        self.events.emit(SchedulerEvent::Started {
            item_id: item.id.clone(),
        });

        let emitter = self.events.emitter_for(&item.id);
        let executor = RetryExecutor::with_emitter(emitter.clone());
        let done_tx = self.done_tx.clone();
        let id = item.id.clone();
        let policy = item.policy();
        let computation = item.computation();

        let handle = tokio::spawn(async move {
            let execution = executor.run(&id, policy, computation).await;
            // Closed only when the run was torn down
            let _ = done_tx.send(Completion { id, execution }).await;
        });

        self.running.insert(item.id, RunningItem { handle, emitter });
    }

    fn on_completion(&mut self, done: Completion<T>) {
        let Completion { id, execution } = done;
        if self.running.remove(&id).is_none() {
            debug!(%id, "RunState::on_completion: item no longer running, discarding result");
            return;
        }
        self.slots.release(&id);
        self.stats.total_attempts += u64::from(execution.attempts);
        self.attempts.insert(id.clone(), execution.attempts);

        match execution.outcome {
            Ok(value) => {
                info!(%id, attempts = execution.attempts, "Item completed");
                self.completed.insert(id.clone(), value);
                self.stats.total_completed += 1;
                self.events.emit(SchedulerEvent::Completed {
                    item_id: id.clone(),
                    attempts: execution.attempts,
                });
                self.wake_dependents(&id);
            }
            Err(err) => self.record_failure(&id, err),
        }
    }

    /// Move dependents whose last dependency just completed into the queue
    fn wake_dependents(&mut self, completed_id: &str) {
        let Some(waiting) = self.dependents.remove(completed_id) else {
            return;
        };

        for dependent in waiting {
            let ready = match self.blocked.get_mut(&dependent) {
                Some(blocked) => {
                    blocked.waiting_on.remove(completed_id);
                    blocked.waiting_on.is_empty()
                }
                None => false,
            };
            if ready && let Some(blocked) = self.blocked.remove(&dependent) {
                debug!(id = %dependent, depends_on = %completed_id, "Waking dependent item");
                self.enqueue(blocked.item);
            }
        }
    }

    /// Record a terminal failure and fail every blocked dependent with it
    fn record_failure(&mut self, id: &str, err: TaskError) {
        let mut pending = vec![(id.to_string(), err)];

        while let Some((id, err)) = pending.pop() {
            if err.kind == ErrorKind::Cancelled {
                info!(%id, "Item cancelled");
            } else {
                warn!(%id, kind = %err.kind, error = %err.message, attempts = err.attempts, "Item failed");
                self.events.emit(SchedulerEvent::Failed {
                    item_id: id.clone(),
                    kind: err.kind,
                    message: err.message.clone(),
                    attempts: err.attempts,
                });
            }
            self.attempts.entry(id.clone()).or_insert(err.attempts);
            self.failed.insert(id.clone(), err);
            self.stats.total_failed += 1;

            for dependent in self.dependents.remove(&id).unwrap_or_default() {
                if self.blocked.remove(&dependent).is_some() {
                    pending.push((dependent, TaskError::dependency_failed(&id)));
                }
            }
        }
    }

    /// Blocked items with nothing left that could unblock them
    fn fail_stalled(&mut self) {
        let stalled: Vec<String> = self.blocked.keys().cloned().collect();
        error!(?stalled, "Blocked items can never become runnable");
        for id in stalled {
            if let Some(blocked) = self.blocked.remove(&id) {
                let dep = blocked.waiting_on.iter().next().cloned().unwrap_or_default();
                self.record_failure(&id, TaskError::dependency_failed(&dep));
            }
        }
    }

    fn handle_request(&mut self, request: SchedulerRequest<T>) {
        match request {
            SchedulerRequest::Submit { item, reply } => {
                let result = validate_submission(&item, |id| self.known.contains(id));
                match &result {
                    Ok(()) => self.admit(item),
                    Err(e) => warn!(id = %item.id, error = %e, "Submission rejected"),
                }
                let _ = reply.send(result);
            }
            SchedulerRequest::Cancel { id, reply } => {
                let _ = reply.send(self.cancel(&id));
            }
            SchedulerRequest::GetState { reply } => {
                let _ = reply.send(self.queue_state());
            }
        }
    }

    fn cancel(&mut self, id: &str) -> bool {
        debug!(%id, "RunState::cancel: called");
        let (was_running, attempts) = if self.queue.remove(id).is_some() || self.blocked.remove(id).is_some() {
            (false, 0)
        } else if let Some(running) = self.running.remove(id) {
            running.handle.abort();
            self.slots.release(id);
            let attempts = running.emitter.attempts_started();
            self.stats.total_attempts += u64::from(attempts);
            (true, attempts)
        } else {
            debug!(%id, "RunState::cancel: not pending or running");
            return false;
        };

        self.events.emit(SchedulerEvent::Cancelled {
            item_id: id.to_string(),
            was_running,
        });
        self.record_failure(id, TaskError::cancelled(attempts));
        true
    }

    fn queue_state(&self) -> QueueState {
        let mut blocked: Vec<_> = self.blocked.keys().cloned().collect();
        blocked.sort();
        QueueState {
            running: self.slots.running_ids(),
            queued: self
                .queue
                .entries()
                .into_iter()
                .map(|(id, priority)| QueueEntry { id, priority })
                .collect(),
            blocked,
            stats: self.stats.clone(),
        }
    }

    fn into_report(self) -> RunReport<T> {
        RunReport {
            completed: self.completed,
            failed: self.failed,
            attempts: self.attempts,
            stats: self.stats,
        }
    }
}

/// Cloneable client for a scheduler run
pub struct SchedulerHandle<T> {
    tx: mpsc::Sender<SchedulerRequest<T>>,
}

impl<T> Clone for SchedulerHandle<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T> SchedulerHandle<T> {
    /// Add an item to the run
    ///
    /// Its dependencies must name items already submitted.
    pub async fn submit(&self, item: WorkItem<T>) -> Result<(), SchedulerError> {
        debug!(id = %item.id, "SchedulerHandle::submit: called");
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(SchedulerRequest::Submit { item, reply })
            .await
            .map_err(|_| SchedulerError::Closed)?;
        reply_rx.await.map_err(|_| SchedulerError::Closed)??;
        Ok(())
    }

    /// Cancel a pending or running item
    ///
    /// Returns `false` when the item is unknown or already terminal.
    pub async fn cancel(&self, id: &str) -> Result<bool, SchedulerError> {
        debug!(%id, "SchedulerHandle::cancel: called");
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(SchedulerRequest::Cancel {
                id: id.to_string(),
                reply,
            })
            .await
            .map_err(|_| SchedulerError::Closed)?;
        reply_rx.await.map_err(|_| SchedulerError::Closed)
    }

    /// Snapshot of queued, blocked and running items
    pub async fn queue_state(&self) -> Result<QueueState, SchedulerError> {
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(SchedulerRequest::GetState { reply })
            .await
            .map_err(|_| SchedulerError::Closed)?;
        reply_rx.await.map_err(|_| SchedulerError::Closed)
    }
}
