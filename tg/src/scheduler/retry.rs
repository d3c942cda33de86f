//! RetryExecutor - timeout and bounded retry around one computation

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{debug, warn};

use crate::domain::{Computation, RetryPolicy};
use crate::error::TaskError;
use crate::events::EventEmitter;

/// Outcome of running one item to a terminal state
#[derive(Debug)]
pub struct Execution<T> {
    pub outcome: Result<T, TaskError>,
    /// Attempts made, including the successful one
    pub attempts: u32,
}

/// Runs a computation with per-attempt timeout and fixed-delay retries
#[derive(Clone, Default)]
pub struct RetryExecutor {
    emitter: Option<EventEmitter>,
}

impl RetryExecutor {
    pub fn new() -> Self {
        Self { emitter: None }
    }

    /// Publish an `AttemptStarted` event before every attempt
    pub fn with_emitter(emitter: EventEmitter) -> Self {
        Self { emitter: Some(emitter) }
    }

    /// Run until success or until `policy.retries` attempts have failed
    pub async fn run<T>(&self, id: &str, policy: RetryPolicy, computation: Computation<T>) -> Execution<T> {
        // at least one attempt
        let max_attempts = policy.retries.max(1);
        debug!(%id, max_attempts, timeout = ?policy.timeout, "RetryExecutor::run: called");

        let mut attempt = 0;
        loop {
            attempt += 1;
            if let Some(emitter) = &self.emitter {
                emitter.attempt_started(attempt, max_attempts);
            }

            match run_attempt(&policy, &computation, attempt).await {
                Ok(value) => {
                    debug!(%id, attempt, "RetryExecutor::run: attempt succeeded");
                    return Execution {
                        outcome: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(err) if attempt >= max_attempts => {
                    warn!(%id, attempt, kind = %err.kind, error = %err.message, "Retries exhausted");
                    return Execution {
                        outcome: Err(err),
                        attempts: attempt,
                    };
                }
                Err(err) => {
                    warn!(
                        %id,
                        attempt,
                        kind = %err.kind,
                        error = %err.message,
                        retry_delay = ?policy.retry_delay,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(policy.retry_delay).await;
                }
            }
        }
    }
}

/// One bounded invocation; panics count as computation failures
async fn run_attempt<T>(policy: &RetryPolicy, computation: &Computation<T>, attempt: u32) -> Result<T, TaskError> {
    let fut = AssertUnwindSafe(computation()).catch_unwind();

    let result = match policy.timeout {
        Some(timeout) => match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => return Err(TaskError::timeout(timeout, attempt)),
        },
        None => fut.await,
    };

    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TaskError::computation(format!("{:#}", err), attempt)),
        Err(panic) => Err(TaskError::computation(
            format!("Computation panicked: {}", panic_message(panic.as_ref())),
            attempt,
        )),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
