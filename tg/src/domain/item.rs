//! WorkItem - one schedulable unit of deferred computation

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};

use super::priority::Priority;

/// Future produced by one invocation of a computation
pub type ComputationFuture<T> = BoxFuture<'static, eyre::Result<T>>;

/// Re-invocable deferred computation; every attempt calls it afresh
pub type Computation<T> = Arc<dyn Fn() -> ComputationFuture<T> + Send + Sync>;

/// Wrap an async closure as a [`Computation`]
pub fn computation<T, F, Fut>(f: F) -> Computation<T>
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = eyre::Result<T>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Default attempt count for new items
pub const DEFAULT_RETRIES: u32 = 3;

/// Default pause between attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Timeout and retry settings for a single item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (at least 1)
    pub retries: u32,
    /// Fixed pause between attempts
    pub retry_delay: Duration,
    /// Per-attempt deadline
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            timeout: None,
        }
    }
}

/// A schedulable unit of work producing a `T`
pub struct WorkItem<T> {
    /// Unique identity, the join key for dependencies and results
    pub id: String,

    /// Higher priority starts first among runnable items
    pub priority: Priority,

    /// Identities that must complete before this item may start
    pub dependencies: Vec<String>,

    /// Per-attempt deadline
    pub timeout: Option<Duration>,

    /// Maximum attempt count
    pub retries: u32,

    /// Pause between attempts
    pub retry_delay: Duration,

    computation: Computation<T>,
}

impl<T: Send + 'static> WorkItem<T> {
    /// Create an item with default priority and retry policy
    pub fn new<F, Fut>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = eyre::Result<T>> + Send + 'static,
    {
        Self::from_computation(id, computation(f))
    }
}

impl<T> WorkItem<T> {
    /// Create an item around an existing computation handle
    pub fn from_computation(id: impl Into<String>, computation: Computation<T>) -> Self {
        let policy = RetryPolicy::default();
        Self {
            id: id.into(),
            priority: Priority::default(),
            dependencies: Vec::new(),
            timeout: policy.timeout,
            retries: policy.retries,
            retry_delay: policy.retry_delay,
            computation,
        }
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = priority.into();
        self
    }

    /// Add a dependency (duplicates are ignored)
    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.add_dependency(id);
        self
    }

    /// Add several dependencies
    pub fn with_dependencies<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in ids {
            self.add_dependency(id);
        }
        self
    }

    /// Set the per-attempt deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the maximum attempt count
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the pause between attempts
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Apply a whole retry policy at once
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.retries = policy.retries;
        self.retry_delay = policy.retry_delay;
        self.timeout = policy.timeout;
        self
    }

    pub fn add_dependency(&mut self, id: impl Into<String>) {
        let id = id.into();
        if !self.dependencies.contains(&id) {
            self.dependencies.push(id);
        }
    }

    /// Current timeout/retry settings
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            retry_delay: self.retry_delay,
            timeout: self.timeout,
        }
    }

    /// Shared handle to the computation
    pub fn computation(&self) -> Computation<T> {
        self.computation.clone()
    }
}

impl<T> std::fmt::Debug for WorkItem<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("dependencies", &self.dependencies)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}
