//! Integration tests for taskgraph
//!
//! These tests drive whole scheduling runs through the public API.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use taskgraph::{
    ConfigError, ErrorKind, Priority, RunReport, Scheduler, SchedulerConfig, SchedulerError, SchedulerEvent,
    SchedulerHandle, WorkItem,
};

type Log = Arc<Mutex<Vec<String>>>;

/// Item that logs its start and end and sleeps for `ms`
fn logged(id: &str, priority: i32, ms: u64, log: &Log) -> WorkItem<String> {
    let log = log.clone();
    let name = id.to_string();
    WorkItem::new(id, move || {
        let log = log.clone();
        let name = name.clone();
        async move {
            log.lock().unwrap().push(format!("start {}", name));
            tokio::time::sleep(Duration::from_millis(ms)).await;
            log.lock().unwrap().push(format!("end {}", name));
            Ok(name)
        }
    })
    .with_priority(Priority(priority))
    .with_retry_delay(Duration::from_millis(1))
}

fn sleeper(id: &str, ms: u64) -> WorkItem<String> {
    let value = id.to_string();
    WorkItem::new(id, move || {
        let value = value.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(value)
        }
    })
}

fn position(log: &[String], entry: &str) -> usize {
    log.iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("missing log entry {}", entry))
}

fn assert_terminal_exclusive<T>(report: &RunReport<T>, ids: &[&str]) {
    for id in ids {
        let in_completed = report.completed.contains_key(*id);
        let in_failed = report.failed.contains_key(*id);
        assert!(in_completed ^ in_failed, "{} must be in exactly one registry", id);
    }
    assert_eq!(report.completed.len() + report.failed.len(), ids.len());
}

/// Wait until the item holds a run slot
async fn wait_running<T>(handle: &SchedulerHandle<T>, id: &str) {
    for _ in 0..200 {
        let state = handle.queue_state().await.unwrap();
        if state.running.iter().any(|r| r == id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{} never started", id);
}

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn test_abc_scenario() {
    let log: Log = Arc::default();
    let items = vec![
        logged("A", 1, 10, &log),
        logged("B", 5, 10, &log),
        logged("C", 9, 10, &log).with_dependencies(["A", "B"]),
    ];

    let report = Scheduler::new(SchedulerConfig::default()).execute_all(items).await.unwrap();

    assert!(report.failed.is_empty());
    assert_eq!(report.completed["C"], "C");
    let log = log.lock().unwrap();
    assert!(position(&log, "end A") < position(&log, "start C"));
    assert!(position(&log, "end B") < position(&log, "start C"));
}

#[tokio::test]
async fn test_abc_scenario_single_slot_follows_priority() {
    let log: Log = Arc::default();
    let items = vec![
        logged("A", 1, 5, &log),
        logged("B", 5, 5, &log),
        logged("C", 9, 5, &log).with_dependencies(["A", "B"]),
    ];

    Scheduler::new(SchedulerConfig::with_max_concurrent(1))
        .execute_all(items)
        .await
        .unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec!["start B", "end B", "start A", "end A", "start C", "end C"]
    );
}

#[tokio::test]
async fn test_dependency_chain_runs_in_order() {
    let log: Log = Arc::default();
    let items = vec![
        logged("d", 100, 1, &log).with_dependency("c"),
        logged("c", 100, 1, &log).with_dependency("b"),
        logged("b", 100, 1, &log).with_dependency("a"),
        logged("a", -100, 1, &log),
    ];

    Scheduler::new(SchedulerConfig::default()).execute_all(items).await.unwrap();

    let log = log.lock().unwrap();
    let starts: Vec<_> = log.iter().filter(|e| e.starts_with("start")).cloned().collect();
    assert_eq!(starts, vec!["start a", "start b", "start c", "start d"]);
}

// =============================================================================
// Concurrency bound
// =============================================================================

#[tokio::test]
async fn test_concurrency_bound_under_random_durations() {
    let current = Arc::new(AtomicUsize::new(0));
    let observed = Arc::new(AtomicUsize::new(0));
    let mut rng = rand::rng();

    let items: Vec<WorkItem<()>> = (0..30i32)
        .map(|i| {
            let ms = rng.random_range(1..15);
            let current = current.clone();
            let observed = observed.clone();
            WorkItem::new(format!("item-{}", i), move || {
                let current = current.clone();
                let observed = observed.clone();
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    observed.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .with_priority(Priority(i % 4))
        })
        .collect();

    let report = Scheduler::new(SchedulerConfig::with_max_concurrent(4))
        .execute_all(items)
        .await
        .unwrap();

    assert_eq!(report.completed.len(), 30);
    assert!(observed.load(Ordering::SeqCst) <= 4);
    assert!(report.stats.peak_concurrent <= 4);
    assert_eq!(current.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Retry and timeout
// =============================================================================

#[tokio::test]
async fn test_retry_counts_attempts_without_leaking_slot() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let flaky = WorkItem::new("flaky", move || {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if n <= 2 {
                Err(eyre::eyre!("transient failure {}", n))
            } else {
                Ok("ok".to_string())
            }
        }
    })
    .with_priority(10)
    .with_retries(3)
    .with_retry_delay(Duration::from_millis(5));

    let hopeless = WorkItem::new("hopeless", || async { Err::<String, _>(eyre::eyre!("always")) })
        .with_priority(5)
        .with_retries(2)
        .with_retry_delay(Duration::from_millis(1));

    let items = vec![flaky, hopeless, sleeper("after-1", 1), sleeper("after-2", 1)];

    let report = Scheduler::new(SchedulerConfig::with_max_concurrent(1))
        .execute_all(items)
        .await
        .unwrap();

    assert_eq!(report.attempts["flaky"], 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.failed["hopeless"].attempts, 2);
    assert_eq!(report.failed["hopeless"].message, "always");
    assert!(report.completed.contains_key("after-1"));
    assert!(report.completed.contains_key("after-2"));
    assert_eq!(report.stats.total_attempts, 3 + 2 + 1 + 1);
    assert_terminal_exclusive(&report, &["flaky", "hopeless", "after-1", "after-2"]);
}

#[tokio::test]
async fn test_timeout_after_exhausting_retries() {
    let item = sleeper("slow", 5_000)
        .with_timeout(Duration::from_millis(20))
        .with_retries(2)
        .with_retry_delay(Duration::from_millis(1));

    let started = Instant::now();
    let report = Scheduler::new(SchedulerConfig::default())
        .execute_all(vec![item])
        .await
        .unwrap();

    let err = &report.failed["slow"];
    assert_eq!(err.kind, ErrorKind::Timeout);
    assert_eq!(err.attempts, 2);
    assert!(started.elapsed() < Duration::from_secs(2));
}

// =============================================================================
// Dependency failure and validation
// =============================================================================

#[tokio::test]
async fn test_dependency_failed_never_attempted() {
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let dependent = WorkItem::new("child", move || {
        let flag = flag.clone();
        async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }
    })
    .with_dependency("parent");
    let parent = WorkItem::new("parent", || async { Err::<(), _>(eyre::eyre!("parent broke")) })
        .with_retries(1);
    let grandchild = WorkItem::new("grandchild", || async { Ok(()) }).with_dependency("child");
    let bystander = WorkItem::new("bystander", || async { Ok(()) });

    let report = Scheduler::new(SchedulerConfig::default())
        .execute_all(vec![dependent, parent, grandchild, bystander])
        .await
        .unwrap();

    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(report.failed["child"].kind, ErrorKind::DependencyFailed);
    assert_eq!(report.failed["child"].attempts, 0);
    assert!(report.failed["child"].message.contains("parent"));
    assert_eq!(report.failed["grandchild"].kind, ErrorKind::DependencyFailed);
    assert!(report.completed.contains_key("bystander"));
    assert_terminal_exclusive(&report, &["child", "parent", "grandchild", "bystander"]);
}

#[tokio::test]
async fn test_invalid_graphs_rejected_before_execution() {
    let ran = Arc::new(AtomicBool::new(false));
    let make = |id: &str| {
        let flag = ran.clone();
        WorkItem::new(id, move || {
            let flag = flag.clone();
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        })
    };

    let cycle = vec![
        make("a").with_dependency("c"),
        make("b").with_dependency("a"),
        make("c").with_dependency("b"),
        make("free"),
    ];
    let result = Scheduler::new(SchedulerConfig::default()).execute_all(cycle).await;
    assert!(matches!(result, Err(ConfigError::Cycle(_))));

    let unknown = vec![make("a").with_dependency("missing")];
    let result = Scheduler::new(SchedulerConfig::default()).execute_all(unknown).await;
    assert!(matches!(result, Err(ConfigError::UnknownDependency { .. })));

    let zero = vec![make("a").with_retries(0)];
    let result = Scheduler::new(SchedulerConfig::default()).execute_all(zero).await;
    assert_eq!(result.unwrap_err(), ConfigError::ZeroRetries("a".into()));

    assert!(!ran.load(Ordering::SeqCst));
}

// =============================================================================
// Runtime control
// =============================================================================

#[tokio::test]
async fn test_cancel_pending_item() {
    let scheduler = Scheduler::new(SchedulerConfig::with_max_concurrent(1));
    let handle = scheduler.handle();
    let items = vec![
        sleeper("slow", 200).with_priority(10),
        sleeper("pending", 1),
        sleeper("after", 1).with_dependency("pending"),
    ];

    let run = tokio::spawn(scheduler.execute_all(items));
    assert!(handle.cancel("pending").await.unwrap());
    assert!(!handle.cancel("nonexistent").await.unwrap());

    let report = run.await.unwrap().unwrap();
    assert!(report.completed.contains_key("slow"));
    assert_eq!(report.failed["pending"].kind, ErrorKind::Cancelled);
    assert_eq!(report.failed["pending"].attempts, 0);
    assert_eq!(report.failed["after"].kind, ErrorKind::DependencyFailed);
}

#[tokio::test]
async fn test_cancel_running_item() {
    let scheduler = Scheduler::new(SchedulerConfig::default());
    let handle = scheduler.handle();
    let mut events = scheduler.subscribe();

    let started = Instant::now();
    let run = tokio::spawn(scheduler.execute_all(vec![sleeper("forever", 10_000)]));

    wait_running(&handle, "forever").await;
    assert!(handle.cancel("forever").await.unwrap());
    assert!(!handle.cancel("forever").await.unwrap());

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.failed["forever"].kind, ErrorKind::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));

    let mut cancelled = None;
    while let Ok(event) = events.try_recv() {
        if let SchedulerEvent::Cancelled { was_running, .. } = event {
            cancelled = Some(was_running);
        }
    }
    assert_eq!(cancelled, Some(true));
}

#[tokio::test]
async fn test_cancel_blocked_and_running_frees_slot() {
    let scheduler = Scheduler::new(SchedulerConfig::with_max_concurrent(1));
    let handle = scheduler.handle();

    let items = vec![
        sleeper("long", 10_000).with_priority(Priority::HIGH),
        sleeper("next", 1),
        sleeper("blocked", 1).with_dependency("long"),
        sleeper("grand", 1).with_dependency("blocked"),
    ];
    let run = tokio::spawn(scheduler.execute_all(items));

    wait_running(&handle, "long").await;
    assert!(handle.cancel("blocked").await.unwrap());
    let state = handle.queue_state().await.unwrap();
    assert!(state.blocked.is_empty());
    assert_eq!(state.running, vec!["long".to_string()]);

    assert!(handle.cancel("long").await.unwrap());

    let report = run.await.unwrap().unwrap();
    let mut completed: Vec<_> = report.completed.keys().map(String::as_str).collect();
    completed.sort();
    assert_eq!(completed, vec!["next"]);
    assert_eq!(report.failed_with(ErrorKind::Cancelled), vec!["blocked", "long"]);
    assert_eq!(report.failed_with(ErrorKind::DependencyFailed), vec!["grand"]);
    assert_eq!(report.stats.peak_concurrent, 1);
    assert_terminal_exclusive(&report, &["long", "next", "blocked", "grand"]);
}

#[tokio::test]
async fn test_submit_during_run() {
    let scheduler = Scheduler::new(SchedulerConfig::default());
    let handle = scheduler.handle();

    let run = tokio::spawn(scheduler.execute_all(vec![sleeper("first", 200)]));

    handle
        .submit(sleeper("second", 1).with_dependency("first"))
        .await
        .unwrap();

    let dup = handle.submit(sleeper("first", 1)).await;
    assert!(matches!(dup, Err(SchedulerError::Config(ConfigError::DuplicateId(_)))));

    let ghost = handle.submit(sleeper("third", 1).with_dependency("ghost")).await;
    assert!(matches!(
        ghost,
        Err(SchedulerError::Config(ConfigError::UnknownDependency { .. }))
    ));

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.completed.len(), 2);
    assert_eq!(report.completed["second"], "second");
    assert_eq!(report.stats.total_scheduled, 2);

    assert!(matches!(handle.queue_state().await, Err(SchedulerError::Closed)));
}

#[tokio::test]
async fn test_submit_after_dependency_failed() {
    let scheduler = Scheduler::new(SchedulerConfig::default());
    let handle = scheduler.handle();
    let bad = WorkItem::new("bad", || async { Err::<String, _>(eyre::eyre!("nope")) }).with_retries(1);

    let run = tokio::spawn(scheduler.execute_all(vec![bad, sleeper("keepalive", 300)]));

    for _ in 0..200 {
        if handle.queue_state().await.unwrap().stats.total_failed == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    handle.submit(sleeper("child", 1).with_dependency("bad")).await.unwrap();

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.failed["child"].kind, ErrorKind::DependencyFailed);
    assert_eq!(report.attempts["child"], 0);
}

#[tokio::test]
async fn test_queue_state_snapshot() {
    let scheduler = Scheduler::new(SchedulerConfig::with_max_concurrent(1));
    let handle = scheduler.handle();
    let items = vec![
        sleeper("slow", 200).with_priority(100),
        sleeper("q-low", 1).with_priority(1),
        sleeper("q-high", 1).with_priority(50),
        sleeper("blocked", 1).with_dependency("q-low"),
    ];

    let run = tokio::spawn(scheduler.execute_all(items));
    wait_running(&handle, "slow").await;

    let state = handle.queue_state().await.unwrap();
    assert_eq!(state.running, vec!["slow".to_string()]);
    let queued: Vec<_> = state.queued.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(queued, vec!["q-high", "q-low"]);
    assert_eq!(state.queued[0].priority, Priority(50));
    assert_eq!(state.blocked, vec!["blocked".to_string()]);
    assert_eq!(state.stats.total_scheduled, 4);

    let report = run.await.unwrap().unwrap();
    assert!(report.is_success());
}
