// Integration test for auto-restart with real processes

use launchkit::config::SupervisorConfig;
use launchkit::events::{MemorySink, Notification};
use launchkit::process::{ProcessSupervisor, RestartPolicy};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        kill_timeout_ms: 300,
        log_batch_interval_ms: 20,
        reader_drain_ms: 50,
        ..SupervisorConfig::default()
    }
}

async fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test]
async fn test_crash_loop_gives_up_after_max_retries() {
    let temp_dir = TempDir::new().unwrap();
    let sink = Arc::new(MemorySink::new());
    let supervisor = ProcessSupervisor::new(fast_config(), sink.clone());
    let policy = RestartPolicy::new().with_max_retries(2).with_delay_ms(20);

    let id = supervisor
        .start(temp_dir.path(), "exit 7", Some(policy), None)
        .process_id
        .unwrap();

    assert!(supervisor.wait_idle(Duration::from_secs(5)).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let crashes = sink.crashes();
    assert_eq!(crashes.len(), 3);
    assert!(crashes.iter().all(|c| c.process_id == id && c.exit_code == Some(7)));
    assert_eq!(
        crashes.iter().map(|c| c.will_restart).collect::<Vec<_>>(),
        vec![true, true, false]
    );

    let retries: Vec<u32> = sink.restarts().iter().map(|r| r.retry_count).collect();
    assert_eq!(retries, vec![1, 2]);
    assert!(sink.restarts().iter().all(|r| r.max_retries == 2));
}

#[tokio::test]
async fn test_crash_precedes_its_restart() {
    let temp_dir = TempDir::new().unwrap();
    let sink = Arc::new(MemorySink::new());
    let supervisor = ProcessSupervisor::new(fast_config(), sink.clone());
    let policy = RestartPolicy::new().with_max_retries(1).with_delay_ms(20);

    supervisor.start(temp_dir.path(), "kill -9 $$", Some(policy), None);
    assert!(supervisor.wait_idle(Duration::from_secs(5)).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let order: Vec<&'static str> = sink
        .events()
        .iter()
        .filter(|n| !matches!(n, Notification::LogBatch(_)))
        .map(Notification::name)
        .collect();
    assert_eq!(order, vec!["process-crash", "process-restart", "process-crash"]);

    let crashes = sink.crashes();
    assert_eq!(crashes[0].signal.as_deref(), Some("SIGKILL"));
    assert_eq!(crashes[0].exit_code, None);
}

#[tokio::test]
async fn test_long_runs_reset_the_retry_streak() {
    let temp_dir = TempDir::new().unwrap();
    let sink = Arc::new(MemorySink::new());
    let supervisor = ProcessSupervisor::new(fast_config(), sink.clone());
    // Each run outlives reset_after, so the streak never builds up
    let policy = RestartPolicy::new()
        .with_max_retries(1)
        .with_delay_ms(10)
        .with_reset_after_ms(100);

    let id = supervisor
        .start(temp_dir.path(), "sleep 0.3; exit 1", Some(policy), None)
        .process_id
        .unwrap();

    assert!(wait_until(Duration::from_secs(10), || sink.restarts().len() >= 3).await);
    assert!(sink.restarts().iter().all(|r| r.retry_count == 1));
    assert!(sink.crashes().iter().all(|c| c.will_restart));

    supervisor.stop(&id);
    assert!(supervisor.wait_idle(Duration::from_secs(3)).await);
}

#[tokio::test]
async fn test_disabled_policy_never_restarts() {
    let temp_dir = TempDir::new().unwrap();
    let sink = Arc::new(MemorySink::new());
    let supervisor = ProcessSupervisor::new(fast_config(), sink.clone());

    supervisor.start(temp_dir.path(), "exit 2", Some(RestartPolicy::disabled()), None);
    assert!(supervisor.wait_idle(Duration::from_secs(3)).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(sink.crashes().len(), 1);
    assert!(!sink.crashes()[0].will_restart);
    assert!(sink.restarts().is_empty());
}
