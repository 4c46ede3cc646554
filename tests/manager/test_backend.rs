//! Unit tests for `SessionBackend`
//!
//! Tests the surface-facing API end to end against a scripted runtime:
//! capacity and idle eviction, transparent reconnects, tombstones and
//! shutdown.

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeRuntime, init_logger};
use session_broker::{
    BackendConfig, CreateSessionRequest, SessionBackend, SessionError, SessionId,
};
use tokio_test::{assert_err, assert_ok};

fn backend(runtime: &FakeRuntime, config: BackendConfig) -> Arc<SessionBackend<FakeRuntime>> {
    Arc::new(SessionBackend::new(runtime.clone(), config).expect("valid config"))
}

fn request(surface: &str) -> CreateSessionRequest {
    CreateSessionRequest::new("/work/repo", surface)
        .description("test session")
        .project_id("proj")
}

#[tokio::test]
async fn test_create_send_and_list() {
    init_logger();
    let runtime = FakeRuntime::new();
    let backend = backend(&runtime, BackendConfig::default());

    let summary = backend.create_session(request("cli")).await.unwrap();
    assert_eq!(summary.surface, "cli");
    assert_eq!(summary.project_id.as_deref(), Some("proj"));

    let reply = backend
        .send_message(&summary.session_id, "hello")
        .await
        .unwrap();
    assert!(reply.ends_with("#1: hello"));

    let active = backend.list_active_sessions();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].session_id, summary.session_id);
    assert_eq!(active[0].working_dir.to_str(), Some("/work/repo"));
    assert_eq!(runtime.creates(), 1);
    assert_eq!(runtime.resumes(), 0);
}

#[tokio::test]
async fn test_idle_sessions_are_evicted_at_capacity() {
    let runtime = FakeRuntime::new();
    let config = BackendConfig::builder()
        .max_sessions(2)
        .idle_timeout(Duration::from_millis(10))
        .build();
    let backend = backend(&runtime, config);

    let a = backend.create_session(request("slack")).await.unwrap();
    let b = backend.create_session(request("slack")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let c = backend.create_session(request("web")).await.unwrap();

    assert_eq!(backend.resident_count(), 1);
    assert!(!backend.is_resident(&a.session_id));
    assert!(!backend.is_resident(&b.session_id));
    assert!(backend.is_resident(&c.session_id));
    // Paged out, not ended
    assert!(runtime.ended().is_empty());
    assert!(!backend.is_tombstoned(&a.session_id));
}

#[tokio::test]
async fn test_capacity_error_when_nothing_is_idle() {
    let runtime = FakeRuntime::new();
    let config = BackendConfig::builder()
        .max_sessions(1)
        .idle_timeout(Duration::from_secs(60))
        .build();
    let backend = backend(&runtime, config);

    let a = backend.create_session(request("cli")).await.unwrap();
    let err = backend.create_session(request("cli")).await.unwrap_err();

    assert!(matches!(err, SessionError::MaxSessionsReached(1)));
    assert!(err.is_capacity());
    assert_eq!(backend.resident_count(), 1);
    assert!(backend.is_resident(&a.session_id));
    assert_eq!(runtime.creates(), 1);
}

#[tokio::test]
async fn test_busy_session_is_not_evicted() {
    let runtime = FakeRuntime::new().with_run_delay(Duration::from_millis(200));
    let config = BackendConfig::builder()
        .max_sessions(1)
        .idle_timeout(Duration::from_millis(10))
        .build();
    let backend = backend(&runtime, config);

    let a = backend.create_session(request("cli")).await.unwrap();
    let sending = {
        let backend = Arc::clone(&backend);
        let id = a.session_id.clone();
        tokio::spawn(async move { backend.send_message(&id, "long turn").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = backend.create_session(request("cli")).await.unwrap_err();
    assert!(matches!(err, SessionError::MaxSessionsReached(_)));
    assert_ok!(sending.await.unwrap());
}

#[tokio::test]
async fn test_concurrent_sends_to_missing_session_resume_once() {
    init_logger();
    let runtime = FakeRuntime::new().with_resume_delay(Duration::from_millis(50));
    let backend = backend(&runtime, BackendConfig::default());

    let summary = backend.create_session(request("slack")).await.unwrap();
    let id = summary.session_id;
    assert!(backend.evict(&id).await);
    assert!(!backend.is_resident(&id));

    let tasks: Vec<_> = (0..10)
        .map(|i| {
            let backend = Arc::clone(&backend);
            let id = id.clone();
            tokio::spawn(async move { backend.send_message(&id, &format!("m{i}")).await })
        })
        .collect();
    for task in tasks {
        assert_ok!(task.await.unwrap());
    }

    assert_eq!(runtime.resumes(), 1);
    assert_eq!(runtime.overlaps(), 0);
    assert!(backend.is_resident(&id));
    assert_eq!(backend.reconnects_in_flight(), 0);
}

#[tokio::test]
async fn test_resumed_session_keeps_its_origin() {
    let runtime = FakeRuntime::new();
    let backend = backend(&runtime, BackendConfig::default());

    let summary = backend.create_session(request("web")).await.unwrap();
    backend.evict(&summary.session_id).await;
    assert_ok!(backend.send_message(&summary.session_id, "back").await);

    let active = backend.list_active_sessions();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].surface, "web");
    assert_eq!(active[0].description.as_deref(), Some("test session"));
}

#[tokio::test]
async fn test_unknown_sessions_resume_transparently() {
    let runtime = FakeRuntime::new();
    runtime.seed("from-last-process");
    let backend = backend(&runtime, BackendConfig::default());

    let id = SessionId::new("from-last-process");
    let reply = backend.send_message(&id, "hi").await.unwrap();
    assert!(reply.starts_with("from-last-process#1"));
    assert_eq!(backend.list_active_sessions()[0].surface, "resumed");
}

#[tokio::test]
async fn test_different_missing_sessions_resume_in_parallel() {
    let runtime = FakeRuntime::new().with_resume_delay(Duration::from_millis(100));
    runtime.seed("x");
    runtime.seed("y");
    let backend = backend(&runtime, BackendConfig::default());

    let (x, y) = (SessionId::new("x"), SessionId::new("y"));
    let (rx, ry) = tokio::join!(backend.send_message(&x, "hi"), backend.send_message(&y, "hi"));
    assert_ok!(rx);
    assert_ok!(ry);

    assert_eq!(runtime.resumes(), 2);
    assert_eq!(runtime.max_resumes_running(), 2);
}

#[tokio::test]
async fn test_failed_resume_can_be_retried() {
    let runtime = FakeRuntime::new();
    runtime.seed("flaky");
    runtime.fail_next_resumes(1);
    let backend = backend(&runtime, BackendConfig::default());
    let id = SessionId::new("flaky");

    let err = backend.send_message(&id, "hi").await.unwrap_err();
    assert!(matches!(err, SessionError::Runtime(_)));
    assert_eq!(backend.reconnects_in_flight(), 0);
    assert!(!backend.is_resident(&id));

    assert_ok!(backend.send_message(&id, "hi again").await);
    assert_eq!(runtime.resumes(), 2);
}

#[tokio::test]
async fn test_unrecoverable_session_is_not_found() {
    let runtime = FakeRuntime::new();
    let backend = backend(&runtime, BackendConfig::default());

    let err = backend
        .send_message(&SessionId::new("never-existed"), "hi")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(backend.resident_count(), 0);
}

#[tokio::test]
async fn test_ended_session_cannot_be_resumed() {
    let runtime = FakeRuntime::new();
    let backend = backend(&runtime, BackendConfig::default());

    let summary = backend.create_session(request("cli")).await.unwrap();
    let id = summary.session_id;
    assert!(backend.end_session(&id).await);

    assert_eq!(runtime.ended(), vec![id.clone()]);
    assert!(backend.is_tombstoned(&id));
    assert!(!backend.is_resident(&id));

    let err = backend.send_message(&id, "hello?").await.unwrap_err();
    assert!(err.is_session_ended());
    assert_eq!(runtime.resumes(), 0);

    // Ending twice is harmless
    assert!(!backend.end_session(&id).await);
}

#[tokio::test]
async fn test_end_racing_a_reconnect_wins() {
    init_logger();
    let runtime = FakeRuntime::new().with_resume_delay(Duration::from_millis(100));
    runtime.seed("racy");
    let backend = backend(&runtime, BackendConfig::default());
    let id = SessionId::new("racy");

    let sending = {
        let backend = Arc::clone(&backend);
        let id = id.clone();
        tokio::spawn(async move { backend.send_message(&id, "hi").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(backend.reconnects_in_flight(), 1);

    backend.end_session(&id).await;

    let result = sending.await.unwrap();
    assert!(matches!(result, Err(ref e) if e.is_session_ended()), "{result:?}");
    assert!(!backend.is_resident(&id));
    // The handle obtained by the racing resume was ended, not leaked
    assert_eq!(runtime.ended(), vec![id.clone()]);
    assert_err!(backend.send_message(&id, "again").await);
}

#[tokio::test]
async fn test_sends_through_backend_are_serialized() {
    let runtime = FakeRuntime::new().with_run_delay(Duration::from_millis(5));
    let backend = backend(&runtime, BackendConfig::default());
    let id = backend
        .create_session(request("slack"))
        .await
        .unwrap()
        .session_id;

    let tasks: Vec<_> = (0..6)
        .map(|i| {
            let backend = Arc::clone(&backend);
            let id = id.clone();
            tokio::spawn(async move { backend.send_message(&id, &format!("m{i}")).await })
        })
        .collect();
    for task in tasks {
        assert_ok!(task.await.unwrap());
    }
    assert_eq!(runtime.overlaps(), 0);
    assert_eq!(runtime.max_runs_running(), 1);
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_work() {
    let runtime = FakeRuntime::new().with_run_delay(Duration::from_millis(100));
    let backend = backend(&runtime, BackendConfig::default());
    let id = backend
        .create_session(request("cli"))
        .await
        .unwrap()
        .session_id;

    let sending = {
        let backend = Arc::clone(&backend);
        let id = id.clone();
        tokio::spawn(async move { backend.send_message(&id, "finishing").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    backend.shutdown().await;
    assert_ok!(sending.await.unwrap());
    assert_eq!(backend.resident_count(), 0);
    // Shutdown pages sessions out; it does not end them
    assert!(runtime.ended().is_empty());
    assert!(!backend.is_tombstoned(&id));
}

#[tokio::test]
async fn test_idle_sweeper_pages_out_sessions() {
    let runtime = FakeRuntime::new();
    let config = BackendConfig::builder()
        .idle_timeout(Duration::from_millis(10))
        .sweep_interval(Duration::from_millis(20))
        .build();
    let backend = backend(&runtime, config);

    let id = backend
        .create_session(request("cli"))
        .await
        .unwrap()
        .session_id;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!backend.is_resident(&id));
    // Still resumable
    assert_ok!(backend.send_message(&id, "wake up").await);
    assert_eq!(runtime.resumes(), 1);
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = BackendConfig::builder().max_sessions(0).build();
    let result = SessionBackend::new(FakeRuntime::new(), config);
    assert!(matches!(result, Err(SessionError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_session_with_crashed_worker_is_resumed() {
    init_logger();
    let runtime = FakeRuntime::new();
    let backend = backend(&runtime, BackendConfig::default());
    let id = backend
        .create_session(request("slack"))
        .await
        .unwrap()
        .session_id;

    let crashed = backend.send_message(&id, "panic").await;
    assert!(matches!(crashed, Err(SessionError::Runtime(_))), "{crashed:?}");

    let reply = backend.send_message(&id, "still there?").await.unwrap();
    assert!(reply.ends_with("#1: still there?"), "{reply}");
    assert_eq!(runtime.resumes(), 1);
    assert!(backend.is_resident(&id));
    assert_eq!(backend.resident_count(), 1);
    // Origin survives the crash
    assert_eq!(backend.list_active_sessions()[0].surface, "slack");
}

#[tokio::test]
async fn test_unresumable_id_does_not_evict_idle_sessions() {
    let runtime = FakeRuntime::new();
    let config = BackendConfig::builder()
        .max_sessions(1)
        .idle_timeout(Duration::from_millis(10))
        .build();
    let backend = backend(&runtime, config);

    let a = backend.create_session(request("cli")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = backend
        .send_message(&SessionId::new("never-existed"), "hi")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(backend.is_resident(&a.session_id));
    assert_eq!(backend.resident_count(), 1);
}
