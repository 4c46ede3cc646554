//! Unit tests for `ReconnectCoordinator`
//!
//! Tests collapsing of concurrent reconnects, failure propagation, lock
//! cleanup and tombstone refusal.

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::init_logger;
use session_broker::{ReconnectCoordinator, SessionError, SessionId, TombstoneSet};

fn coordinator() -> (Arc<ReconnectCoordinator<String>>, Arc<TombstoneSet>) {
    let tombstones = Arc::new(TombstoneSet::new());
    (
        Arc::new(ReconnectCoordinator::new(Arc::clone(&tombstones))),
        tombstones,
    )
}

#[tokio::test]
async fn test_concurrent_reconnects_share_one_attempt() {
    init_logger();
    let (coordinator, _) = coordinator();
    let calls = Arc::new(AtomicUsize::new(0));
    let id = SessionId::new("shared");

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            let calls = Arc::clone(&calls);
            let id = id.clone();
            tokio::spawn(async move {
                coordinator
                    .reconnect(&id, move || async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(format!("handle-{n}"))
                    })
                    .await
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), "handle-0");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!coordinator.in_flight(&id));
}

#[tokio::test]
async fn test_failure_reaches_every_waiter_and_clears_lock() {
    let (coordinator, _) = coordinator();
    let calls = Arc::new(AtomicUsize::new(0));
    let id = SessionId::new("flaky");

    let attempt = |calls: Arc<AtomicUsize>| {
        move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            Err::<String, _>(SessionError::runtime("resume exploded"))
        }
    };

    let (a, b, c) = tokio::join!(
        coordinator.reconnect(&id, attempt(Arc::clone(&calls))),
        coordinator.reconnect(&id, attempt(Arc::clone(&calls))),
        coordinator.reconnect(&id, attempt(Arc::clone(&calls))),
    );
    for result in [a, b, c] {
        assert!(matches!(result, Err(SessionError::Runtime(ref msg)) if msg == "resume exploded"));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.in_flight_count(), 0);

    // The next attempt runs straight away instead of waiting on a stale lock
    let retry = tokio::time::timeout(
        Duration::from_secs(1),
        coordinator.reconnect(&id, || async { Ok("recovered".to_string()) }),
    )
    .await
    .expect("retry must not deadlock");
    assert_eq!(retry.unwrap(), "recovered");
}

#[tokio::test]
async fn test_tombstoned_id_is_refused_without_resuming() {
    let (coordinator, tombstones) = coordinator();
    let id = SessionId::new("gone");
    tombstones.insert(id.clone());

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let result = coordinator
        .reconnect(&id, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok("should not happen".to_string())
        })
        .await;

    assert!(matches!(result, Err(ref e) if e.is_session_ended()));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_different_ids_reconnect_independently() {
    let (coordinator, _) = coordinator();

    let spawn_reconnect = |name: &'static str| {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            coordinator
                .reconnect(&SessionId::new(name), move || async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(name.to_string())
                })
                .await
        })
    };

    let a = spawn_reconnect("a");
    let b = spawn_reconnect("b");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(coordinator.in_flight_count(), 2);

    assert_eq!(a.await.unwrap().unwrap(), "a");
    assert_eq!(b.await.unwrap().unwrap(), "b");
    assert_eq!(coordinator.in_flight_count(), 0);
}

#[tokio::test]
async fn test_panicking_attempt_releases_lock() {
    let (coordinator, _) = coordinator();
    let id = SessionId::new("panics");

    let result = coordinator
        .reconnect(&id, || async {
            if true {
                panic!("runtime blew up");
            }
            Ok(String::new())
        })
        .await;

    assert!(matches!(result, Err(SessionError::Runtime(_))));
    assert!(!coordinator.in_flight(&id));
}

#[tokio::test]
async fn test_cancelled_caller_does_not_abandon_attempt() {
    let (coordinator, _) = coordinator();
    let calls = Arc::new(AtomicUsize::new(0));
    let id = SessionId::new("impatient");

    let counter = Arc::clone(&calls);
    let first = coordinator.reconnect(&id, move || async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        counter.fetch_add(1, Ordering::SeqCst);
        Ok("done".to_string())
    });
    // Give up on the first caller long before the resume finishes
    assert!(
        tokio::time::timeout(Duration::from_millis(10), first)
            .await
            .is_err()
    );
    assert!(coordinator.in_flight(&id));

    coordinator.settle(&id).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!coordinator.in_flight(&id));
}
