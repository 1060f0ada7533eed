//! End-to-end lock scenarios: the coordinator driving the in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tollgate_lock::testing::FlakyStore;
use tollgate_lock::{
    Clock, LockCoordinator, LockError, LockKey, LockOptions, LockRequest, LockedCall, ManualClock,
};
use tollgate_lock_memory::MemoryLockStore;

fn job_request(timeout: Duration) -> LockRequest {
    LockRequest::new(LockKey::new("lock", "job:42").unwrap())
        .with_expiration(Duration::from_secs(10))
        .with_timeout(timeout)
        .with_retry(Duration::from_millis(50))
}

#[tokio::test(start_paused = true)]
async fn contender_times_out_then_wins_after_release() {
    let store = Arc::new(MemoryLockStore::new());
    let a = LockCoordinator::new(store.clone());
    let b = LockCoordinator::new(store);

    let held = a.acquire(&job_request(Duration::from_secs(1))).await.unwrap();

    let started = tokio::time::Instant::now();
    let err = b
        .acquire(&job_request(Duration::from_millis(200)))
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::AcquisitionTimeout { .. }));
    assert!(started.elapsed() >= Duration::from_millis(200));

    assert!(a.release(&held).await.unwrap());

    let next = b
        .acquire(&job_request(Duration::from_millis(200)))
        .await
        .unwrap();
    assert_ne!(next.token(), held.token());
}

#[tokio::test]
async fn stale_record_is_reclaimed_and_old_release_is_refused() {
    let clock = Arc::new(ManualClock::new());
    let store = Arc::new(MemoryLockStore::with_clock(clock.clone()));
    let coordinator = LockCoordinator::new(store).with_clock(clock.clone());

    let a = coordinator
        .acquire(&job_request(Duration::from_secs(1)).with_expiration(Duration::from_secs(1)))
        .await
        .unwrap();

    clock.advance(Duration::from_millis(1100));
    assert!(a.is_expired(clock.now()));

    let b = coordinator
        .acquire(&job_request(Duration::ZERO))
        .await
        .unwrap();
    assert_ne!(a.token(), b.token());

    assert!(!coordinator.release(&a).await.unwrap());
    let err = coordinator.release_strict(&a).await.unwrap_err();
    assert!(matches!(err, LockError::AlreadyReleased(_)));

    // B still holds the lock.
    assert!(coordinator.release(&b).await.unwrap());
}

#[tokio::test]
async fn critical_sections_never_overlap() {
    let store = Arc::new(MemoryLockStore::new());
    let coordinator = LockCoordinator::new(store.clone());
    let inside = Arc::new(AtomicBool::new(false));
    let completed = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let coordinator = coordinator.clone();
        let inside = Arc::clone(&inside);
        let completed = Arc::clone(&completed);
        handles.push(tokio::spawn(async move {
            let request = LockRequest::new(LockKey::new("lock", "contention").unwrap())
                .with_expiration(Duration::from_secs(30))
                .with_timeout(Duration::from_secs(10))
                .with_retry(Duration::from_millis(5));
            coordinator
                .with_lock(&request, |_| async {
                    assert!(
                        !inside.swap(true, Ordering::SeqCst),
                        "two holders inside the critical section"
                    );
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    inside.store(false, Ordering::SeqCst);
                    completed.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .expect("should eventually acquire");
        }));
    }

    for h in handles {
        h.await.expect("task should not panic");
    }

    assert_eq!(completed.load(Ordering::SeqCst), 10);
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn same_process_contenders_get_exactly_one_winner() {
    let store = Arc::new(MemoryLockStore::new());
    let coordinator = LockCoordinator::new(store);

    let attempts = (0..8).map(|_| {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.acquire(&job_request(Duration::ZERO)).await })
    });
    let mut winners = 0;
    for attempt in attempts {
        if attempt.await.unwrap().is_ok() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn transient_outage_is_absorbed() {
    let clock = Arc::new(ManualClock::new());
    let memory = Arc::new(MemoryLockStore::with_clock(clock.clone()));
    let store = Arc::new(FlakyStore::new(memory.clone(), 4));
    let coordinator = LockCoordinator::new(store).with_clock(clock.clone());

    let handle = coordinator
        .acquire(&job_request(Duration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(clock.elapsed(), Duration::from_millis(200));
    assert_eq!(memory.len(), 1);
    assert!(coordinator.release(&handle).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn shutdown_aborts_waiting_caller() {
    let store = Arc::new(MemoryLockStore::new());
    let coordinator = LockCoordinator::new(store);
    let _held = coordinator
        .acquire(&job_request(Duration::ZERO))
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let options = LockOptions {
        prefix: String::new(),
        timeout: tollgate_lock::Interval::seconds(30),
        ..LockOptions::default()
    };
    let call = LockedCall::new(coordinator, options, |id: &str| id.to_owned())
        .with_shutdown(shutdown.clone());

    let waiter = tokio::spawn(async move { call.call("job:42", |_| async {}).await });
    tokio::time::sleep(Duration::from_millis(500)).await;
    shutdown.cancel();

    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(LockError::Cancelled(_))));
}

#[tokio::test]
async fn manual_lock_survives_scope_and_self_heals() {
    let clock = Arc::new(ManualClock::new());
    let store = Arc::new(MemoryLockStore::with_clock(clock.clone()));
    let coordinator = LockCoordinator::new(store.clone()).with_clock(clock.clone());

    let request = job_request(Duration::ZERO)
        .with_expiration(Duration::from_secs(5))
        .manually_released(true);
    let handle = coordinator
        .with_lock(&request, |handle| async move { handle })
        .await
        .unwrap();
    assert_eq!(store.len(), 1);

    // Never released: the TTL frees the key.
    clock.advance(Duration::from_secs(5));
    assert!(store.is_empty());
    let next = coordinator
        .acquire(&job_request(Duration::ZERO))
        .await
        .unwrap();
    assert_ne!(next.token(), handle.token());
}
