use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use vm_ferry::domain::cloud::memory_adapter::{MemoryAdapter, STATUS_BUILDING};
use vm_ferry::domain::cloud::resource_trait::{PollPolicy, ResourceAdapter, ResourceKind, wait_for_status};
use vm_ferry::error::Error;

/// An adapter whose resources never leave `build` within the test budgets.
fn stuck_compute() -> MemoryAdapter {
    MemoryAdapter::new(ResourceKind::Compute).settle_after(u32::MAX)
}

#[tokio::test(start_paused = true)]
async fn test_never_active_times_out_after_full_budget() {
    let adapter = stuck_compute();
    let id = adapter.create(&json!({"name": "web"})).await.unwrap();
    let started = Instant::now();

    let result = wait_for_status(&adapter, &id, "ACTIVE", PollPolicy::default(), &CancellationToken::new()).await;

    match result {
        Err(Error::TimeoutExceeded { resource_id, last_status, target_status, attempts }) => {
            assert_eq!(resource_id, id);
            assert_eq!(last_status, STATUS_BUILDING);
            assert_eq!(target_status, "active");
            assert_eq!(attempts, 90);
        }
        other => panic!("expected a timeout, got {:?}", other),
    }
    // 90 observations, 89 sleeps of 2s in between.
    assert_eq!(started.elapsed(), Duration::from_secs(178));
}

#[tokio::test(start_paused = true)]
async fn test_reaches_status_after_some_polls() {
    let adapter = MemoryAdapter::new(ResourceKind::Compute).settle_after(3);
    let id = adapter.create(&json!({"name": "web"})).await.unwrap();
    let started = Instant::now();

    wait_for_status(&adapter, &id, "active", PollPolicy::default(), &CancellationToken::new()).await.unwrap();

    assert_eq!(started.elapsed(), Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_interrupts_polling() {
    let adapter = Arc::new(stuck_compute());
    let id = adapter.create(&json!({"name": "web"})).await.unwrap();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = wait_for_status(adapter.as_ref(), &id, "active", PollPolicy::default(), &cancel).await;

    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_unknown_resource_is_not_retried() {
    let adapter = stuck_compute();
    let poll = PollPolicy { interval: Duration::from_millis(1), max_attempts: 5 };

    let result = wait_for_status(&adapter, "missing", "active", poll, &CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::ResourceNotFound(_))));
}
