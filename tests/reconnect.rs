use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use scan_ws::core::{ConnectionState, RetryConfig, Scope, SessionConfig};
use scan_ws::dispatch::{EventPayload, event};
use scan_ws::session::SessionHandle;
use scan_ws::testing::MockTransport;

fn quick_retry(max_attempts: u32) -> SessionConfig {
    SessionConfig {
        retry: RetryConfig {
            base: Duration::from_millis(5),
            cap: Duration::from_millis(40),
            max_attempts,
        },
        heartbeat_interval: Duration::from_secs(60),
        ..SessionConfig::default()
    }
}

async fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !predicate() {
        if Instant::now() >= deadline {
            panic!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn recovers_after_a_server_side_socket_drop() {
    let (transport, mut server) = MockTransport::pair();
    let handle = SessionHandle::spawn(Scope::Dashboard, quick_retry(5), transport, None);

    let connected = Arc::new(AtomicUsize::new(0));
    let disconnected = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connected);
    let _c = handle.dispatcher().subscribe(
        event::CONNECTED,
        Arc::new(move |_: &EventPayload| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );
    let counter = Arc::clone(&disconnected);
    let _d = handle.dispatcher().subscribe(
        event::DISCONNECTED,
        Arc::new(move |_: &EventPayload| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );

    handle.open().await.unwrap();
    let mut first = server
        .accept_timeout(Duration::from_secs(1))
        .await
        .expect("initial connection");
    wait_until(Duration::from_secs(1), || handle.is_connected()).await;

    first.drop_socket();
    let _second = server
        .accept_timeout(Duration::from_secs(2))
        .await
        .expect("session should reconnect");

    wait_until(Duration::from_secs(1), || {
        connected.load(Ordering::SeqCst) == 2
    })
    .await;
    assert_eq!(disconnected.load(Ordering::SeqCst), 1);
    assert!(handle.is_connected());
    assert!(server.connect_count() >= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exhausting_the_retry_budget_is_terminal() {
    let (transport, mut server) = MockTransport::pair();
    let handle = SessionHandle::spawn(Scope::Scan("scan-2".to_string()), quick_retry(3), transport, None);

    let failed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&failed);
    let _f = handle.dispatcher().subscribe(
        event::FAILED,
        Arc::new(move |_: &EventPayload| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );

    handle.open().await.unwrap();
    let mut conn = server
        .accept_timeout(Duration::from_secs(1))
        .await
        .expect("initial connection");
    wait_until(Duration::from_secs(1), || handle.is_connected()).await;

    server.refuse_all();
    conn.drop_socket();

    wait_until(Duration::from_secs(2), || failed.load(Ordering::SeqCst) == 1).await;
    assert_eq!(handle.state(), ConnectionState::Failed);

    // One successful open plus three refused retries.
    let attempts = server.connect_count();
    assert_eq!(attempts, 4);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        server.connect_count(),
        attempts,
        "a Failed session must not schedule further attempts"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_successful_open_resets_the_attempt_counter() {
    let (transport, mut server) = MockTransport::pair();
    let handle = SessionHandle::spawn(Scope::Dashboard, quick_retry(3), transport, None);

    handle.open().await.unwrap();
    let mut first = server
        .accept_timeout(Duration::from_secs(1))
        .await
        .expect("initial connection");
    wait_until(Duration::from_secs(1), || handle.is_connected()).await;

    // Burn two of the three attempts, then let the third succeed.
    server.refuse_next(2);
    first.drop_socket();
    let mut second = server
        .accept_timeout(Duration::from_secs(2))
        .await
        .expect("recovery within the budget");
    wait_until(Duration::from_secs(1), || handle.is_connected()).await;

    // If the counter reset on open, the same pattern survives again; if it
    // did not, the first refusal here would already exhaust the budget.
    server.refuse_next(2);
    second.drop_socket();
    let _third = server
        .accept_timeout(Duration::from_secs(2))
        .await
        .expect("second recovery proves the counter reset");
    wait_until(Duration::from_secs(1), || handle.is_connected()).await;
    assert_ne!(handle.state(), ConnectionState::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handshake_failures_emit_error_then_disconnected() {
    let (transport, mut server) = MockTransport::pair();
    let handle = SessionHandle::spawn(Scope::Dashboard, quick_retry(2), transport, None);

    let errors = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&errors);
    let _e = handle.dispatcher().subscribe(
        event::ERROR,
        Arc::new(move |payload: &EventPayload| {
            if matches!(payload, EventPayload::Error(_)) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }),
    );

    server.refuse_all();
    handle.open().await.unwrap();

    wait_until(Duration::from_secs(2), || {
        handle.state() == ConnectionState::Failed
    })
    .await;
    // Initial attempt plus two retries, each refused with an error event.
    assert_eq!(errors.load(Ordering::SeqCst), 3);
    assert_eq!(server.connect_count(), 3);
}
