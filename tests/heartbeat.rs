use std::time::{Duration, Instant};

use scan_ws::core::{ConnectionState, Frame, RetryConfig, Scope, SessionConfig};
use scan_ws::session::SessionHandle;
use scan_ws::testing::MockTransport;

fn heartbeat_config(interval: Duration) -> SessionConfig {
    SessionConfig {
        retry: RetryConfig {
            base: Duration::from_millis(5),
            cap: Duration::from_millis(40),
            max_attempts: 5,
        },
        heartbeat_interval: interval,
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
async fn pings_carry_the_fixed_payload_while_open() {
    let (transport, mut server) = MockTransport::pair();
    let handle = SessionHandle::spawn(
        Scope::Dashboard,
        heartbeat_config(Duration::from_millis(20)),
        transport,
        None,
    );

    handle.open().await.unwrap();
    let mut conn = server
        .accept_timeout(Duration::from_secs(1))
        .await
        .expect("session should connect");
    wait_until(Duration::from_secs(1), || handle.is_connected()).await;

    for _ in 0..3 {
        let frame = conn
            .recv_outbound_timeout(Duration::from_secs(1))
            .await
            .expect("heartbeat ping");
        assert_eq!(frame.payload().unwrap(), br#"{"type":"ping"}"#);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pong_replies_record_round_trip_samples() {
    let (transport, mut server) = MockTransport::pair();
    let handle = SessionHandle::spawn(
        Scope::Dashboard,
        heartbeat_config(Duration::from_millis(20)),
        transport,
        None,
    );

    handle.open().await.unwrap();
    let mut conn = server
        .accept_timeout(Duration::from_secs(1))
        .await
        .expect("session should connect");
    wait_until(Duration::from_secs(1), || handle.is_connected()).await;

    let _ping = conn
        .recv_outbound_timeout(Duration::from_secs(1))
        .await
        .expect("heartbeat ping");
    assert!(conn.send_text(r#"{"type":"pong"}"#));

    let deadline = Instant::now() + Duration::from_secs(1);
    loop {
        let stats = handle.stats().await.unwrap();
        if stats.rtt_samples >= 1 {
            break;
        }
        if Instant::now() >= deadline {
            panic!("pong never produced an RTT sample");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn no_pings_flow_after_close() {
    let (transport, mut server) = MockTransport::pair();
    let handle = SessionHandle::spawn(
        Scope::Dashboard,
        heartbeat_config(Duration::from_millis(20)),
        transport,
        None,
    );

    handle.open().await.unwrap();
    let mut conn = server
        .accept_timeout(Duration::from_secs(1))
        .await
        .expect("session should connect");
    wait_until(Duration::from_secs(1), || handle.is_connected()).await;

    let _ping = conn
        .recv_outbound_timeout(Duration::from_secs(1))
        .await
        .expect("heartbeat runs while open");

    handle.close().await.unwrap();
    wait_until(Duration::from_secs(1), || {
        handle.state() == ConnectionState::Closed
    })
    .await;

    // Drain anything already in flight; the channel must end rather than
    // keep producing pings.
    let deadline = Instant::now() + Duration::from_millis(200);
    loop {
        match conn.recv_outbound_timeout(Duration::from_millis(60)).await {
            None => break,
            Some(Frame::Close(_)) => continue,
            Some(Frame::Text(payload)) if payload.as_ref() == br#"{"type":"ping"}"# => {
                assert!(
                    Instant::now() < deadline,
                    "heartbeat kept ticking after close"
                );
            }
            Some(other) => panic!("unexpected frame after close: {other:?}"),
        }
    }
}
