//! End-to-end coverage of the relay path: a requester splices to a
//! registered target over real loopback TCP, driven through the same
//! dispatcher a live deployment uses.

mod support;

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use windrelay::relay::wire::StatusCode;

#[tokio::test]
async fn unauthenticated_connect_then_relay_transfers_both_directions() {
    let (engine, stats) = support::spawn_engine_with_stats(support::test_config(2, vec![], false));
    let addr = support::spawn_listener(engine).await;

    let mut target = support::Client::handshake_unauthenticated(addr).await;
    let ack = target.connect_as("dev-1").await;
    assert_eq!(ack.code, StatusCode::Success);

    let mut requester = support::Client::handshake_unauthenticated(addr).await;
    let relay_ack_task = tokio::spawn(async move {
        let ack = requester.request_relay("dev-1").await;
        assert_eq!(ack.code, StatusCode::Success);
        requester.stream.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        requester.stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");
        requester.stream.shutdown().await.unwrap();
    });

    target.await_relay_switch().await;
    let mut buf = [0u8; 5];
    target.stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");
    target.stream.write_all(b"world").await.unwrap();
    target.stream.flush().await.unwrap();

    relay_ack_task.await.unwrap();

    // The forward EOF has to propagate through the splice task before it
    // records stats; give it a moment rather than racing the assertion.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let counters = stats.get("dev-1").await.expect("stats recorded for dev-1");
    assert_eq!(counters.total_relay_count, 1);
    assert_eq!(counters.total_relay_err_count, 0);
    assert!(counters.total_relay_bytes >= 10);
}

#[tokio::test]
async fn relay_to_missing_id_reports_offline() {
    let (engine, stats) = support::spawn_engine_with_stats(support::test_config(2, vec![], false));
    let addr = support::spawn_listener(engine).await;

    let mut requester = support::Client::handshake_unauthenticated(addr).await;
    let resp = requester.request_relay("nope").await;
    assert_eq!(resp.code, StatusCode::Error);
    assert_eq!(resp.msg, "device not online");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let counters = stats.get("nope").await.expect("stats recorded for nope");
    assert_eq!(counters.total_relay_offline_count, 1);
    assert_eq!(counters.total_relay_err_count, 0);
}
