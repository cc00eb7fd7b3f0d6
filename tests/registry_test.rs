//! End-to-end coverage of admission control: duplicate-ID policy and the
//! per-auth-key connection cap.

mod support;

use windrelay::config::SecretInfo;
use windrelay::relay::wire::StatusCode;

#[tokio::test]
async fn duplicate_id_is_rejected_while_the_original_is_alive() {
    let engine = support::spawn_engine(support::test_config(4, vec![], false));
    let addr = support::spawn_listener(engine).await;

    let mut a1 = support::Client::handshake_unauthenticated(addr).await;
    let ack = a1.connect_as("dev-1").await;
    assert_eq!(ack.code, StatusCode::Success);

    let mut a2 = support::Client::handshake_unauthenticated(addr).await;
    let resp = a2.connect_as("dev-1").await;
    assert_eq!(resp.code, StatusCode::Error);
    assert_eq!(resp.msg, "Connection already exists");

    // A1 must still answer as the registered holder of "dev-1".
    let mut requester = support::Client::handshake_unauthenticated(addr).await;
    let relay_ack = requester.request_relay("dev-1").await;
    assert_eq!(relay_ack.code, StatusCode::Success);
}

#[tokio::test]
async fn duplicate_id_replaces_a_dead_holder() {
    let engine = support::spawn_engine(support::test_config(4, vec![], false));
    let addr = support::spawn_listener(engine).await;

    let mut a1 = support::Client::handshake_unauthenticated(addr).await;
    let ack = a1.connect_as("dev-1").await;
    assert_eq!(ack.code, StatusCode::Success);

    // Simulate a crash: drop the socket without a clean TCP close sequence.
    // The liveness probe on the next connect attempt is what actually
    // detects this, standing in for the periodic keepalive sweep that would
    // eventually notice the same thing on its own schedule.
    drop(a1);

    let mut a2 = support::Client::handshake_unauthenticated(addr).await;
    let ack2 = a2.connect_as("dev-1").await;
    assert_eq!(ack2.code, StatusCode::Success);
}

#[tokio::test]
async fn per_key_cap_rejects_once_the_limit_is_reached() {
    let secret_info = vec![SecretInfo { secret_key: "s".to_string(), max_conn: 1 }];
    let engine = support::spawn_engine(support::test_config(10, secret_info, true));
    let addr = support::spawn_listener(engine).await;

    let mut first = support::Client::handshake_authenticated(addr, "s").await;
    let ack = first.connect_as("dev-a").await;
    assert_eq!(ack.code, StatusCode::Success);

    let mut second = support::Client::handshake_authenticated(addr, "s").await;
    let resp = second.connect_as("dev-b").await;
    assert_eq!(resp.code, StatusCode::Error);
    assert_eq!(resp.msg, "Too many connections");
}
