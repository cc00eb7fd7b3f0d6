//! End-to-end handshake coverage: the KDF-salt-mismatch retry and the
//! plain `ping` round trip once a session is established.

mod support;

use windrelay::config::SecretInfo;
use windrelay::relay::wire::{Action, ReqHead, RespHead, StatusCode};

#[tokio::test]
async fn kdf_salt_mismatch_retries_once_then_succeeds() {
    let secret_info = vec![SecretInfo { secret_key: "s".to_string(), max_conn: 5 }];
    let engine = support::spawn_engine(support::test_config(4, secret_info, true));
    let addr = support::spawn_listener(engine).await;

    // `handshake_authenticated` always starts with an empty salt, which the
    // engine's freshly-generated salt will never match on the first try —
    // this exercises the retry path by construction.
    let client = support::Client::handshake_authenticated(addr, "s").await;
    drop(client);
}

#[tokio::test]
async fn ping_round_trips_after_unauthenticated_handshake() {
    let engine = support::spawn_engine(support::test_config(4, vec![], false));
    let addr = support::spawn_listener(engine).await;

    let mut client = support::Client::handshake_unauthenticated(addr).await;
    let head = ReqHead { action: Action::Ping, data_len: 0 };
    windrelay::relay::codec::send_struct(&mut client.stream, &head, Some(&client.cipher))
        .await
        .unwrap();
    let resp: RespHead = windrelay::relay::codec::read_head(&mut client.stream, Some(&client.cipher))
        .await
        .unwrap();
    assert_eq!(resp.code, StatusCode::Success);
    assert_eq!(resp.action, Action::Ping);
}
