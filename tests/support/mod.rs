//! Shared end-to-end test harness: a minimal client driving the real
//! `RelayEngine` dispatcher over loopback TCP, speaking the same framed
//! wire protocol a real device would.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use windrelay::config::{CliOverrides, Config, SecretInfo};
use windrelay::relay::codec;
use windrelay::relay::crypto::{self, Aes192Key, Cipher};
use windrelay::relay::stats::InMemoryStatsStore;
use windrelay::relay::wire::{
    Action, ConnectionReq, HandshakeReq, HandshakeResp, HeartbeatReq, ReqHead, RelayReq, RespHead,
    StatusCode,
};
use windrelay::relay::RelayEngine;

/// Build an engine with generous rate limits so tests exercise admission
/// control logic deliberately, not accidental token-bucket exhaustion.
pub fn test_config(max_conn_total: usize, secret_info: Vec<SecretInfo>, enable_auth: bool) -> Config {
    let mut cfg = Config::load(CliOverrides {
        listen_addr: Some("127.0.0.1:0".to_string()),
        max_conn_total: Some(max_conn_total),
        enable_auth: Some(enable_auth),
        ..Default::default()
    });
    cfg.secret_info = secret_info;
    cfg.ip_rate_per_minute = 10_000;
    cfg.ip_rate_burst = 1_000;
    cfg.id_rate_per_minute = 10_000;
    cfg.id_rate_burst = 1_000;
    cfg
}

pub fn spawn_engine(config: Config) -> Arc<RelayEngine> {
    RelayEngine::new(config, InMemoryStatsStore::new())
}

/// Like [`spawn_engine`] but also hands back the concrete in-memory store so
/// tests can inspect recorded counters directly instead of downcasting the
/// trait object.
pub fn spawn_engine_with_stats(config: Config) -> (Arc<RelayEngine>, Arc<InMemoryStatsStore>) {
    let stats = InMemoryStatsStore::new();
    let engine = RelayEngine::new(config, stats.clone());
    (engine, stats)
}

/// Bind a listener, hand each accepted connection to the engine's
/// dispatcher on its own task, and return the bound address.
pub async fn spawn_listener(engine: Arc<RelayEngine>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(v) => v,
                Err(_) => return,
            };
            let engine = engine.clone();
            tokio::spawn(async move {
                let _ = windrelay::relay::dispatcher::handle_connection(engine, stream, peer).await;
            });
        }
    });
    addr
}

/// A connected client that has completed the handshake and owns the
/// resulting session cipher.
pub struct Client {
    pub stream: TcpStream,
    pub cipher: Cipher,
}

impl Client {
    /// Unauthenticated handshake: no auth field, no AAD.
    pub async fn handshake_unauthenticated(addr: SocketAddr) -> Self {
        Self::handshake(addr, None).await
    }

    /// Authenticated handshake using `secret`, retrying once if the server's
    /// salt differs from ours (it always will, the first time).
    pub async fn handshake_authenticated(addr: SocketAddr, secret: &str) -> Self {
        Self::handshake(addr, Some(secret)).await
    }

    async fn handshake(addr: SocketAddr, secret: Option<&str>) -> Self {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let (client_secret, client_public) = crypto::generate_ecdh_keypair();
        let client_pub_b64 = b64(client_public.as_bytes());

        let mut salt_b64 = String::new();
        for _ in 0..2 {
            let req = match secret {
                Some(s) => {
                    let key = Aes192Key::from_secret(s, &b64_decode(&salt_b64));
                    let mut plaintext = b"AUTH".to_vec();
                    plaintext.extend_from_slice(&[0u8; 16]);
                    let auth_field = Cipher::new(&key).seal(&plaintext, b"ctx").unwrap();
                    HandshakeReq {
                        secret_key_selector: key.selector(),
                        auth_field_b64: b64(&auth_field),
                        auth_aad: "ctx".to_string(),
                        kdf_salt_b64: salt_b64.clone(),
                        ecdh_public_key_b64: client_pub_b64.clone(),
                    }
                }
                None => HandshakeReq {
                    secret_key_selector: String::new(),
                    auth_field_b64: String::new(),
                    auth_aad: String::new(),
                    kdf_salt_b64: String::new(),
                    ecdh_public_key_b64: client_pub_b64.clone(),
                },
            };
            codec::send_struct(&mut stream, &req, None).await.unwrap();
            let resp: HandshakeResp = codec::read_head(&mut stream, None).await.unwrap();

            match resp.code {
                StatusCode::KdfSaltMismatch => {
                    salt_b64 = resp.kdf_salt_b64;
                    continue;
                }
                StatusCode::Success => {
                    let shared = crypto::ecdh_shared_secret(&client_secret, &resp.ecdh_public_key_b64)
                        .unwrap();
                    let session_key = Aes192Key::from_ecdh_shared_secret(&shared);
                    let cipher = Cipher::new(&session_key);
                    return Client { stream, cipher };
                }
                other => panic!("handshake failed with code {other:?}: {}", resp.msg),
            }
        }
        panic!("handshake did not converge within the retry budget");
    }

    pub async fn connect_as(&mut self, id: &str) -> RespHead {
        let body = serde_json::to_vec(&ConnectionReq { id: id.to_string() }).unwrap();
        let sealed = self.cipher.seal(&body, b"").unwrap();
        let head = ReqHead { action: Action::Connect, data_len: sealed.len() };
        codec::send_struct(&mut self.stream, &head, Some(&self.cipher)).await.unwrap();
        codec::write_raw(&mut self.stream, &sealed).await.unwrap();
        codec::read_head(&mut self.stream, Some(&self.cipher)).await.unwrap()
    }

    pub async fn request_relay(&mut self, id: &str) -> RespHead {
        let body = serde_json::to_vec(&RelayReq { id: id.to_string() }).unwrap();
        let sealed = self.cipher.seal(&body, b"").unwrap();
        let head = ReqHead { action: Action::Relay, data_len: sealed.len() };
        codec::send_struct(&mut self.stream, &head, Some(&self.cipher)).await.unwrap();
        codec::write_raw(&mut self.stream, &sealed).await.unwrap();
        codec::read_head(&mut self.stream, Some(&self.cipher)).await.unwrap()
    }

    /// Wait for the server's "switch to raw copy" notification that follows
    /// a successful relay handoff on the target side.
    pub async fn await_relay_switch(&mut self) {
        let head: ReqHead = codec::read_head(&mut self.stream, Some(&self.cipher)).await.unwrap();
        assert_eq!(head.action, Action::Relay);
    }

    /// Answer one heartbeat probe the way a real device would.
    pub async fn answer_heartbeat(&mut self) {
        let head: ReqHead = codec::read_head(&mut self.stream, Some(&self.cipher)).await.unwrap();
        assert_eq!(head.action, Action::Heartbeat);
        let reply = HeartbeatReq { id: String::new(), need_resp: false };
        let body = serde_json::to_vec(&reply).unwrap();
        let sealed = self.cipher.seal(&body, b"").unwrap();
        let resp_head = ReqHead { action: Action::Heartbeat, data_len: sealed.len() };
        codec::send_struct(&mut self.stream, &resp_head, Some(&self.cipher)).await.unwrap();
        codec::write_raw(&mut self.stream, &sealed).await.unwrap();
    }
}

fn b64(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn b64_decode(s: &str) -> Vec<u8> {
    use base64::Engine as _;
    if s.is_empty() {
        return Vec::new();
    }
    base64::engine::general_purpose::STANDARD.decode(s).unwrap()
}
