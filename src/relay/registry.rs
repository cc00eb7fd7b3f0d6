//! Long-connection registry (C4): the in-memory map of live "long
//! connections" (one per registered ID) plus the per-auth-key connection
//! counters used for admission control.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand_core::RngCore;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, warn};

use super::crypto::Cipher;
use super::wire::{Action, ReqHead};

/// One registered long connection: the held client stream plus liveness
/// bookkeeping. The stream is behind an async mutex because the relay
/// splice (C7) holds the lock for the entire duration of a transfer —
/// exactly as the original holds its per-connection mutex across the copy.
pub struct LongConnection {
    pub id: String,
    pub addr: SocketAddr,
    pub auth_key_b64: Option<String>,
    pub connect_time: DateTime<Utc>,
    last_active: RwLock<DateTime<Utc>>,
    /// Peeked without the stream lock by the keepalive loop; all
    /// transitions happen while the stream lock is held.
    relaying: AtomicBool,
    stream: Mutex<TcpStream>,
    cipher: Option<Cipher>,
}

impl LongConnection {
    pub fn new(
        id: String,
        addr: SocketAddr,
        stream: TcpStream,
        cipher: Option<Cipher>,
        auth_key_b64: Option<String>,
    ) -> Self {
        let now = Utc::now();
        LongConnection {
            id,
            addr,
            auth_key_b64,
            connect_time: now,
            last_active: RwLock::new(now),
            relaying: AtomicBool::new(false),
            stream: Mutex::new(stream),
            cipher,
        }
    }

    pub fn is_relaying(&self) -> bool {
        self.relaying.load(Ordering::SeqCst)
    }

    pub fn set_relaying(&self, v: bool) {
        self.relaying.store(v, Ordering::SeqCst);
    }

    pub async fn last_active(&self) -> DateTime<Utc> {
        *self.last_active.read().await
    }

    async fn touch_last_active(&self) {
        *self.last_active.write().await = Utc::now();
    }

    /// Record a successful splice: bumps `last_normal_active` so the next
    /// keepalive sweep treats this connection as recently observed.
    pub async fn mark_active(&self) {
        self.touch_last_active().await;
    }

    pub fn cipher(&self) -> Option<&Cipher> {
        self.cipher.as_ref()
    }

    pub async fn lock_stream(&self) -> tokio::sync::MutexGuard<'_, TcpStream> {
        self.stream.lock().await
    }

    /// Send a heartbeat and wait up to 2 seconds for the peer's heartbeat
    /// reply. Used both as the full liveness check when replacing a
    /// suspected-dead duplicate ID, and occasionally from the keepalive loop.
    pub async fn send_msg_detect_alive(&self) -> bool {
        let mut guard = self.stream.lock().await;
        self.send_msg_detect_alive_locked(&mut guard).await
    }

    async fn send_msg_detect_alive_locked(&self, stream: &mut TcpStream) -> bool {
        let head = ReqHead { action: Action::Heartbeat, data_len: 0 };
        if let Err(e) = super::codec::send_struct(stream, &head, self.cipher.as_ref()).await {
            warn!(id = %self.id, addr = %self.addr, err = %e, "sent heartbeat failed (detect alive)");
            return false;
        }
        let read = super::codec::read_head::<_, ReqHead>(stream, self.cipher.as_ref());
        match timeout(Duration::from_secs(2), read).await {
            Ok(Ok(head)) if head.action == Action::Heartbeat => {
                self.touch_last_active().await;
                true
            }
            Ok(Ok(head)) => {
                error!(id = %self.id, action = %head.action, "unexpected action in heartbeat reply");
                false
            }
            Ok(Err(e)) => {
                error!(id = %self.id, addr = %self.addr, err = %e, "failed to receive heartbeat");
                false
            }
            Err(_) => false,
        }
    }

    /// Keepalive-loop probe: 1-in-10 chance of a full round-trip check,
    /// otherwise a one-way heartbeat (no response expected).
    pub async fn detect_alive_random(&self) -> bool {
        let mut guard = self.stream.lock().await;
        if rand_core::OsRng.next_u32() % 10 == 0 {
            if !self.send_msg_detect_alive_locked(&mut guard).await {
                return false;
            }
        }
        let req_head = ReqHead { action: Action::Heartbeat, data_len: 0 };
        if let Err(e) = super::codec::send_struct(&mut *guard, &req_head, self.cipher.as_ref()).await {
            warn!(id = %self.id, addr = %self.addr, err = %e, "one-way heartbeat send failed");
            return false;
        }
        drop(guard);
        self.touch_last_active().await;
        true
    }
}

/// Per-auth-key connection cap: current live count plus the configured
/// ceiling (from `SecretInfo.max_conn`).
struct KeyCap {
    count: AtomicUsize,
    limit: usize,
}

pub struct Registry {
    connections: RwLock<HashMap<String, Arc<LongConnection>>>,
    key_conn_limit: RwLock<HashMap<String, KeyCap>>,
    has_authenticator: bool,
    pub max_conn_total: usize,
}

/// Key used to track no-auth ("") connections in the per-key count table.
/// Per spec §3 invariant 2, absent keys still get a bucket — just an
/// unbounded one — rather than being skipped from accounting entirely.
const NO_AUTH_KEY: &str = "";

impl Registry {
    /// `key_caps` maps base64 auth key -> configured `max_conn` for that key.
    pub fn new(key_caps: HashMap<String, usize>, has_authenticator: bool, max_conn_total: usize) -> Self {
        let mut key_conn_limit: HashMap<String, KeyCap> = key_caps
            .into_iter()
            .map(|(k, limit)| (k, KeyCap { count: AtomicUsize::new(0), limit }))
            .collect();
        if !has_authenticator {
            key_conn_limit
                .entry(NO_AUTH_KEY.to_string())
                .or_insert_with(|| KeyCap { count: AtomicUsize::new(0), limit: usize::MAX });
        }
        Registry {
            connections: RwLock::new(HashMap::new()),
            key_conn_limit: RwLock::new(key_conn_limit),
            has_authenticator,
            max_conn_total,
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<LongConnection>> {
        self.connections.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    pub async fn all(&self) -> Vec<Arc<LongConnection>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Admission check: does this auth key still have room for another
    /// connection? An auth key with no cap entry is only valid when no
    /// authenticator is configured at all — otherwise it's a bug in the
    /// registry's accounting and we panic, per the engine's error design.
    pub async fn check_conn_limit_ok(&self, auth_key_b64: &str) -> bool {
        let limits = self.key_conn_limit.read().await;
        match limits.get(auth_key_b64) {
            Some(cap) => cap.count.load(Ordering::SeqCst) < cap.limit,
            None => {
                if self.has_authenticator {
                    panic!("unknown auth key in connection limit table: {auth_key_b64}");
                }
                true
            }
        }
    }

    /// Current live count for a key in the per-key count table — `""` for
    /// no-auth connections. `None` if the key has no bucket at all.
    pub async fn key_conn_count(&self, auth_key_b64: &str) -> Option<usize> {
        let limits = self.key_conn_limit.read().await;
        limits.get(auth_key_b64).map(|cap| cap.count.load(Ordering::SeqCst))
    }

    /// `None` (no-auth connections) is tracked under [`NO_AUTH_KEY`], the
    /// synthetic unlimited bucket seeded in [`Registry::new`] whenever no
    /// authenticator is configured.
    async fn add_key_conn_count(&self, auth_key_b64: Option<&str>, delta: i64) {
        let key = auth_key_b64.unwrap_or(NO_AUTH_KEY);
        let limits = self.key_conn_limit.read().await;
        let Some(cap) = limits.get(key) else {
            if self.has_authenticator {
                panic!("unknown auth key in connection limit table: {key}");
            }
            return;
        };
        if delta >= 0 {
            cap.count.fetch_add(delta as usize, Ordering::SeqCst);
        } else {
            cap.count.fetch_sub((-delta) as usize, Ordering::SeqCst);
        }
    }

    pub async fn insert(&self, conn: Arc<LongConnection>) {
        let auth_key = conn.auth_key_b64.clone();
        {
            let mut connections = self.connections.write().await;
            connections.insert(conn.id.clone(), conn);
        }
        self.add_key_conn_count(auth_key.as_deref(), 1).await;
    }

    /// Idempotent: removing an absent ID is a no-op and decrements nothing.
    pub async fn remove(&self, id: &str) -> Option<Arc<LongConnection>> {
        debug!(id = %id, "remove long connection");
        let removed = {
            let mut connections = self.connections.write().await;
            connections.remove(id)
        };
        if let Some(conn) = &removed {
            self.add_key_conn_count(conn.auth_key_b64.as_deref(), -1).await;
            let mut stream = conn.stream.lock().await;
            let _ = tokio::io::AsyncWriteExt::shutdown(&mut *stream).await;
        }
        removed
    }
}
