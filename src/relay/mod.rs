//! Relay engine: the encrypted handshake, request dispatch, the
//! long-connection registry, the bidirectional splice path, and admission
//! control described in spec §2–§5. This module wires the pieces together;
//! each concern lives in its own submodule.

pub mod auth;
pub mod codec;
pub mod connect;
pub mod crypto;
pub mod dispatcher;
pub mod handshake;
pub mod keepalive;
pub mod ratelimit;
pub mod registry;
pub mod splice;
pub mod stats;
pub mod status;
pub mod wire;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::config::Config;
use auth::Authenticator;
use crypto::Aes192Key;
use ratelimit::{IdRateLimiter, IpRateLimiter};
use registry::Registry;
use stats::StatsStore;

/// Shared state handed to every connection task: the dispatcher, the
/// connect/relay handlers, and the keepalive loop all hold an `Arc<RelayEngine>`.
pub struct RelayEngine {
    pub config: Config,
    pub authenticator: Option<Authenticator>,
    pub registry: Arc<Registry>,
    pub ip_limiter: IpRateLimiter,
    pub id_limiter: IdRateLimiter,
    pub stats: Arc<dyn StatsStore>,
}

impl RelayEngine {
    pub fn new(config: Config, stats: Arc<dyn StatsStore>) -> Arc<Self> {
        // An authenticator is built whenever secrets are configured, whether
        // or not `enable_auth` requires every client to use it (spec §4.3
        // step 2 vs step 4 are distinct checks).
        let authenticator = if config.secret_info.is_empty() {
            None
        } else {
            Some(Authenticator::new(&config.secret_info))
        };

        let mut key_caps: HashMap<String, usize> = HashMap::new();
        if let Some(authr) = &authenticator {
            for secret in &config.secret_info {
                let key = Aes192Key::from_secret(&secret.secret_key, authr.raw_salt());
                key_caps.insert(key.to_base64(), secret.max_conn);
            }
        }

        let registry = Arc::new(Registry::new(key_caps, authenticator.is_some(), config.max_conn_total));
        let ip_limiter = IpRateLimiter::new(config.ip_rate_per_minute, config.ip_rate_burst);
        let id_limiter = IdRateLimiter::new(config.id_rate_per_minute, config.id_rate_burst);

        Arc::new(RelayEngine { config, authenticator, registry, ip_limiter, id_limiter, stats })
    }
}

/// Spawn the keepalive loop as its own task.
pub fn spawn_keepalive(engine: Arc<RelayEngine>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(keepalive::run(engine))
}

/// Bind the listener and accept connections forever, dispatching each to
/// its own task. Returns only on a listener-level error (bind failure or a
/// fatal accept error); per-connection errors are logged and swallowed so
/// one bad peer never brings down the engine.
pub async fn spawn_listener(engine: Arc<RelayEngine>) -> Result<()> {
    let listener = TcpListener::bind(&engine.config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", engine.config.listen_addr))?;
    info!(addr = %engine.config.listen_addr, "relay engine listening");

    loop {
        let (stream, addr) = listener.accept().await.context("accept failed")?;
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher::handle_connection(engine, stream, addr).await {
                debug!(%addr, err = %e, "connection handler exited with error");
            }
        });
    }
}
