//! Keepalive loop (C5): periodic liveness probing of idle long connections.
//!
//! Runs as a single long-running task, independent of any one connection's
//! handler. Every sweep takes a snapshot of the registry (releasing the read
//! lock before doing any I/O) so a slow or stuck probe never blocks new
//! registrations or lookups.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use chrono::Utc;
use tracing::{debug, warn};

use super::RelayEngine;

const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);
const RECENTLY_ACTIVE: i64 = 30;
const STUCK_RELAY_GRACE_HOURS: i64 = 6;

/// Runs forever; intended to be `tokio::spawn`ed once per engine.
pub async fn run(engine: Arc<RelayEngine>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    interval.tick().await; // first tick fires immediately — consume it
    loop {
        interval.tick().await;
        sweep(&engine).await;
    }
}

async fn sweep(engine: &Arc<RelayEngine>) {
    let snapshot = engine.registry.all().await;
    if snapshot.is_empty() {
        return;
    }
    debug!(count = snapshot.len(), "keepalive: sweeping registry");

    for conn in snapshot {
        let now = Utc::now();

        if conn.is_relaying() {
            let last = conn.last_active().await;
            if now - last > ChronoDuration::hours(STUCK_RELAY_GRACE_HOURS) {
                warn!(id = %conn.id, "keepalive: relaying connection stuck past grace period, removing");
                engine.registry.remove(&conn.id).await;
            }
            continue;
        }

        let last = conn.last_active().await;
        if now - last < ChronoDuration::seconds(RECENTLY_ACTIVE) {
            continue;
        }

        if !conn.detect_alive_random().await {
            warn!(id = %conn.id, addr = %conn.addr, "keepalive: probe failed, removing");
            engine.registry.remove(&conn.id).await;
        }
    }
}
