//! StatsStore (C8): per-ID relay counters consumed only by the splice
//! handler on completion. The admin HTTP surface and its SQLite-backed
//! implementation are out of scope (spec §1) — this module defines the
//! trait the engine depends on plus a process-local reference
//! implementation, useful standalone and in tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

/// Consumed exclusively by the relay splice handler (C7) on scope exit, once
/// per relay attempt regardless of outcome.
#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn add_relay_statistic(
        &self,
        id: &str,
        success: bool,
        offline: bool,
        elapsed_ms: u64,
        bytes: u64,
    );
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RelayCounters {
    pub total_relay_count: u64,
    pub total_relay_ms: u64,
    pub total_relay_bytes: u64,
    pub total_relay_err_count: u64,
    pub total_relay_offline_count: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Process-local `StatsStore`. Not persisted across restarts — a durable
/// implementation backed by an external store is the admin surface's
/// concern, not the relay engine's (spec §1).
#[derive(Default)]
pub struct InMemoryStatsStore {
    counters: Mutex<HashMap<String, RelayCounters>>,
}

impl InMemoryStatsStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn get(&self, id: &str) -> Option<RelayCounters> {
        self.counters.lock().await.get(id).cloned()
    }
}

#[async_trait]
impl StatsStore for InMemoryStatsStore {
    async fn add_relay_statistic(
        &self,
        id: &str,
        success: bool,
        offline: bool,
        elapsed_ms: u64,
        bytes: u64,
    ) {
        let mut counters = self.counters.lock().await;
        let entry = counters.entry(id.to_string()).or_default();
        entry.total_relay_count += 1;
        entry.total_relay_ms += elapsed_ms;
        entry.total_relay_bytes += bytes;
        if !success && !offline {
            entry.total_relay_err_count += 1;
        }
        if offline {
            entry.total_relay_offline_count += 1;
        }
        entry.last_updated = Some(Utc::now());
    }
}
