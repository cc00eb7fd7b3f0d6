// SPDX-License-Identifier: MIT
//! Individual health check implementations.
//!
//! Each check implements the [`SystemHealthCheck`] trait and reports whether
//! a specific part of the relay engine is healthy, degraded, or unavailable.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::relay::registry::Registry;

/// Severity level reported by a health check.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// The subsystem is operating normally.
    Ok,
    /// The subsystem is functional but degraded (e.g., near capacity).
    Degraded,
    /// The subsystem is unavailable or critically broken.
    Critical,
}

impl CheckStatus {
    /// Returns the worst (highest-severity) of two statuses.
    pub fn worst(a: CheckStatus, b: CheckStatus) -> CheckStatus {
        match (&a, &b) {
            (CheckStatus::Critical, _) | (_, CheckStatus::Critical) => CheckStatus::Critical,
            (CheckStatus::Degraded, _) | (_, CheckStatus::Degraded) => CheckStatus::Degraded,
            _ => CheckStatus::Ok,
        }
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckStatus::Ok => write!(f, "ok"),
            CheckStatus::Degraded => write!(f, "degraded"),
            CheckStatus::Critical => write!(f, "critical"),
        }
    }
}

/// Result of running a single health check.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CheckResult {
    /// Machine-readable name of this check (e.g., `"registry"`, `"listener"`).
    pub name: String,
    /// Human-readable message describing the result.
    pub message: String,
    /// Status of this check.
    pub status: CheckStatus,
    /// ISO-8601 timestamp when the check was run.
    pub checked_at: String,
    /// Optional latency measurement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl CheckResult {
    fn ok(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            status: CheckStatus::Ok,
            checked_at: Utc::now().to_rfc3339(),
            latency_ms: None,
        }
    }

    fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            status: CheckStatus::Degraded,
            checked_at: Utc::now().to_rfc3339(),
            latency_ms: None,
        }
    }

    fn critical(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            status: CheckStatus::Critical,
            checked_at: Utc::now().to_rfc3339(),
            latency_ms: None,
        }
    }
}

/// Async health check trait.
#[async_trait]
pub trait SystemHealthCheck: Send + Sync {
    /// Run the check and return a result.
    async fn run(&self) -> CheckResult;
}

// ─── Registry check ───────────────────────────────────────────────────────────

/// Reports the registry's occupancy against `max_conn_total`. Degraded past
/// 90% full — not critical, since admission control (not this check) is
/// what actually protects the engine.
pub struct RegistryHealthCheck {
    registry: Arc<Registry>,
}

impl RegistryHealthCheck {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl SystemHealthCheck for RegistryHealthCheck {
    async fn run(&self) -> CheckResult {
        let len = self.registry.len().await;
        let max = self.registry.max_conn_total;
        let message = format!("{len}/{max} long connections registered");

        if max == 0 {
            return CheckResult::ok("registry", message);
        }
        let ratio = len as f64 / max as f64;
        if ratio >= 0.9 {
            CheckResult::degraded("registry", message)
        } else {
            CheckResult::ok("registry", message)
        }
    }
}

// ─── Listener check ───────────────────────────────────────────────────────────

/// Tracks whether the accept loop is still running. The dispatcher flips
/// this to `false` only if `spawn_listener` returns — i.e. the listener
/// socket itself died, not an individual connection failing.
#[derive(Clone)]
pub struct ListenerHandle(Arc<AtomicBool>);

impl ListenerHandle {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn mark_dead(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for ListenerHandle {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ListenerHealthCheck {
    handle: ListenerHandle,
}

impl ListenerHealthCheck {
    pub fn new(handle: ListenerHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl SystemHealthCheck for ListenerHealthCheck {
    async fn run(&self) -> CheckResult {
        if self.handle.is_alive() {
            CheckResult::ok("listener", "accept loop running")
        } else {
            CheckResult::critical("listener", "accept loop has exited")
        }
    }
}
