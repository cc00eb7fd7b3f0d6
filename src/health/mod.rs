// SPDX-License-Identifier: MIT
//! Relay engine health check system.
//!
//! Provides [`HealthReporter`] that aggregates multiple [`SystemHealthCheck`]
//! implementations into a single [`HealthReport`].
//!
//! # Included checks
//! - [`RegistryHealthCheck`] — reports long-connection occupancy against `max_conn_total`
//! - [`ListenerHealthCheck`] — reports whether the accept loop is still running
//!
//! # Usage
//! ```rust,no_run
//! use windrelay::health::{
//!     reporter::HealthReporter,
//!     checks::{RegistryHealthCheck, ListenerHealthCheck, ListenerHandle},
//! };
//! use std::sync::Arc;
//!
//! # async fn doc(registry: Arc<windrelay::relay::registry::Registry>) {
//! let listener_handle = ListenerHandle::new();
//! let reporter = HealthReporter::new()
//!     .with_check(RegistryHealthCheck::new(registry))
//!     .with_check(ListenerHealthCheck::new(listener_handle));
//!
//! let report = reporter.get_health_report().await;
//! println!("overall: {}", report.status);
//! # }
//! ```

pub mod checks;
pub mod reporter;

// Convenience re-exports.
pub use checks::{
    CheckResult, CheckStatus, ListenerHandle, ListenerHealthCheck, RegistryHealthCheck,
    SystemHealthCheck,
};
pub use reporter::{HealthReport, HealthReporter};
