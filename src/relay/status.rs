//! Status API (C9): the only surfaces the admin adapter needs — a snapshot
//! of live long connections, a lookup by ID, and a force-close by ID.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::registry::Registry;

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub id: String,
    pub req_addr: String,
    pub connect_time: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub relaying: bool,
}

async fn status_of(conn: &super::registry::LongConnection) -> Status {
    Status {
        id: conn.id.clone(),
        req_addr: conn.addr.to_string(),
        connect_time: conn.connect_time,
        last_active: conn.last_active().await,
        relaying: conn.is_relaying(),
    }
}

pub async fn get_all_status(registry: &Registry) -> Vec<Status> {
    let mut out = Vec::new();
    for conn in registry.all().await {
        out.push(status_of(&conn).await);
    }
    out
}

pub async fn get_connection_status(registry: &Registry, id: &str) -> Option<Status> {
    let conn = registry.get(id).await?;
    Some(status_of(&conn).await)
}

/// Force-close and de-register. Idempotent: closing an absent ID is a no-op.
pub async fn remove_long_connection(registry: &Registry, id: &str) -> bool {
    registry.remove(id).await.is_some()
}
