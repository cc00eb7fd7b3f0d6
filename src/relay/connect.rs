//! Connect handler (§4.7): registers the accepted stream as a long
//! connection under a client-chosen ID, then parks it — no further reads
//! are issued here. From this point the connection is driven entirely by
//! the keepalive loop and by a future `relay` request.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpStream;
use tracing::{info, warn};

use super::codec;
use super::crypto::Cipher;
use super::registry::LongConnection;
use super::wire::{Action, ConnectionReq, ReqHead, RespHead};
use super::RelayEngine;

pub async fn handle(
    engine: &Arc<RelayEngine>,
    mut stream: TcpStream,
    addr: SocketAddr,
    cipher: Cipher,
    auth_key_b64: Option<String>,
    head: ReqHead,
) -> Result<()> {
    let req: ConnectionReq = codec::read_req(&mut stream, head.data_len, Some(&cipher)).await?;
    let id = req.id;

    if !engine.config.id_whitelist.is_empty()
        && !engine.config.id_whitelist.iter().any(|w| w == &id)
    {
        warn!(%id, %addr, "connect: id not in whitelist");
        return send_error(&mut stream, &cipher, "id not allowed").await;
    }

    if !engine.id_limiter.allow(&id) {
        warn!(%id, %addr, "connect: id rate limit exceeded");
        return send_error(&mut stream, &cipher, "ID rate limit exceeded").await;
    }

    if let Some(key) = &auth_key_b64 {
        if !engine.registry.check_conn_limit_ok(key).await {
            warn!(%id, %addr, "connect: per-key connection cap exceeded");
            return send_error(&mut stream, &cipher, "Too many connections").await;
        }
    }

    // Duplicate ID policy: an alive (or currently relaying) holder of this
    // ID wins; a dead one is replaced.
    if let Some(existing) = engine.registry.get(&id).await {
        let alive = existing.is_relaying() || existing.send_msg_detect_alive().await;
        if alive {
            warn!(%id, %addr, "connect: id already has a live long connection");
            return send_error(&mut stream, &cipher, "Connection already exists").await;
        }
        info!(%id, "connect: replacing stale long connection");
        engine.registry.remove(&id).await;
    }

    if engine.registry.len().await >= engine.config.max_conn_total {
        warn!(%id, %addr, "connect: registry at max_conn_total");
        return send_error(&mut stream, &cipher, "Too many connections").await;
    }

    if let Err(e) = enable_tcp_keepalive(&stream) {
        warn!(%id, %addr, err = %e, "connect: failed to enable TCP keepalive, proceeding anyway");
    }

    let conn = Arc::new(LongConnection::new(id.clone(), addr, stream, Some(cipher), auth_key_b64));
    engine.registry.insert(conn.clone()).await;

    let ack = RespHead::ok(Action::Connect);
    let send_result = {
        let mut guard = conn.lock_stream().await;
        codec::send_struct(&mut *guard, &ack, conn.cipher()).await
    };
    if let Err(e) = send_result {
        warn!(%id, %addr, err = %e, "connect: failed to ack, removing");
        engine.registry.remove(&id).await;
        return Err(e);
    }

    info!(%id, %addr, "connect: long connection registered");
    Ok(())
}

async fn send_error(stream: &mut TcpStream, cipher: &Cipher, msg: &str) -> Result<()> {
    codec::send_struct(stream, &RespHead::error(Action::Connect, msg), Some(cipher)).await
}

/// Enable OS-level TCP keepalive (30s period) on the long-connection socket,
/// per §4.7 step 6. Best-effort — a platform that rejects the setsockopt
/// call doesn't prevent the connection from being registered.
fn enable_tcp_keepalive(stream: &TcpStream) -> Result<()> {
    use socket2::{SockRef, TcpKeepalive};
    let sock_ref = SockRef::from(stream);
    let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(30));
    sock_ref.set_tcp_keepalive(&keepalive)?;
    Ok(())
}
