//! Relay handler and bidirectional splice (C7) — the most intricate piece
//! of the engine. See spec §4.8.
//!
//! The tricky part is half-close: the forward direction (requester →
//! target) finishing is the normal termination signal, but the reverse
//! direction's read on the target stream is typically still parked waiting
//! for more bytes. Rather than reach for a per-operation read deadline (this
//! crate's `tokio::net::TcpStream` has none), the forward task flips an
//! `actively_timeout` flag and fires a `Notify` that races against the
//! reverse copy's next read — exactly the cancellation-channel substitute
//! spec §9's design notes call out as acceptable.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tracing::{info, warn};

use super::codec;
use super::crypto::Cipher;
use super::registry::LongConnection;
use super::wire::{Action, ReqHead, RelayReq, RespHead};
use super::RelayEngine;
use crate::observability::format_bytes;

const BUSY_SPIN_ATTEMPTS: u32 = 5;
const BUSY_SPIN_DELAY: Duration = Duration::from_millis(200);
const COPY_BUF_LEN: usize = 16 * 1024;

enum Outcome {
    Spliced(u64),
    Offline,
    Busy,
}

pub async fn handle(
    engine: &Arc<RelayEngine>,
    mut requester: TcpStream,
    addr: SocketAddr,
    requester_cipher: Cipher,
    head: ReqHead,
) -> Result<()> {
    let req: RelayReq = codec::read_req(&mut requester, head.data_len, Some(&requester_cipher)).await?;
    let id = req.id;

    if !engine.id_limiter.allow(&id) {
        warn!(%id, %addr, "relay: id rate limit exceeded");
        return send_error(&mut requester, &requester_cipher, "ID rate limit exceeded").await;
    }

    let start = Instant::now();
    let result = run(engine, &mut requester, &requester_cipher, &id, addr).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    let (success, offline, bytes) = match &result {
        Ok(Outcome::Spliced(bytes)) => (true, false, *bytes),
        Ok(Outcome::Offline) => (false, true, 0),
        Ok(Outcome::Busy) => (false, false, 0),
        Err(_) => (false, false, 0),
    };
    engine.stats.add_relay_statistic(&id, success, offline, elapsed_ms, bytes).await;

    result.map(|_| ())
}

async fn run(
    engine: &Arc<RelayEngine>,
    requester: &mut TcpStream,
    requester_cipher: &Cipher,
    id: &str,
    addr: SocketAddr,
) -> Result<Outcome> {
    let target = match engine.registry.get(id).await {
        Some(t) => t,
        None => {
            send_error(requester, requester_cipher, "device not online").await?;
            return Ok(Outcome::Offline);
        }
    };

    // Spin-wait up to 5x200ms for a previous splice's teardown to clear —
    // this is an accepted approximation (spec §9 open question), not a
    // condition-variable wait.
    let mut clear = !target.is_relaying();
    for _ in 0..BUSY_SPIN_ATTEMPTS {
        if clear {
            break;
        }
        tokio::time::sleep(BUSY_SPIN_DELAY).await;
        clear = !target.is_relaying();
    }
    if !clear {
        send_error(requester, requester_cipher, "Connection is already relaying").await?;
        return Ok(Outcome::Busy);
    }

    codec::send_struct(requester, &RespHead::ok_with_msg(Action::Relay, "Relay start"), Some(requester_cipher))
        .await?;

    let mut target_guard = target.lock_stream().await;
    target.set_relaying(true);

    // Switch the parked target into raw-copy mode.
    let notify_head = ReqHead { action: Action::Relay, data_len: 0 };
    if let Err(e) = codec::send_struct(&mut *target_guard, &notify_head, target.cipher()).await {
        target.set_relaying(false);
        drop(target_guard);
        engine.registry.remove(id).await;
        return Err(e).context("failed to notify target of relay start");
    }

    let splice_result = splice(requester, &mut target_guard).await;
    target.set_relaying(false);

    match splice_result {
        Ok(bytes) => {
            target.mark_active().await;
            drop(target_guard);
            spawn_post_relay_reverify(engine.clone(), target, id.to_string(), addr);
            info!(%id, bytes, bytes_human = %format_bytes(bytes), "relay: splice completed");
            Ok(Outcome::Spliced(bytes))
        }
        Err(e) => {
            drop(target_guard);
            warn!(%id, err = %e, "relay: splice failed, removing target");
            engine.registry.remove(id).await;
            Err(e)
        }
    }
}

async fn send_error(stream: &mut TcpStream, cipher: &Cipher, msg: &str) -> Result<()> {
    codec::send_struct(stream, &RespHead::error(Action::Relay, msg), Some(cipher)).await
}

/// Bidirectional copy between the requester and the target's stream.
/// Returns total bytes transferred across both directions on success.
async fn splice(requester: &mut TcpStream, target: &mut TcpStream) -> Result<u64> {
    let (req_read, req_write) = requester.split();
    let (tgt_read, tgt_write) = target.split();

    let bytes = Arc::new(AtomicU64::new(0));
    let actively_timeout = Arc::new(AtomicBool::new(false));
    let cancel = Arc::new(Notify::new());

    let forward = {
        let bytes = bytes.clone();
        let actively_timeout = actively_timeout.clone();
        let cancel = cancel.clone();
        async move {
            let res = pump(req_read, tgt_write, &bytes).await;
            actively_timeout.store(true, Ordering::SeqCst);
            cancel.notify_one();
            res
        }
    };

    let reverse = {
        let bytes = bytes.clone();
        let actively_timeout = actively_timeout.clone();
        async move {
            let res = tokio::select! {
                r = pump(tgt_read, req_write, &bytes) => r,
                _ = cancel.notified() => Ok(()),
            };
            match res {
                Ok(()) => {
                    if actively_timeout.load(Ordering::SeqCst) {
                        Ok(())
                    } else {
                        // The forward copy hasn't signaled yet, so the target
                        // side closed (or we were cancelled) before the
                        // requester said its piece.
                        Err(std::io::Error::other("relay dst actively disconnect"))
                    }
                }
                Err(e) => {
                    if actively_timeout.load(Ordering::SeqCst) {
                        Ok(())
                    } else {
                        Err(e)
                    }
                }
            }
        }
    };

    let (fwd_res, rev_res) = tokio::join!(forward, reverse);
    fwd_res.context("relay forward copy failed")?;
    rev_res.context("relay reverse copy failed")?;

    Ok(bytes.load(Ordering::SeqCst))
}

async fn pump<R, W>(mut r: R, mut w: W, counter: &AtomicU64) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; COPY_BUF_LEN];
    loop {
        let n = r.read(&mut buf).await?;
        if n == 0 {
            w.flush().await?;
            return Ok(());
        }
        w.write_all(&buf[..n]).await?;
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// Post-relay re-verification (§4.8 step 6): confirm the target is still
/// alive via a full round-trip heartbeat; remove it on failure.
fn spawn_post_relay_reverify(engine: Arc<RelayEngine>, target: Arc<LongConnection>, id: String, addr: SocketAddr) {
    tokio::spawn(async move {
        if !target.send_msg_detect_alive().await {
            warn!(%id, %addr, "relay: post-relay reverification failed, removing");
            engine.registry.remove(&id).await;
        }
    });
}
