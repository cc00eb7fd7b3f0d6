//! Dispatcher (C6): per-connection entry point. IP rate limiting, the
//! handshake, and routing the one-shot action header to its handler.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::wire::{Action, ReqHead, RespHead};
use super::{codec, connect, handshake, splice, RelayEngine};

pub async fn handle_connection(engine: Arc<RelayEngine>, mut stream: TcpStream, addr: SocketAddr) -> Result<()> {
    if !engine.ip_limiter.allow(&addr.ip()) {
        debug!(%addr, "dispatcher: ip rate limit exceeded, closing");
        return Ok(());
    }

    let established = match handshake::perform(&mut stream, engine.authenticator.as_ref(), engine.config.enable_auth).await? {
        Some(e) => e,
        None => return Ok(()),
    };
    let cipher = established.cipher;
    let auth_key_b64 = established.auth_key_b64;

    let head: ReqHead = codec::read_head(&mut stream, Some(&cipher)).await?;
    match head.action {
        Action::Connect => connect::handle(&engine, stream, addr, cipher, auth_key_b64, head).await,
        Action::Ping => {
            codec::send_struct(&mut stream, &RespHead::ok(Action::Ping), Some(&cipher)).await?;
            Ok(())
        }
        Action::Relay => splice::handle(&engine, stream, addr, cipher, head).await,
        other => {
            warn!(%addr, action = %other, "dispatcher: unknown first action");
            codec::send_struct(&mut stream, &RespHead::error(other, "Unknown action"), Some(&cipher)).await?;
            Ok(())
        }
    }
}
