//! Framed read/write (C1): every message on the wire is `u32_le(len) || body`,
//! where `body` is JSON, optionally AES-192-GCM sealed once the handshake has
//! established a session cipher. `len` is bounded by [`super::wire::MAX_FRAME_LEN`]
//! so a malicious or broken peer can't force an unbounded allocation.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::crypto::Cipher;
use super::wire::{HandshakeReq, MAX_FRAME_LEN};

async fn read_frame<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.context("read frame length")?;
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        bail!("frame length {len} exceeds max {MAX_FRAME_LEN}");
    }
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await.context("read frame body")?;
    Ok(body)
}

async fn write_frame<S: AsyncWrite + Unpin>(stream: &mut S, body: &[u8]) -> Result<()> {
    let len = u32::try_from(body.len()).context("frame body too large to frame")?;
    stream.write_all(&len.to_le_bytes()).await.context("write frame length")?;
    stream.write_all(body).await.context("write frame body")?;
    Ok(())
}

/// Read the plaintext `HandshakeReq` frame (no cipher exists yet).
pub async fn read_handshake_req<S: AsyncRead + Unpin>(stream: &mut S) -> Result<HandshakeReq> {
    let body = read_frame(stream).await?;
    serde_json::from_slice(&body).context("unmarshal handshake request")
}

/// Read a `ReqHead`/`RespHead`-shaped frame, decrypting first if `cipher` is set.
pub async fn read_head<S: AsyncRead + Unpin, T: DeserializeOwned>(
    stream: &mut S,
    cipher: Option<&Cipher>,
) -> Result<T> {
    let body = read_frame(stream).await?;
    let plain = match cipher {
        Some(c) => c.open(&body, b"").context("decrypt head")?,
        None => body,
    };
    serde_json::from_slice(&plain).context("unmarshal head")
}

/// Read exactly `data_len` raw ciphertext/plaintext bytes (not length-prefixed
/// — the caller already knows the size from the preceding head) and decode as `T`.
pub async fn read_req<S: AsyncRead + Unpin, T: DeserializeOwned>(
    stream: &mut S,
    data_len: usize,
    cipher: Option<&Cipher>,
) -> Result<T> {
    let mut buf = vec![0u8; data_len];
    stream.read_exact(&mut buf).await.context("read request body")?;
    let plain = match cipher {
        Some(c) => c.open(&buf, b"").context("decrypt request body")?,
        None => buf,
    };
    serde_json::from_slice(&plain).context("unmarshal request body")
}

/// Marshal `value`, optionally seal it, and write as a length-prefixed frame.
pub async fn send_struct<S: AsyncWrite + Unpin, T: Serialize>(
    stream: &mut S,
    value: &T,
    cipher: Option<&Cipher>,
) -> Result<()> {
    let plain = serde_json::to_vec(value).context("marshal item")?;
    let body = match cipher {
        Some(c) => c.seal(&plain, b"").context("encrypt item")?,
        None => plain,
    };
    write_frame(stream, &body).await
}

/// Write raw bytes (already framed as a body, e.g. a relay response payload
/// following its `RespHead`) with no additional length prefix of its own.
pub async fn write_raw<S: AsyncWrite + Unpin>(stream: &mut S, data: &[u8]) -> Result<()> {
    stream.write_all(data).await.context("write raw body")
}
