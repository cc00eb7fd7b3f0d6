//! Server-side encrypted handshake (C3): X25519 ECDH plus optional
//! authentication binding, producing a per-session AES-192-GCM cipher.
//!
//! See spec §4.3. The one subtlety worth calling out: a KDF salt mismatch is
//! not terminal — the client is expected to retry once on the same TCP
//! connection, now quoting the salt we hand back in the response. We honor
//! exactly one such retry here rather than pushing the loop up into the
//! dispatcher, since the retry is purely a handshake-level concern.

use anyhow::Result;
use base64::Engine as _;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::auth::Authenticator;
use super::codec;
use super::crypto::{self, Aes192Key, Cipher};
use super::wire::{HandshakeReq, HandshakeResp, StatusCode};

/// A completed handshake: the per-session cipher, plus the auth key the
/// peer authenticated with (`None` when the engine runs without auth).
pub struct Established {
    pub cipher: Cipher,
    pub auth_key_b64: Option<String>,
}

enum Step {
    Established(Established),
    Retry,
    Rejected,
}

/// Run the handshake to completion over `stream`, including the single
/// permitted KDF-salt-mismatch retry. Returns `None` if the peer never
/// completes a valid handshake within that budget — the caller should just
/// close the connection without further diagnostics.
pub async fn perform(
    stream: &mut TcpStream,
    authenticator: Option<&Authenticator>,
    enable_auth: bool,
) -> Result<Option<Established>> {
    for attempt in 0..2u8 {
        let req = codec::read_handshake_req(stream).await?;
        match try_once(stream, authenticator, enable_auth, &req).await? {
            Step::Established(e) => return Ok(Some(e)),
            Step::Rejected => return Ok(None),
            Step::Retry if attempt == 0 => {
                debug!("handshake: kdf salt mismatch, awaiting client retry");
                continue;
            }
            Step::Retry => return Ok(None),
        }
    }
    Ok(None)
}

async fn try_once(
    stream: &mut TcpStream,
    authenticator: Option<&Authenticator>,
    enable_auth: bool,
    req: &HandshakeReq,
) -> Result<Step> {
    let has_auth_field = !req.auth_field_b64.is_empty();

    // Step 2: client presents an auth blob but we have no authenticator at all.
    if has_auth_field && authenticator.is_none() {
        reply(stream, StatusCode::AuthFailed, "authentication not configured", "", "").await?;
        return Ok(Step::Rejected);
    }

    // Step 3: salt mismatch gets exactly one retry, carrying our salt.
    if let (Some(authr), true) = (authenticator, has_auth_field) {
        let salt_ok = !req.kdf_salt_b64.is_empty() && req.kdf_salt_b64 == authr.salt_b64();
        if !salt_ok {
            reply(stream, StatusCode::KdfSaltMismatch, "kdf salt mismatch", "", &authr.salt_b64()).await?;
            return Ok(Step::Retry);
        }
    }

    // Step 4: auth is required by config and the client sent no auth blob.
    if enable_auth && !has_auth_field {
        reply(stream, StatusCode::AuthFailed, "authentication required", "", "").await?;
        return Ok(Step::Rejected);
    }

    // Step 5: AAD is mandatory whenever an auth blob is present.
    if has_auth_field && req.auth_aad.is_empty() {
        reply(stream, StatusCode::AuthFailed, "authAAD is required with authFieldB64", "", "").await?;
        return Ok(Step::Rejected);
    }

    // Step 6: verify the auth blob against the matching candidate key(s).
    let mut matched_key: Option<Aes192Key> = None;
    if has_auth_field {
        let authr = authenticator.expect("checked above");
        let auth_field = base64::engine::general_purpose::STANDARD
            .decode(&req.auth_field_b64)
            .unwrap_or_default();
        let (ok, key) = authr.auth(&req.secret_key_selector, &auth_field, req.auth_aad.as_bytes());
        if !ok {
            warn!(selector = %req.secret_key_selector, "handshake: auth failed");
            reply(stream, StatusCode::AuthFailed, "auth failed", "", "").await?;
            return Ok(Step::Rejected);
        }
        matched_key = key;
    }

    // Step 7: X25519 ECDH -> 24-byte session key.
    let (server_secret, server_public) = crypto::generate_ecdh_keypair();
    let shared = match crypto::ecdh_shared_secret(&server_secret, &req.ecdh_public_key_b64) {
        Ok(s) => s,
        Err(e) => {
            warn!(err = %e, "handshake: bad client ecdh public key");
            reply(stream, StatusCode::Error, "invalid ecdh public key", "", "").await?;
            return Ok(Step::Rejected);
        }
    };
    let session_key = Aes192Key::from_ecdh_shared_secret(&shared);
    let cipher = Cipher::new(&session_key);

    // Step 8: reply with our ephemeral public key, sealed under the matched
    // auth key (AAD = "AUTH") when authenticated, plain otherwise.
    let server_public_b64 = match &matched_key {
        Some(key) => {
            let sealed = Cipher::new(key).seal(server_public.as_bytes(), b"AUTH")?;
            base64::engine::general_purpose::STANDARD.encode(sealed)
        }
        None => base64::engine::general_purpose::STANDARD.encode(server_public.as_bytes()),
    };

    reply(stream, StatusCode::Success, "", &server_public_b64, "").await?;

    Ok(Step::Established(Established {
        cipher,
        auth_key_b64: matched_key.map(|k| k.to_base64()),
    }))
}

async fn reply(
    stream: &mut TcpStream,
    code: StatusCode,
    msg: &str,
    ecdh_public_key_b64: &str,
    kdf_salt_b64: &str,
) -> Result<()> {
    let resp = HandshakeResp {
        code,
        msg: msg.to_string(),
        ecdh_public_key_b64: ecdh_public_key_b64.to_string(),
        kdf_salt_b64: kdf_salt_b64.to_string(),
    };
    codec::send_struct(stream, &resp, None).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecretInfo;
    use rand_core::{OsRng, RngCore};
    use tokio::net::{TcpListener, TcpStream};

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (accept, client) = tokio::join!(listener.accept(), connect);
        (accept.unwrap().0, client.unwrap())
    }

    fn client_ecdh_pub_b64() -> (x25519_dalek::StaticSecret, String) {
        let (secret, public) = crypto::generate_ecdh_keypair();
        (secret, base64::engine::general_purpose::STANDARD.encode(public.as_bytes()))
    }

    #[tokio::test]
    async fn unauthenticated_handshake_succeeds() {
        let (mut server, mut client) = tcp_pair().await;
        let (_client_secret, client_pub_b64) = client_ecdh_pub_b64();

        let server_task = tokio::spawn(async move { perform(&mut server, None, false).await.unwrap() });

        let req = HandshakeReq {
            secret_key_selector: String::new(),
            auth_field_b64: String::new(),
            auth_aad: String::new(),
            kdf_salt_b64: String::new(),
            ecdh_public_key_b64: client_pub_b64,
        };
        codec::send_struct(&mut client, &req, None).await.unwrap();
        let resp: HandshakeResp = codec::read_head(&mut client, None).await.unwrap();
        assert_eq!(resp.code, StatusCode::Success);

        let established = server_task.await.unwrap();
        assert!(established.is_some());
        assert!(established.unwrap().auth_key_b64.is_none());
    }

    #[tokio::test]
    async fn kdf_salt_mismatch_is_retried_once_then_succeeds() {
        let authenticator = Authenticator::new(&[SecretInfo { secret_key: "s1".into(), max_conn: 5 }]);
        let (mut server, mut client) = tcp_pair().await;
        let (_client_secret, client_pub_b64) = client_ecdh_pub_b64();

        let salt = authenticator.salt_b64();
        let key = Aes192Key::from_secret("s1", authenticator.raw_salt());
        let selector = key.selector();

        let server_task = tokio::spawn(async move { perform(&mut server, Some(&authenticator), true).await.unwrap() });

        // First attempt: wrong salt.
        let mut plaintext = b"AUTH".to_vec();
        let mut rest = [0u8; 16];
        OsRng.fill_bytes(&mut rest);
        plaintext.extend_from_slice(&rest);
        let wrong_key = Aes192Key::from_secret("s1", b"totally-wrong-salt-x");
        let auth_field = Cipher::new(&wrong_key).seal(&plaintext, b"ctx").unwrap();
        let req1 = HandshakeReq {
            secret_key_selector: wrong_key.selector(),
            auth_field_b64: base64::engine::general_purpose::STANDARD.encode(&auth_field),
            auth_aad: "ctx".to_string(),
            kdf_salt_b64: "wrong-salt".to_string(),
            ecdh_public_key_b64: client_pub_b64.clone(),
        };
        codec::send_struct(&mut client, &req1, None).await.unwrap();
        let resp1: HandshakeResp = codec::read_head(&mut client, None).await.unwrap();
        assert_eq!(resp1.code, StatusCode::KdfSaltMismatch);
        assert_eq!(resp1.kdf_salt_b64, salt);

        // Second attempt: correct salt, correct key.
        let auth_field2 = Cipher::new(&key).seal(&plaintext, b"ctx").unwrap();
        let req2 = HandshakeReq {
            secret_key_selector: selector,
            auth_field_b64: base64::engine::general_purpose::STANDARD.encode(&auth_field2),
            auth_aad: "ctx".to_string(),
            kdf_salt_b64: resp1.kdf_salt_b64,
            ecdh_public_key_b64: client_pub_b64,
        };
        codec::send_struct(&mut client, &req2, None).await.unwrap();
        let resp2: HandshakeResp = codec::read_head(&mut client, None).await.unwrap();
        assert_eq!(resp2.code, StatusCode::Success);

        let established = server_task.await.unwrap().unwrap();
        assert!(established.auth_key_b64.is_some());
    }

    #[tokio::test]
    async fn auth_required_but_missing_is_rejected() {
        let authenticator = Authenticator::new(&[SecretInfo { secret_key: "s1".into(), max_conn: 5 }]);
        let (mut server, mut client) = tcp_pair().await;
        let (_client_secret, client_pub_b64) = client_ecdh_pub_b64();

        let server_task = tokio::spawn(async move { perform(&mut server, Some(&authenticator), true).await.unwrap() });

        let req = HandshakeReq {
            secret_key_selector: String::new(),
            auth_field_b64: String::new(),
            auth_aad: String::new(),
            kdf_salt_b64: String::new(),
            ecdh_public_key_b64: client_pub_b64,
        };
        codec::send_struct(&mut client, &req, None).await.unwrap();
        let resp: HandshakeResp = codec::read_head(&mut client, None).await.unwrap();
        assert_eq!(resp.code, StatusCode::AuthFailed);

        assert!(server_task.await.unwrap().is_none());
    }
}
