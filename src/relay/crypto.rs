//! Crypto primitives for the handshake and per-frame sealing.
//!
//! - Secret → [`Aes192Key`]: PBKDF2-HMAC-SHA256, 10,000 iterations, salted.
//! - Session key: X25519 ECDH shared secret, truncated `SHA256(shared)[0..24]`.
//! - Selector: first 8 hex chars of `SHA256(key)` — lets the server shortlist
//!   candidate keys instead of trying all of them on every handshake.
//! - Frame sealing: AES-192-GCM, random 12-byte nonce prepended to ciphertext.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{AesGcm, Nonce};
use anyhow::{anyhow, Context, Result};
use pbkdf2::pbkdf2_hmac;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};

/// AES-192-GCM with the crate's standard 96-bit nonce.
type Aes192Gcm = AesGcm<aes::Aes192, aes_gcm::aead::consts::U12>;

pub const KEY_LEN: usize = 24; // 192 bits
pub const SALT_LEN: usize = 12;
const PBKDF2_ITERATIONS: u32 = 10_000;

/// A derived 24-byte AES-192 key. `Debug` is intentionally not derived so an
/// accidental `{:?}` in a log statement fails to compile rather than leaking
/// key material.
#[derive(Clone, PartialEq, Eq)]
pub struct Aes192Key(pub [u8; KEY_LEN]);

impl Aes192Key {
    /// `SHA256(shared_secret)[0..24]` — used for the per-session key derived
    /// from the ECDH exchange. Not a per-secret key, so PBKDF2 is unnecessary
    /// here: the ECDH shared secret is already high-entropy.
    pub fn from_ecdh_shared_secret(shared: &[u8; 32]) -> Self {
        let digest = Sha256::digest(shared);
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&digest[..KEY_LEN]);
        Aes192Key(key)
    }

    /// PBKDF2-HMAC-SHA256(password = secret, salt, 10,000 iterations).
    pub fn from_secret(secret: &str, salt: &[u8]) -> Self {
        let mut key = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(secret.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
        Aes192Key(key)
    }

    /// First 8 hex chars of `SHA256(key)`.
    pub fn selector(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..4])
    }

    pub fn to_base64(&self) -> String {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }
}

/// A random 12-byte PBKDF2 salt, generated once per process at startup.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Generate a fresh X25519 keypair for one handshake.
pub fn generate_ecdh_keypair() -> (x25519_dalek::StaticSecret, x25519_dalek::PublicKey) {
    let secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
    let public = x25519_dalek::PublicKey::from(&secret);
    (secret, public)
}

/// Decode a peer's base64 X25519 public key and compute the shared secret.
pub fn ecdh_shared_secret(
    our_secret: &x25519_dalek::StaticSecret,
    peer_public_b64: &str,
) -> Result<[u8; 32]> {
    use base64::Engine as _;
    let raw = base64::engine::general_purpose::STANDARD
        .decode(peer_public_b64)
        .context("invalid peer public key encoding")?;
    let bytes: [u8; 32] = raw
        .try_into()
        .map_err(|_| anyhow!("peer public key must be 32 bytes"))?;
    let peer_public = x25519_dalek::PublicKey::from(bytes);
    Ok(our_secret.diffie_hellman(&peer_public).to_bytes())
}

/// A ready-to-use AES-192-GCM cipher for one session or one auth key.
pub struct Cipher(Aes192Gcm);

impl Cipher {
    pub fn new(key: &Aes192Key) -> Self {
        Cipher(Aes192Gcm::new(aes_gcm::aead::generic_array::GenericArray::from_slice(&key.0)))
    }

    /// Seal `plaintext` with a random nonce; returns `nonce || ciphertext`.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ct = self
            .0
            .encrypt(nonce, Payload { msg: plaintext, aad })
            .map_err(|_| anyhow!("AEAD seal failed"))?;
        let mut out = Vec::with_capacity(12 + ct.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    /// Open a `nonce || ciphertext` blob sealed by [`Cipher::seal`].
    pub fn open(&self, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < 12 {
            return Err(anyhow!("sealed payload too short"));
        }
        let (nonce_bytes, ct) = sealed.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.0
            .decrypt(nonce, Payload { msg: ct, aad })
            .map_err(|_| anyhow!("AEAD open failed"))
    }
}
