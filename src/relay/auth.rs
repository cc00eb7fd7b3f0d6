//! Secret-key authenticator (C2). Built once at startup from the configured
//! `secret_info` list; immutable afterward, so lookups need no lock.

use std::collections::HashMap;

use base64::Engine as _;
use tracing::{debug, info};

use crate::config::SecretInfo;
use crate::relay::crypto::{generate_salt, Aes192Key, Cipher, SALT_LEN};

pub struct Authenticator {
    raw_salt: [u8; SALT_LEN],
    /// selector → candidate keys sharing that 8-hex-char prefix (collisions
    /// tolerated; all candidates are tried on auth).
    selectors: HashMap<String, Vec<Aes192Key>>,
    /// raw secret → derived key, used only to build the per-key cap table at
    /// engine construction.
    raw_to_key: HashMap<String, Aes192Key>,
}

impl Authenticator {
    pub fn new(secrets: &[SecretInfo]) -> Self {
        let raw_salt = generate_salt();
        info!(count = secrets.len(), "authenticator built from configured secrets");

        let mut selectors: HashMap<String, Vec<Aes192Key>> = HashMap::with_capacity(secrets.len());
        let mut raw_to_key = HashMap::with_capacity(secrets.len());

        for s in secrets {
            let key = Aes192Key::from_secret(&s.secret_key, &raw_salt);
            let selector = key.selector();
            debug!(selector = %selector, "registered secret key");
            let bucket = selectors.entry(selector).or_insert_with(Vec::new);
            if !bucket.iter().any(|k| k == &key) {
                bucket.push(key.clone());
            }
            raw_to_key.insert(s.secret_key.clone(), key);
        }

        Authenticator { raw_salt, selectors, raw_to_key }
    }

    pub fn salt_b64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.raw_salt)
    }

    pub fn raw_salt(&self) -> &[u8; SALT_LEN] {
        &self.raw_salt
    }

    /// Look up candidate keys by selector; try each against `auth_field` with
    /// AAD `aad`; success iff the opened plaintext starts with `b"AUTH"`.
    /// Returns the matching derived key on success.
    pub fn auth(&self, selector: &str, auth_field: &[u8], aad: &[u8]) -> (bool, Option<Aes192Key>) {
        let Some(candidates) = self.selectors.get(selector) else {
            return (false, None);
        };
        for key in candidates {
            let cipher = Cipher::new(key);
            if let Ok(plaintext) = cipher.open(auth_field, aad) {
                if plaintext.starts_with(b"AUTH") {
                    return (true, Some(key.clone()));
                }
            }
        }
        (false, None)
    }

    /// raw secret → derived key, for building the per-key connection cap
    /// table at engine construction.
    pub fn all_keys(&self) -> &HashMap<String, Aes192Key> {
        &self.raw_to_key
    }

    pub fn is_empty(&self) -> bool {
        self.raw_to_key.is_empty()
    }
}
