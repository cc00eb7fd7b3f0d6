//! Wire message shapes. Field names are case-sensitive and must match the
//! protocol exactly — they are serialized with `serde_json` as-is.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Hard cap on any single frame's ciphertext/plaintext length, in bytes.
/// Enforced by [`crate::relay::codec`] on every read.
pub const MAX_FRAME_LEN: u32 = 10 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StatusCode {
    Success = -1,
    Error = 0,
    AuthFailed = 1,
    KdfSaltMismatch = 2,
}

impl Serialize for StatusCode {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i32(*self as i32)
    }
}

impl<'de> Deserialize<'de> for StatusCode {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let v = i32::deserialize(d)?;
        match v {
            -1 => Ok(StatusCode::Success),
            0 => Ok(StatusCode::Error),
            1 => Ok(StatusCode::AuthFailed),
            2 => Ok(StatusCode::KdfSaltMismatch),
            other => Err(serde::de::Error::custom(format!("unknown status code {other}"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HandshakeReq {
    #[serde(rename = "secretKeySelector", default)]
    pub secret_key_selector: String,
    #[serde(rename = "authFieldB64", default)]
    pub auth_field_b64: String,
    #[serde(rename = "authAAD", default)]
    pub auth_aad: String,
    #[serde(rename = "kdfSaltB64", default)]
    pub kdf_salt_b64: String,
    #[serde(rename = "ecdhPublicKeyB64")]
    pub ecdh_public_key_b64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeResp {
    pub code: StatusCode,
    #[serde(default)]
    pub msg: String,
    #[serde(rename = "ecdhPublicKeyB64", default)]
    pub ecdh_public_key_b64: String,
    #[serde(rename = "kdfSaltB64", default)]
    pub kdf_salt_b64: String,
}

/// The four actions a client can dispatch after the handshake. `Heartbeat`
/// and `Close` are server/keepalive-internal and never arrive as the first
/// action from a freshly accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Connect,
    Ping,
    Relay,
    Heartbeat,
    Close,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Action::Connect => "connect",
            Action::Ping => "ping",
            Action::Relay => "relay",
            Action::Heartbeat => "heartbeat",
            Action::Close => "close",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReqHead {
    pub action: Action,
    #[serde(rename = "dataLen", default)]
    pub data_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespHead {
    pub code: StatusCode,
    #[serde(default)]
    pub msg: String,
    pub action: Action,
    #[serde(rename = "dataLen", default)]
    pub data_len: usize,
}

impl RespHead {
    pub fn ok(action: Action) -> Self {
        Self { code: StatusCode::Success, msg: "OK".to_string(), action, data_len: 0 }
    }

    pub fn ok_with_msg(action: Action, msg: impl Into<String>) -> Self {
        Self { code: StatusCode::Success, msg: msg.into(), action, data_len: 0 }
    }

    pub fn error(action: Action, msg: impl Into<String>) -> Self {
        Self { code: StatusCode::Error, msg: msg.into(), action, data_len: 0 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionReq {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayReq {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HeartbeatReq {
    pub id: String,
    #[serde(rename = "needResp", default)]
    pub need_resp: bool,
}
