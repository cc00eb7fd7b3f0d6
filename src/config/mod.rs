//! Engine configuration: command line, environment, and JSON config file.
//!
//! Load order is layered low-to-high: built-in defaults, then command line
//! flags, then environment variables, then the JSON config file — each layer
//! only overrides the fields it actually specifies, and the JSON file (loaded
//! last) wins if present. This mirrors the original relay server, which
//! accepts `--config path/to.json` and otherwise falls back to flags/env.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:16779";
const DEFAULT_MAX_CONN_TOTAL: usize = 100;
const DEFAULT_IP_RATE_PER_MINUTE: u32 = 1000;
const DEFAULT_IP_RATE_BURST: u32 = 6;
const DEFAULT_ID_RATE_PER_MINUTE: u32 = 120;
const DEFAULT_ID_RATE_BURST: u32 = 6;

/// One configured secret: the raw passphrase and the connection cap bound to
/// the AES192Key derived from it.
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct SecretInfo {
    pub secret_key: String,
    #[serde(default = "default_max_conn")]
    pub max_conn: usize,
}

fn default_max_conn() -> usize {
    5
}

/// Fields the JSON config file may set. Every field is optional so that a
/// partial file only overrides what it mentions; anything absent falls
/// through to the CLI/env layer or the built-in default.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    listen_addr: Option<String>,
    max_conn_total: Option<usize>,
    enable_auth: Option<bool>,
    secret_info: Option<Vec<SecretInfo>>,
    id_whitelist: Option<Vec<String>>,
    log: Option<String>,
    ip_rate_per_minute: Option<u32>,
    ip_rate_burst: Option<u32>,
    id_rate_per_minute: Option<u32>,
    id_rate_burst: Option<u32>,
}

fn load_file(path: &Path) -> Option<FileConfig> {
    let contents = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<FileConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config file — ignoring");
            None
        }
    }
}

/// Resolved engine configuration. See spec §3/§6.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub max_conn_total: usize,
    pub enable_auth: bool,
    pub secret_info: Vec<SecretInfo>,
    /// Enforced in `relay::connect::handle`, immediately after reading
    /// `ConnectionReq.id` — empty means no restriction (spec §9).
    pub id_whitelist: Vec<String>,
    pub log: String,
    pub ip_rate_per_minute: u32,
    pub ip_rate_burst: u32,
    pub id_rate_per_minute: u32,
    pub id_rate_burst: u32,
}

/// Overrides supplied from the command line / environment (via clap). Every
/// field is `Option` because clap leaves unset flags as `None` rather than
/// pinning them to a default — the default is applied only once all three
/// layers have been consulted.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub listen_addr: Option<String>,
    pub max_conn_total: Option<usize>,
    pub enable_auth: Option<bool>,
    pub log: Option<String>,
    pub config_file: Option<PathBuf>,
}

impl Config {
    /// Build the layered config: defaults → CLI/env → JSON file.
    pub fn load(cli: CliOverrides) -> Self {
        let mut cfg = Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            max_conn_total: DEFAULT_MAX_CONN_TOTAL,
            enable_auth: false,
            secret_info: Vec::new(),
            id_whitelist: Vec::new(),
            log: "info".to_string(),
            ip_rate_per_minute: DEFAULT_IP_RATE_PER_MINUTE,
            ip_rate_burst: DEFAULT_IP_RATE_BURST,
            id_rate_per_minute: DEFAULT_ID_RATE_PER_MINUTE,
            id_rate_burst: DEFAULT_ID_RATE_BURST,
        };

        if let Some(v) = cli.listen_addr {
            cfg.listen_addr = v;
        }
        if let Some(v) = cli.max_conn_total {
            cfg.max_conn_total = v;
        }
        if let Some(v) = cli.enable_auth {
            cfg.enable_auth = v;
        }
        if let Some(v) = cli.log {
            cfg.log = v;
        }

        if let Some(path) = cli.config_file.as_deref() {
            if let Some(file) = load_file(path) {
                info!(path = %path.display(), "config file loaded");
                if let Some(v) = file.listen_addr {
                    cfg.listen_addr = v;
                }
                if let Some(v) = file.max_conn_total {
                    cfg.max_conn_total = v;
                }
                if let Some(v) = file.enable_auth {
                    cfg.enable_auth = v;
                }
                if let Some(v) = file.secret_info {
                    cfg.secret_info = v;
                }
                if let Some(v) = file.id_whitelist {
                    cfg.id_whitelist = v;
                }
                if let Some(v) = file.log {
                    cfg.log = v;
                }
                if let Some(v) = file.ip_rate_per_minute {
                    cfg.ip_rate_per_minute = v;
                }
                if let Some(v) = file.ip_rate_burst {
                    cfg.ip_rate_burst = v;
                }
                if let Some(v) = file.id_rate_per_minute {
                    cfg.id_rate_per_minute = v;
                }
                if let Some(v) = file.id_rate_burst {
                    cfg.id_rate_burst = v;
                }
            } else {
                warn!(path = %path.display(), "config file missing or unreadable — using CLI/env/defaults only");
            }
        }

        if cfg.enable_auth && cfg.secret_info.is_empty() {
            error!("enable_auth is set but no secret_info entries are configured");
        }

        cfg
    }
}
