//! Runtime configuration, read once at startup from `CHARTA_*` and
//! integration-specific environment variables.
//!
//! Unset integrations disable their feature rather than failing startup;
//! malformed values fall back to defaults with a warning. The only value
//! that must not silently default in production is the JWT secret, so a
//! generated one is loudly logged.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

pub const APP_NAME: &str = "Charta";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
/// One clinical shift.
const DEFAULT_JWT_TTL_SECS: u64 = 8 * 60 * 60;
/// Authority tokens last an hour; refresh with margin to spare.
const DEFAULT_TOKEN_REFRESH_SECS: u64 = 50 * 60;
/// Just under the fifteen minutes after which free-tier hosts idle out.
const DEFAULT_KEEPALIVE_SECS: u64 = 840;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub jwt_secret: String,
    pub jwt_ttl_secs: u64,
    pub icd: Option<AuthorityConfig>,
    pub icd_token_refresh: Duration,
    pub speech: Option<SpeechConfig>,
    pub mail: Option<MailConfig>,
    pub keepalive: Option<KeepaliveConfig>,
}

#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    pub base_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub release: String,
}

#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub api_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct KeepaliveConfig {
    pub url: String,
    pub every: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let bind_addr = parse_or_default(
            "CHARTA_BIND_ADDR",
            DEFAULT_BIND_ADDR.parse().unwrap(),
        );

        let data_dir = match std::env::var("CHARTA_DATA_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => default_data_dir(),
        };

        let jwt_secret = match std::env::var("CHARTA_JWT_SECRET") {
            Ok(secret) if !secret.trim().is_empty() => secret,
            _ => {
                tracing::warn!(
                    "CHARTA_JWT_SECRET is not set; using a generated secret. \
                     Sessions will not survive a restart."
                );
                generate_secret()
            }
        };

        let icd = match (
            std::env::var("ICD_API_CLIENT_ID"),
            std::env::var("ICD_API_CLIENT_SECRET"),
        ) {
            (Ok(client_id), Ok(client_secret)) => Some(AuthorityConfig {
                base_url: var_or("ICD_API_BASE_URL", "https://id.who.int/icd"),
                token_url: var_or(
                    "ICD_API_TOKEN_URL",
                    "https://icdaccessmanagement.who.int/connect/token",
                ),
                client_id,
                client_secret,
                release: var_or("ICD_API_RELEASE", "2019"),
            }),
            _ => None,
        };

        let speech = match (std::env::var("SPEECH_API_URL"), std::env::var("SPEECH_API_KEY")) {
            (Ok(api_url), Ok(api_key)) => Some(SpeechConfig { api_url, api_key }),
            _ => None,
        };

        let mail = match (std::env::var("MAIL_API_URL"), std::env::var("MAIL_API_KEY")) {
            (Ok(api_url), Ok(api_key)) => Some(MailConfig {
                api_url,
                api_key,
                from: var_or("MAIL_FROM", "no-reply@charta.local"),
            }),
            _ => None,
        };

        let keepalive = std::env::var("KEEPALIVE_URL").ok().map(|url| KeepaliveConfig {
            url,
            every: Duration::from_secs(parse_or_default(
                "KEEPALIVE_INTERVAL_SECS",
                DEFAULT_KEEPALIVE_SECS,
            )),
        });

        Self {
            bind_addr,
            data_dir,
            jwt_secret,
            jwt_ttl_secs: parse_or_default("CHARTA_JWT_TTL_SECS", DEFAULT_JWT_TTL_SECS),
            icd,
            icd_token_refresh: Duration::from_secs(parse_or_default(
                "ICD_TOKEN_REFRESH_SECS",
                DEFAULT_TOKEN_REFRESH_SECS,
            )),
            speech,
            mail,
            keepalive,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("charta.db")
    }
}

/// Default `RUST_LOG` filter when the environment does not set one.
pub fn default_log_filter() -> String {
    format!("info,{}=debug", env!("CARGO_PKG_NAME"))
}

/// ~/Charta/ when a home directory exists, ./charta-data otherwise
/// (containers often run without one).
fn default_data_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(APP_NAME),
        None => PathBuf::from("charta-data"),
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_or_default<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("Ignoring unparseable {name}={raw}, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 48];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
