use std::env;
use std::net::IpAddr;
use std::path::PathBuf;

use log::{info, warn};
use thiserror::Error;

const DEFAULT_TOKEN_SECRET: &str = "devsecret";
/// Ten years.
const MAX_TOKEN_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: IpAddr,
    pub port: u16,
    pub token_secret: String,
    pub token_ttl_secs: i64,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
    pub static_dir: PathBuf,
    pub allowed_origins: Vec<String>,
    pub messaging_link_base: String,
    pub allow_unverified_join: bool,
    pub seed_path: Option<PathBuf>,
    pub listing_page_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::from([0, 0, 0, 0]),
            port: 2052,
            token_secret: DEFAULT_TOKEN_SECRET.to_string(),
            token_ttl_secs: 7 * 24 * 60 * 60,
            tls_cert_path: None,
            tls_key_path: None,
            static_dir: PathBuf::from("public"),
            allowed_origins: Vec::new(),
            messaging_link_base: "https://wa.me".to_string(),
            allow_unverified_join: false,
            seed_path: None,
            listing_page_limit: 20,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let token_secret = get("TOKEN_SECRET").unwrap_or_else(|| {
            warn!("TOKEN_SECRET not set, using the development secret");
            defaults.token_secret.clone()
        });

        let config = Config {
            bind_addr: parse(&get, "BIND_ADDR", defaults.bind_addr)?,
            port: parse(&get, "PORT", defaults.port)?,
            token_secret,
            token_ttl_secs: parse(&get, "TOKEN_TTL_SECS", defaults.token_ttl_secs)?,
            tls_cert_path: get("TLS_CERT_PATH").map(PathBuf::from),
            tls_key_path: get("TLS_KEY_PATH").map(PathBuf::from),
            static_dir: get("STATIC_DIR").map_or(defaults.static_dir, PathBuf::from),
            allowed_origins: get("ALLOWED_ORIGINS")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            messaging_link_base: get("MESSAGING_LINK_BASE").unwrap_or(defaults.messaging_link_base),
            allow_unverified_join: parse(
                &get,
                "ALLOW_UNVERIFIED_JOIN",
                defaults.allow_unverified_join,
            )?,
            seed_path: get("SEED_PATH").map(PathBuf::from),
            listing_page_limit: parse(&get, "LISTING_PAGE_LIMIT", defaults.listing_page_limit)?,
        };

        if !(1..=MAX_TOKEN_TTL_SECS).contains(&config.token_ttl_secs) {
            return Err(ConfigError::Invalid {
                key: "TOKEN_TTL_SECS",
                value: config.token_ttl_secs.to_string(),
                reason: format!("must be between 1 and {MAX_TOKEN_TTL_SECS}"),
            });
        }

        Ok(config)
    }

    pub fn tls_paths(&self) -> Option<(&PathBuf, &PathBuf)> {
        self.tls_cert_path.as_ref().zip(self.tls_key_path.as_ref())
    }
}

fn parse<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + std::fmt::Display,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value,
            reason: e.to_string(),
        }),
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}
