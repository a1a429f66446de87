//! Runtime configuration.
//!
//! Resolution order: built-in defaults, then the settings file, then
//! environment variables (a `.env` file is loaded by the binary first).

mod backend;
mod email;
pub(crate) mod helpers;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

pub use backend::{BackendConfig, TableBackend};
pub use email::EmailConfig;
pub(crate) use email::is_plausible_email;

use crate::config::helpers::{optional_env, parse_number_env, parse_string_env};
use crate::error::ConfigError;
use crate::settings::{Settings, default_data_dir};

/// HTTP gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: IpAddr,
    pub port: u16,
    pub login_rate_limit: u64,
    pub login_rate_window_secs: u64,
}

impl GatewayConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let host_raw = parse_string_env("GATEWAY_HOST", settings.gateway.host.clone())?;
        let host = host_raw
            .trim()
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                key: "GATEWAY_HOST".to_string(),
                message: e.to_string(),
            })?;
        let login_rate_limit =
            parse_number_env("LOGIN_RATE_LIMIT", settings.gateway.login_rate_limit)?;
        if login_rate_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "LOGIN_RATE_LIMIT".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(Self {
            host,
            port: parse_number_env("GATEWAY_PORT", settings.gateway.port)?,
            login_rate_limit,
            login_rate_window_secs: parse_number_env(
                "LOGIN_RATE_WINDOW_SECS",
                settings.gateway.login_rate_window_secs,
            )?,
        })
    }
}

/// Storage medium for favorites and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListStoreKind {
    Json,
    Memory,
    LibSql,
}

impl ListStoreKind {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" | "file" => Ok(Self::Json),
            "memory" => Ok(Self::Memory),
            "libsql" | "sqlite" => Ok(Self::LibSql),
            other => Err(ConfigError::InvalidValue {
                key: "LIST_STORE".to_string(),
                message: format!("unsupported list store '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListStoreConfig {
    pub kind: ListStoreKind,
    /// Directory for JSON blobs, or the database file for libSQL.
    pub path: PathBuf,
}

impl ListStoreConfig {
    fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let kind = ListStoreKind::from_str(&parse_string_env(
            "LIST_STORE",
            settings.lists.store.clone(),
        )?)?;
        let path = optional_env("LIST_STORE_PATH")?
            .or_else(|| settings.lists.path.clone())
            .map(PathBuf::from)
            .unwrap_or_else(|| match kind {
                ListStoreKind::LibSql => default_data_dir().join("lists.db"),
                _ => default_data_dir().join("lists"),
            });
        Ok(Self { kind, path })
    }
}

/// Dashboard paging and filter-cache sizing.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub page_size: usize,
    pub cache_capacity: usize,
}

pub const MAX_PAGE_SIZE: usize = 500;

impl FeedConfig {
    fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let page_size = parse_number_env("FEED_PAGE_SIZE", settings.feed.page_size)?;
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::InvalidValue {
                key: "FEED_PAGE_SIZE".to_string(),
                message: format!("must be between 1 and {MAX_PAGE_SIZE}"),
            });
        }
        let cache_capacity =
            parse_number_env("FILTER_CACHE_CAPACITY", settings.feed.cache_capacity)?;
        if cache_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "FILTER_CACHE_CAPACITY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(Self {
            page_size,
            cache_capacity,
        })
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            cache_capacity: 64,
        }
    }
}

/// Fully resolved application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    pub email: EmailConfig,
    pub gateway: GatewayConfig,
    pub lists: ListStoreConfig,
    pub feed: FeedConfig,
}

impl Config {
    pub fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            backend: BackendConfig::resolve(settings)?,
            email: EmailConfig::resolve(settings)?,
            gateway: GatewayConfig::resolve(settings)?,
            lists: ListStoreConfig::resolve(settings)?,
            feed: FeedConfig::resolve(settings)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_store_kind_parses_aliases() {
        assert_eq!(ListStoreKind::from_str("file").expect("ok"), ListStoreKind::Json);
        assert_eq!(ListStoreKind::from_str("SQLite").expect("ok"), ListStoreKind::LibSql);
        let err = ListStoreKind::from_str("redis").expect_err("must reject");
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "LIST_STORE"));
    }

    #[test]
    fn feed_rejects_out_of_range_page_size() {
        let mut settings = Settings::default();
        settings.feed.page_size = 0;
        assert!(FeedConfig::resolve(&settings).is_err());
        settings.feed.page_size = MAX_PAGE_SIZE + 1;
        assert!(FeedConfig::resolve(&settings).is_err());
        settings.feed.page_size = 20;
        assert_eq!(FeedConfig::resolve(&settings).expect("ok").page_size, 20);
    }

    #[test]
    fn gateway_defaults_to_loopback() {
        let config = GatewayConfig::resolve(&Settings::default()).expect("gateway config");
        assert!(config.host.is_loopback());
        assert_eq!(config.port, 3100);
    }
}
