//! File-backed settings.
//!
//! Settings are the lowest-precedence configuration layer: every field has a
//! default, an optional TOML file overrides those, and environment variables
//! override both when [`crate::config::Config::resolve`] runs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub backend: BackendSettings,
    pub email: EmailSettings,
    pub gateway: GatewaySettings,
    pub lists: ListSettings,
    pub feed: FeedSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// `rest`, `memory` or `postgres`.
    pub kind: String,
    pub url: Option<String>,
    pub advisors_table: String,
    pub profiles_table: String,
    pub request_timeout_secs: u64,
    /// JSON array of advisors loaded into the in-memory backend at startup.
    pub seed_path: Option<String>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            kind: "rest".to_string(),
            url: None,
            advisors_table: "advisors".to_string(),
            profiles_table: "user_profiles".to_string(),
            request_timeout_secs: 20,
            seed_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailSettings {
    pub api_base: String,
    pub from: String,
    pub admin_address: Option<String>,
    /// Base URL used when building links inside emails.
    pub app_url: String,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            api_base: "https://api.resend.com".to_string(),
            from: "Advisor Connect <no-reply@advisorconnect.local>".to_string(),
            admin_address: None,
            app_url: "http://localhost:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub host: String,
    pub port: u16,
    pub login_rate_limit: u64,
    pub login_rate_window_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3100,
            login_rate_limit: 20,
            login_rate_window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListSettings {
    /// `json`, `memory` or `libsql`.
    pub store: String,
    pub path: Option<String>,
}

impl Default for ListSettings {
    fn default() -> Self {
        Self {
            store: "json".to_string(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub page_size: usize,
    pub cache_capacity: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            page_size: 50,
            cache_capacity: 64,
        }
    }
}

/// Directory holding settings and local data.
pub fn default_data_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("advisor-connect")
}

impl Settings {
    /// Load settings from `path`, or from the default location when `None`.
    ///
    /// An explicitly named file must exist; a missing default file yields
    /// defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_data_dir().join(SETTINGS_FILE), false),
        };

        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::SettingsFile {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };

        Self::from_toml(&raw).map_err(|reason| ConfigError::SettingsFile {
            path: path.display().to_string(),
            reason,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, String> {
        toml::from_str(raw).map_err(|e| e.to_string())
    }
}
