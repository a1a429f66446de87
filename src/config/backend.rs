use std::time::Duration;

use secrecy::SecretString;

use crate::config::helpers::{optional_env, parse_number_env, parse_string_env};
use crate::error::ConfigError;
use crate::settings::Settings;

/// Which implementation serves the `advisors` and `user_profiles` tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableBackend {
    /// PostgREST tables + GoTrue auth over HTTP.
    Rest,
    /// Process-local tables and accounts. Development and tests only.
    Memory,
    /// Direct Postgres connection for tables; auth still goes over HTTP.
    Postgres,
}

impl TableBackend {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rest" | "hosted" => Ok(Self::Rest),
            "memory" | "in-memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(ConfigError::InvalidValue {
                key: "BACKEND_KIND".to_string(),
                message: format!("unsupported backend '{other}'"),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::Memory => "memory",
            Self::Postgres => "postgres",
        }
    }
}

/// Connection settings for the hosted backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub kind: TableBackend,
    /// Base URL without a trailing slash, e.g. `https://xyz.example.co`.
    pub url: Option<String>,
    pub anon_key: Option<SecretString>,
    /// Privileged key for admin user operations.
    pub service_key: Option<SecretString>,
    pub advisors_table: String,
    pub profiles_table: String,
    pub request_timeout: Duration,
    pub seed_path: Option<String>,
    pub database_url: Option<SecretString>,
    pub pool_size: usize,
}

pub(crate) fn validate_backend_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed = url::Url::parse(trimmed).map_err(|e| ConfigError::InvalidValue {
        key: "BACKEND_URL".to_string(),
        message: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue {
            key: "BACKEND_URL".to_string(),
            message: format!("scheme must be http or https, got '{}'", parsed.scheme()),
        });
    }
    if parsed.host_str().is_none() {
        return Err(ConfigError::InvalidValue {
            key: "BACKEND_URL".to_string(),
            message: "URL has no host".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

fn validate_table_name(key: &str, raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    let valid = !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !trimmed.starts_with(|c: char| c.is_ascii_digit());
    if !valid {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{trimmed}' is not a valid table name"),
        });
    }
    Ok(trimmed.to_string())
}

impl BackendConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let kind = TableBackend::from_str(&parse_string_env(
            "BACKEND_KIND",
            settings.backend.kind.clone(),
        )?)?;

        let url = match optional_env("BACKEND_URL")?.or_else(|| settings.backend.url.clone()) {
            Some(raw) => Some(validate_backend_url(&raw)?),
            None => None,
        };
        let anon_key = optional_env("BACKEND_ANON_KEY")?.map(SecretString::from);
        let service_key = optional_env("BACKEND_SERVICE_KEY")?.map(SecretString::from);
        let database_url = optional_env("DATABASE_URL")?.map(SecretString::from);

        if matches!(kind, TableBackend::Rest | TableBackend::Postgres) {
            if url.is_none() {
                return Err(ConfigError::Missing {
                    key: "BACKEND_URL".to_string(),
                    hint: format!("required for the '{}' backend", kind.as_str()),
                });
            }
            if anon_key.is_none() {
                return Err(ConfigError::Missing {
                    key: "BACKEND_ANON_KEY".to_string(),
                    hint: format!("required for the '{}' backend", kind.as_str()),
                });
            }
        }
        if kind == TableBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing {
                key: "DATABASE_URL".to_string(),
                hint: "required for the 'postgres' backend".to_string(),
            });
        }

        Ok(Self {
            kind,
            url,
            anon_key,
            service_key,
            advisors_table: validate_table_name(
                "BACKEND_ADVISORS_TABLE",
                &parse_string_env(
                    "BACKEND_ADVISORS_TABLE",
                    settings.backend.advisors_table.clone(),
                )?,
            )?,
            profiles_table: validate_table_name(
                "BACKEND_PROFILES_TABLE",
                &parse_string_env(
                    "BACKEND_PROFILES_TABLE",
                    settings.backend.profiles_table.clone(),
                )?,
            )?,
            request_timeout: Duration::from_secs(parse_number_env(
                "BACKEND_TIMEOUT_SECS",
                settings.backend.request_timeout_secs,
            )?),
            seed_path: optional_env("BACKEND_SEED_PATH")?
                .or_else(|| settings.backend.seed_path.clone()),
            database_url,
            pool_size: parse_number_env("DATABASE_POOL_SIZE", 8usize)?,
        })
    }

    /// In-memory configuration used by tests and local demos.
    pub fn memory() -> Self {
        Self {
            kind: TableBackend::Memory,
            url: None,
            anon_key: None,
            service_key: None,
            advisors_table: "advisors".to_string(),
            profiles_table: "user_profiles".to_string(),
            request_timeout: Duration::from_secs(20),
            seed_path: None,
            database_url: None,
            pool_size: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_url_trailing_slash_is_trimmed() {
        assert_eq!(
            validate_backend_url("https://abc.example.co/").expect("valid"),
            "https://abc.example.co"
        );
    }

    #[test]
    fn backend_url_rejects_non_http_schemes() {
        let err = validate_backend_url("ftp://abc.example.co").expect_err("must reject");
        let ConfigError::InvalidValue { key, message } = err else {
            panic!("expected InvalidValue");
        };
        assert_eq!(key, "BACKEND_URL");
        assert!(message.contains("ftp"), "unexpected message: {message}");
    }

    #[test]
    fn table_names_must_be_identifiers() {
        assert_eq!(
            validate_table_name("T", " advisors_v2 ").expect("valid"),
            "advisors_v2"
        );
        assert!(validate_table_name("T", "advisors;drop").is_err());
        assert!(validate_table_name("T", "2advisors").is_err());
        assert!(validate_table_name("T", "   ").is_err());
    }

    #[test]
    fn backend_kind_parses_aliases() {
        assert_eq!(
            TableBackend::from_str("In-Memory").expect("ok"),
            TableBackend::Memory
        );
        assert_eq!(
            TableBackend::from_str("postgresql").expect("ok"),
            TableBackend::Postgres
        );
        assert!(TableBackend::from_str("mongo").is_err());
    }
}
