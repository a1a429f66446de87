use secrecy::SecretString;

use crate::config::helpers::{optional_env, parse_string_env};
use crate::error::ConfigError;
use crate::settings::Settings;

/// Transactional email provider settings.
///
/// Without an API key, notifications are logged instead of sent.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_key: Option<SecretString>,
    pub api_base: String,
    pub from: String,
    /// Recipient of advisor issue reports.
    pub admin_address: Option<String>,
    pub app_url: String,
}

pub(crate) fn is_plausible_email(raw: &str) -> bool {
    static EMAIL: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
        regex::Regex::new(r"^[^\s@<>]+@[^\s@<>]+\.[^\s@<>]+$").expect("valid email regex")
    });
    EMAIL.is_match(raw.trim())
}

/// Accept either `addr@host` or `Display Name <addr@host>`.
fn validate_sender(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    let address = match (trimmed.rfind('<'), trimmed.ends_with('>')) {
        (Some(open), true) => &trimmed[open + 1..trimmed.len() - 1],
        _ => trimmed,
    };
    if !is_plausible_email(address) {
        return Err(ConfigError::InvalidValue {
            key: "EMAIL_FROM".to_string(),
            message: format!("'{trimmed}' is not a valid sender address"),
        });
    }
    Ok(trimmed.to_string())
}

impl EmailConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let admin_address = optional_env("EMAIL_ADMIN_ADDRESS")?
            .or_else(|| settings.email.admin_address.clone())
            .map(|raw| raw.trim().to_string());
        if let Some(ref addr) = admin_address
            && !is_plausible_email(addr)
        {
            return Err(ConfigError::InvalidValue {
                key: "EMAIL_ADMIN_ADDRESS".to_string(),
                message: format!("'{addr}' is not a valid email address"),
            });
        }

        Ok(Self {
            api_key: optional_env("EMAIL_API_KEY")?.map(SecretString::from),
            api_base: parse_string_env("EMAIL_API_BASE", settings.email.api_base.clone())?
                .trim_end_matches('/')
                .to_string(),
            from: validate_sender(&parse_string_env(
                "EMAIL_FROM",
                settings.email.from.clone(),
            )?)?,
            admin_address,
            app_url: parse_string_env("APP_URL", settings.email.app_url.clone())?
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_accepts_display_name_form() {
        assert_eq!(
            validate_sender(" Advisor Connect <hello@example.com> ").expect("valid"),
            "Advisor Connect <hello@example.com>"
        );
        assert_eq!(
            validate_sender("hello@example.com").expect("valid"),
            "hello@example.com"
        );
    }

    #[test]
    fn sender_rejects_missing_domain() {
        let err = validate_sender("Advisor Connect <hello>").expect_err("must reject");
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "EMAIL_FROM"));
    }

    #[test]
    fn plausible_email_checks_shape_only() {
        assert!(is_plausible_email("a.b+c@firm.ca"));
        assert!(!is_plausible_email("no at sign"));
        assert!(!is_plausible_email("two@@firm.ca"));
    }
}
