//! Transactional email.
//!
//! [`Mailer`] delivers a rendered message; [`Notifier`] renders the
//! application's notifications and treats delivery failures as non-fatal.

mod http;
mod notifier;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;

use crate::config::EmailConfig;
use crate::error::EmailError;

pub use http::HttpMailer;
pub use notifier::{Notice, Notifier};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError>;
}

/// Logs messages instead of sending them. Used when no API key is set.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        tracing::info!(
            to = %message.to,
            subject = %message.subject,
            "Email delivery disabled; message not sent"
        );
        Ok(())
    }
}

/// Records messages in memory. Optionally fails every send.
#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<EmailMessage>>,
    fail: bool,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mailer whose sends always fail.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        if self.fail {
            return Err(EmailError::Transport("simulated failure".to_string()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message.clone());
        }
        Ok(())
    }
}

/// HTTP mailer when an API key is configured, otherwise [`LogMailer`].
pub fn mailer_from_config(config: &EmailConfig) -> Result<Arc<dyn Mailer>, EmailError> {
    match config.api_key {
        Some(ref key) => Ok(Arc::new(HttpMailer::new(
            &config.api_base,
            key.clone(),
            &config.from,
        )?)),
        None => {
            tracing::warn!("EMAIL_API_KEY not set; notifications will only be logged");
            Ok(Arc::new(LogMailer))
        }
    }
}
