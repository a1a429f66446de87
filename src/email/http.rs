use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::email::{EmailMessage, Mailer};
use crate::error::EmailError;

/// Resend-compatible `POST /emails` client.
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    from: String,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

impl HttpMailer {
    pub fn new(api_base: &str, api_key: SecretString, from: &str) -> Result<Self, EmailError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/emails", api_base.trim_end_matches('/')),
            api_key,
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        let body = SendRequest {
            from: &self.from,
            to: [message.to.as_str()],
            subject: &message.subject,
            html: &message.html,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            tracing::debug!(to = %message.to, subject = %message.subject, "Email sent");
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or(text);
        Err(EmailError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_matches_provider_shape() {
        let body = SendRequest {
            from: "Advisor Connect <noreply@example.com>",
            to: ["a@example.com"],
            subject: "Hi",
            html: "<p>Hi</p>",
        };
        let value = serde_json::to_value(&body).expect("encode");
        assert_eq!(value["to"], serde_json::json!(["a@example.com"]));
        assert_eq!(value["from"], "Advisor Connect <noreply@example.com>");
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let mailer = HttpMailer::new(
            "https://api.example.com/",
            SecretString::from("key".to_string()),
            "noreply@example.com",
        )
        .expect("mailer");
        assert_eq!(mailer.endpoint, "https://api.example.com/emails");
    }
}
