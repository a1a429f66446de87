use std::sync::Arc;

use tera::{Context, Tera};

use crate::advisor::Advisor;
use crate::email::{EmailMessage, Mailer};
use crate::error::EmailError;

const TEMPLATES: [(&str, &str); 6] = [
    ("welcome.html", include_str!("../../templates/email/welcome.html")),
    (
        "password_reset.html",
        include_str!("../../templates/email/password_reset.html"),
    ),
    (
        "admin_invite.html",
        include_str!("../../templates/email/admin_invite.html"),
    ),
    (
        "account_activated.html",
        include_str!("../../templates/email/account_activated.html"),
    ),
    (
        "account_deactivated.html",
        include_str!("../../templates/email/account_deactivated.html"),
    ),
    (
        "advisor_issue.html",
        include_str!("../../templates/email/advisor_issue.html"),
    ),
];

/// A notification the application sends.
#[derive(Debug, Clone)]
pub enum Notice {
    Welcome {
        name: String,
    },
    PasswordReset {
        link: String,
    },
    AdminInvite {
        name: String,
        email: String,
        temporary_password: String,
    },
    AccountActivated {
        name: String,
    },
    AccountDeactivated {
        name: String,
    },
    AdvisorIssue {
        reporter: String,
        advisor: Box<Advisor>,
        message: String,
    },
}

impl Notice {
    fn template(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome.html",
            Self::PasswordReset { .. } => "password_reset.html",
            Self::AdminInvite { .. } => "admin_invite.html",
            Self::AccountActivated { .. } => "account_activated.html",
            Self::AccountDeactivated { .. } => "account_deactivated.html",
            Self::AdvisorIssue { .. } => "advisor_issue.html",
        }
    }

    fn subject(&self) -> String {
        match self {
            Self::Welcome { .. } => "Welcome to Advisor Connect".to_string(),
            Self::PasswordReset { .. } => "Reset your Advisor Connect password".to_string(),
            Self::AdminInvite { .. } => "Your Advisor Connect account".to_string(),
            Self::AccountActivated { .. } => "Your account has been activated".to_string(),
            Self::AccountDeactivated { .. } => "Your account has been deactivated".to_string(),
            Self::AdvisorIssue { advisor, .. } => {
                format!("Issue reported for {}", advisor.full_name())
            }
        }
    }

    fn context(&self, app_url: &str) -> Context {
        let mut ctx = Context::new();
        ctx.insert("app_url", app_url);
        match self {
            Self::Welcome { name }
            | Self::AccountActivated { name }
            | Self::AccountDeactivated { name } => ctx.insert("name", name),
            Self::PasswordReset { link } => ctx.insert("link", link),
            Self::AdminInvite {
                name,
                email,
                temporary_password,
            } => {
                ctx.insert("name", name);
                ctx.insert("email", email);
                ctx.insert("temporary_password", temporary_password);
            }
            Self::AdvisorIssue {
                reporter,
                advisor,
                message,
            } => {
                ctx.insert("reporter", reporter);
                ctx.insert("advisor_name", &advisor.full_name());
                ctx.insert("advisor_id", &advisor.id.as_ref().map(|id| id.to_string()));
                ctx.insert("firm", &advisor.firm);
                ctx.insert("city", &advisor.city);
                ctx.insert("province", &advisor.province);
                ctx.insert("message", message);
            }
        }
        ctx
    }
}

/// Renders notifications and hands them to a [`Mailer`].
///
/// Sends never fail the caller: errors are logged and reported as `false`.
pub struct Notifier {
    mailer: Arc<dyn Mailer>,
    templates: Tera,
    app_url: String,
    admin_address: Option<String>,
}

impl Notifier {
    pub fn new(
        mailer: Arc<dyn Mailer>,
        app_url: &str,
        admin_address: Option<String>,
    ) -> Result<Self, EmailError> {
        let mut templates = Tera::default();
        templates
            .add_raw_templates(TEMPLATES)
            .map_err(|e| EmailError::Template {
                template: "email".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            mailer,
            templates,
            app_url: app_url.trim_end_matches('/').to_string(),
            admin_address,
        })
    }

    pub fn render(&self, to: &str, notice: &Notice) -> Result<EmailMessage, EmailError> {
        let template = notice.template();
        let html = self
            .templates
            .render(template, &notice.context(&self.app_url))
            .map_err(|e| EmailError::Template {
                template: template.to_string(),
                reason: e.to_string(),
            })?;
        Ok(EmailMessage {
            to: to.to_string(),
            subject: notice.subject(),
            html,
        })
    }

    /// Render and send. Returns whether the message was handed off.
    pub async fn send(&self, to: &str, notice: Notice) -> bool {
        let result = match self.render(to, &notice) {
            Ok(message) => self.mailer.send(&message).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(to, template = notice.template(), "Email not sent: {}", e);
                false
            }
        }
    }

    /// Send to the configured admin address, if any.
    pub async fn notify_admin(&self, notice: Notice) -> bool {
        match self.admin_address.clone() {
            Some(addr) => self.send(&addr, notice).await,
            None => {
                tracing::warn!(
                    template = notice.template(),
                    "EMAIL_ADMIN_ADDRESS not set; admin notification dropped"
                );
                false
            }
        }
    }
}
