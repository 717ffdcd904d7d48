// SMTP email delivery via lettre. Sends are fire-and-forget: the token is
// already persisted when the send is queued, so a failed delivery only
// costs the user a resend. Token values never reach the logs.

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::app_config::EmailSettings;

/// Outbound send deadline for the detached task
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum EmailError {
    #[error("Invalid email configuration: {0}")]
    Config(String),
}

pub struct EmailService {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    frontend_base_url: String,
}

impl EmailService {
    pub fn new(settings: &EmailSettings) -> Result<Self, EmailError> {
        let mut builder = if settings.enable_ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.smtp_host)
                .map_err(|e| EmailError::Config(e.to_string()))?
                .port(settings.smtp_port)
        } else {
            // Plaintext transport for local relays (e.g. MailHog)
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.smtp_host)
                .port(settings.smtp_port)
        };

        if !settings.smtp_username.is_empty() && !settings.smtp_password.is_empty() {
            builder = builder.credentials(Credentials::new(
                settings.smtp_username.clone(),
                settings.smtp_password.clone(),
            ));
        }

        let from = format!("{} <{}>", settings.from_name, settings.from_email)
            .parse()
            .map_err(|e| EmailError::Config(format!("invalid from address: {}", e)))?;

        info!(
            "Email service initialized against {}:{}",
            settings.smtp_host, settings.smtp_port
        );

        Ok(Self {
            transport: builder.build(),
            from,
            frontend_base_url: settings.frontend_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Queue the account-verification email
    pub fn queue_verification(&self, to: &str, username: &str, token: &str) {
        let link = format!("{}/verify-email?token={}", self.frontend_base_url, token);
        let body = format!(
            "Hello {},\n\n\
             Welcome to KeyGate. Confirm your email address by opening the link below:\n\n\
             {}\n\n\
             The link is valid for 24 hours. If you did not create this account, you can \
             ignore this message.\n",
            username, link
        );

        self.queue_send(to, "Verify your KeyGate account", body, "verification");
    }

    /// Queue the password-reset email
    pub fn queue_password_reset(&self, to: &str, username: &str, token: &str) {
        let link = format!("{}/reset-password?token={}", self.frontend_base_url, token);
        let body = format!(
            "Hello {},\n\n\
             A password reset was requested for your KeyGate account. Open the link below \
             to choose a new password:\n\n\
             {}\n\n\
             The link is valid for one hour. If you did not request a reset, no action is \
             needed.\n",
            username, link
        );

        self.queue_send(to, "Reset your KeyGate password", body, "password reset");
    }

    /// Fire-and-forget: build the message and detach the send with its own
    /// timeout so the caller returns immediately
    fn queue_send(&self, to: &str, subject: &str, body: String, kind: &'static str) {
        let message = Message::builder()
            .from(self.from.clone())
            .to(match to.parse() {
                Ok(mailbox) => mailbox,
                Err(e) => {
                    warn!(kind, "Skipping email send, invalid recipient: {}", e);
                    return;
                },
            })
            .subject(subject)
            .body(body);

        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!(kind, "Failed to build email: {}", e);
                return;
            },
        };

        let transport = self.transport.clone();
        let recipient = to.to_string();

        tokio::spawn(async move {
            match tokio::time::timeout(SEND_TIMEOUT, transport.send(message)).await {
                Ok(Ok(_)) => info!(kind, recipient = %recipient, "email sent"),
                Ok(Err(e)) => warn!(kind, recipient = %recipient, "email send failed: {}", e),
                Err(_) => warn!(kind, recipient = %recipient, "email send timed out"),
            }
        });
    }
}
