//! Outbound notifications
//!
//! The reset broker hands composed messages to a [`Notifier`]; the
//! production implementation delivers them over SMTP.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use crate::models::User;

/// Delivers a composed message to a user.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user: &User, subject: &str, body: &str) -> Result<()>;
}

/// SMTP configuration
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

impl SmtpConfig {
    /// Create a new SmtpConfig from environment variables
    ///
    /// # Environment Variables
    /// - `SMTP_HOST`: relay hostname
    /// - `SMTP_PORT`: relay port (default: 587)
    /// - `SMTP_USERNAME` / `SMTP_PASSWORD`: credentials, empty to skip AUTH
    /// - `SMTP_FROM`: sender address
    pub fn from_env() -> Result<Self> {
        let host =
            std::env::var("SMTP_HOST").context("SMTP_HOST environment variable not set")?;

        let port = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("SMTP_USERNAME").unwrap_or_default();
        let password = std::env::var("SMTP_PASSWORD").unwrap_or_default();

        let from =
            std::env::var("SMTP_FROM").context("SMTP_FROM environment variable not set")?;

        Ok(Self {
            host,
            port,
            username,
            password,
            from,
        })
    }
}

/// SMTP-backed notifier
pub struct SmtpNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .context("invalid SMTP host")?
            .port(config.port);

        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        let from = config
            .from
            .parse::<Mailbox>()
            .context("invalid SMTP_FROM address")?;

        Ok(Self {
            mailer: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, user: &User, subject: &str, body: &str) -> Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(user
                .email
                .parse::<Mailbox>()
                .context("invalid recipient address")?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .context("failed to build message")?;

        self.mailer
            .send(message)
            .await
            .context("smtp delivery failed")?;

        info!(to = %user.email, "notification delivered");
        Ok(())
    }
}
