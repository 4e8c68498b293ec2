//! Email delivery backends

use super::templates::OutgoingEmail;
use crate::config::EmailConfig;
use crate::{Error, Result};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

/// Upper bound on one provider call
const SEND_TIMEOUT: Duration = Duration::from_secs(15);

pub trait Mailer {
    fn send(&self, email: &OutgoingEmail) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

/// Sends through the email provider's JSON API
pub struct HttpMailer {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from_address: String,
}

impl HttpMailer {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        from_address: impl Into<String>,
    ) -> Result<Self> {
        Self::with_timeout(api_url, api_key, from_address, SEND_TIMEOUT)
    }

    /// The worker sends one email at a time, so every request is bounded
    pub fn with_timeout(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        from_address: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            api_url: api_url.into(),
            api_key: api_key.into(),
            from_address: from_address.into(),
        })
    }
}

impl Mailer for HttpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&SendRequest {
                from: &self.from_address,
                to: [&email.to],
                subject: &email.subject,
                html: &email.html,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::notification(format!(
                "email provider returned HTTP {status}: {body}"
            )));
        }

        tracing::debug!("📧 Email sent to {}", email.to);
        Ok(())
    }
}

/// Logs emails instead of sending them
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        tracing::info!(
            "📭 Email delivery disabled, would send to {}: {}",
            email.to,
            email.subject
        );
        Ok(())
    }
}

/// The mailer chosen from configuration
pub enum ConfiguredMailer {
    Http(HttpMailer),
    Log(LogMailer),
}

impl ConfiguredMailer {
    pub fn from_config(config: &EmailConfig) -> Result<Self> {
        match &config.api_key {
            Some(key) => Ok(Self::Http(HttpMailer::new(
                config.api_url.clone(),
                key.clone(),
                config.from_address.clone(),
            )?)),
            None => {
                tracing::warn!("⚠️  EMAIL_API_KEY not set; notifications will only be logged");
                Ok(Self::Log(LogMailer))
            }
        }
    }
}

impl Mailer for ConfiguredMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        match self {
            Self::Http(mailer) => mailer.send(email).await,
            Self::Log(mailer) => mailer.send(email).await,
        }
    }
}
