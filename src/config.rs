//! Configuration for the practice backend
//!
//! Secrets and tunables are read from the process environment (a `.env`
//! file is honored when present). Nothing secret has a built-in default.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Payment provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// Provider API secret key (not needed for webhook handling itself)
    pub secret_key: Option<String>,

    /// Webhook signing secret. When absent, unsigned payloads are accepted.
    pub webhook_secret: Option<String>,

    /// Maximum accepted age of a signed webhook timestamp
    pub signature_tolerance_seconds: u64,
}

impl PaymentConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            secret_key: optional_var("PAYMENT_SECRET_KEY"),
            webhook_secret: optional_var("PAYMENT_WEBHOOK_SECRET"),
            signature_tolerance_seconds: parse_var("PAYMENT_SIGNATURE_TOLERANCE_SECONDS", 300)?,
        })
    }

    pub fn for_testing() -> Self {
        Self {
            secret_key: None,
            webhook_secret: Some("whsec_test_secret".to_string()),
            signature_tolerance_seconds: 300,
        }
    }
}

/// Outbound email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Email API key. When absent, emails are only logged.
    pub api_key: Option<String>,

    /// Email API endpoint
    pub api_url: String,

    /// Sender address
    pub from_address: String,

    /// Fixed support mailbox that receives admin notifications
    pub admin_address: String,

    pub notifications: NotificationConfig,
}

impl EmailConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_key: optional_var("EMAIL_API_KEY"),
            api_url: std::env::var("EMAIL_API_URL")
                .unwrap_or_else(|_| "https://api.resend.com/emails".to_string()),
            from_address: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Practice Bookings <bookings@localhost>".to_string()),
            admin_address: std::env::var("ADMIN_EMAIL")
                .unwrap_or_else(|_| "support@localhost".to_string()),
            notifications: NotificationConfig::from_env()?,
        })
    }

    pub fn for_testing() -> Self {
        Self {
            api_key: None,
            api_url: "http://127.0.0.1:9/emails".to_string(),
            from_address: "Practice Bookings <bookings@example.com>".to_string(),
            admin_address: "support@example.com".to_string(),
            notifications: NotificationConfig::for_testing(),
        }
    }
}

/// Notification outbox tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Delivery attempts before a notification is dead-lettered
    pub max_attempts: u32,

    /// Base delay for exponential retry backoff
    pub retry_base_seconds: u64,

    /// How often the worker polls for due retries
    pub poll_interval_seconds: u64,
}

impl NotificationConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            max_attempts: parse_var("NOTIFY_MAX_ATTEMPTS", 5)?,
            retry_base_seconds: parse_var("NOTIFY_RETRY_BASE_SECONDS", 30)?,
            poll_interval_seconds: parse_var("NOTIFY_POLL_INTERVAL_SECONDS", 10)?,
        })
    }

    pub fn for_testing() -> Self {
        Self {
            max_attempts: 3,
            retry_base_seconds: 1,
            poll_interval_seconds: 1,
        }
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_secs(self.retry_base_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }
}

/// Hosted database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Base URL of the hosted database REST interface
    pub url: Option<String>,

    /// Service key used for both `apikey` and bearer headers
    pub service_key: Option<String>,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        let url = optional_var("DATABASE_URL");
        let service_key = optional_var("DATABASE_SERVICE_KEY");

        if url.is_some() != service_key.is_some() {
            return Err(Error::configuration(
                "DATABASE_URL and DATABASE_SERVICE_KEY must be set together",
            ));
        }

        Ok(Self { url, service_key })
    }

    pub fn for_testing() -> Self {
        Self {
            url: None,
            service_key: None,
        }
    }

    /// Both URL and key, if the hosted database is configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.url, &self.service_key) {
            (Some(url), Some(key)) => Some((url.as_str(), key.as_str())),
            _ => None,
        }
    }
}

/// Thresholds for the request security checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Requests allowed per ip within one rate-limit window
    pub rate_limit_max_requests: u32,

    /// Rate-limit window length
    pub rate_limit_window_seconds: u64,

    /// Failed logins allowed per key before a violation is logged
    pub failed_login_limit: u32,

    /// Failed-login counting window
    pub failed_login_window_seconds: u64,

    /// Maximum length of a sanitized free-text field
    pub max_input_length: usize,

    /// How often stale rate-limit records are swept
    pub rate_limit_cleanup_interval_seconds: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            rate_limit_max_requests: 10,
            rate_limit_window_seconds: 60,
            failed_login_limit: 5,
            failed_login_window_seconds: 300,
            max_input_length: 1000,
            rate_limit_cleanup_interval_seconds: 300,
        }
    }
}

impl SecurityConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            rate_limit_max_requests: parse_var(
                "RATE_LIMIT_MAX_REQUESTS",
                defaults.rate_limit_max_requests,
            )?,
            rate_limit_window_seconds: parse_var(
                "RATE_LIMIT_WINDOW_SECONDS",
                defaults.rate_limit_window_seconds,
            )?,
            failed_login_limit: parse_var("FAILED_LOGIN_LIMIT", defaults.failed_login_limit)?,
            failed_login_window_seconds: parse_var(
                "FAILED_LOGIN_WINDOW_SECONDS",
                defaults.failed_login_window_seconds,
            )?,
            max_input_length: parse_var("MAX_INPUT_LENGTH", defaults.max_input_length)?,
            rate_limit_cleanup_interval_seconds: parse_var(
                "RATE_LIMIT_CLEANUP_INTERVAL_SECONDS",
                defaults.rate_limit_cleanup_interval_seconds,
            )?,
        })
    }

    pub fn for_testing() -> Self {
        Self {
            rate_limit_max_requests: 3,
            rate_limit_window_seconds: 1,
            failed_login_limit: 5,
            failed_login_window_seconds: 300,
            max_input_length: 200,
            rate_limit_cleanup_interval_seconds: 1,
        }
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_seconds)
    }

    pub fn failed_login_window(&self) -> Duration {
        Duration::from_secs(self.failed_login_window_seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cleanup_interval_seconds.max(1))
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub payment: PaymentConfig,
    pub email: EmailConfig,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from environment
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let server = ServerConfig {
            bind_addr: std::env::var("SERVER_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
        };

        let logging = LoggingConfig {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()),
        };

        Ok(Self {
            payment: PaymentConfig::from_env()?,
            email: EmailConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            security: SecurityConfig::from_env()?,
            server,
            logging,
        })
    }

    /// Create configuration for testing
    pub fn for_testing() -> Self {
        Self {
            payment: PaymentConfig::for_testing(),
            email: EmailConfig::for_testing(),
            database: DatabaseConfig::for_testing(),
            security: SecurityConfig::for_testing(),
            server: ServerConfig {
                bind_addr: "127.0.0.1:0".to_string(),
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

/// Read a variable, treating empty values as unset
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match optional_var(name) {
        Some(raw) => parse_value(name, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::configuration(format!("Invalid {name}: {raw}")))
}
