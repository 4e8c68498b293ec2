//! Practice Backend Security and Payments
//!
//! Request-side security heuristics (sanitization, threat scoring, rate
//! limiting, CSRF tokens) and the payment webhook that confirms paid
//! appointments and queues their confirmation emails.

pub mod config;
pub mod errors;
pub mod notifications;
pub mod security;
pub mod server;
pub mod store;
pub mod types;
pub mod webhook;

// Re-export commonly used types
pub use errors::{Error, Result};

use config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging for one-shot commands: warnings and up on stderr,
/// leaving stdout to the command's own output
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "consult=warn".into()),
        )
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| Error::configuration(format!("logging already initialized: {e}")))?;

    tracing::debug!("🩺 Practice backend v{} initialized", VERSION);
    Ok(())
}

/// Initialize logging from configuration. `RUST_LOG` still wins when set.
pub fn init_with_config(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("consult={}", config.level)))
        .map_err(|e| Error::configuration(format!("invalid LOG_LEVEL: {e}")))?;

    let installed = match config.format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init(),
        "pretty" => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(filter)
            .try_init(),
        other => {
            return Err(Error::configuration(format!(
                "unknown LOG_FORMAT '{other}', expected json or pretty"
            )));
        }
    };
    installed.map_err(|e| Error::configuration(format!("logging already initialized: {e}")))?;

    tracing::info!("🩺 Practice backend v{} initialized", VERSION);
    Ok(())
}
