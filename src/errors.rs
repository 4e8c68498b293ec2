//! Error handling for the practice backend

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Missing or invalid webhook signature
    #[error("Signature verification failed: {message}")]
    Signature { message: String },

    /// Validation errors
    #[error("Validation failed: {field}")]
    Validation { field: String },

    /// Persistence errors from the hosted database
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Email rendering or delivery errors
    #[error("Notification error: {message}")]
    Notification { message: String },

    /// Missing or malformed configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Outbound HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Create a new signature error
    pub fn signature(message: impl Into<String>) -> Self {
        Self::Signature {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
        }
    }

    /// Create a new storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a new notification error
    pub fn notification(message: impl Into<String>) -> Self {
        Self::Notification {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the caller sent something we refuse to process (as opposed to
    /// a failure on our side)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Signature { .. } | Self::Validation { .. } | Self::Serialization(_)
        )
    }
}

/// Convenience macro for storage errors with formatted messages
#[macro_export]
macro_rules! storage_error {
    ($msg:expr) => {
        $crate::Error::storage($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::storage(format!($fmt, $($arg)*))
    };
}
