//! Error types for longform.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LongformError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Transform service errors
    #[error("Rate limited by transform service (model {model_id})")]
    RateLimited { model_id: String },

    #[error("Invalid credential: {message}")]
    InvalidCredential { message: String },

    #[error("Transform service internal error: {message}")]
    ServiceInternal { message: String },

    #[error("Transform service returned an empty response")]
    EmptyResponse,

    #[error("Invocation timed out after {seconds}s")]
    InvokeTimeout { seconds: u64 },

    // Response decoding errors
    #[error("Malformed response at byte {offset}: {message}")]
    Decode {
        message: String,
        offset: usize,
        snippet: String,
    },

    #[error("Response did not match the expected shape: {message}")]
    SchemaMismatch { message: String },

    // Audio collaborator errors
    #[error("Audio encoding failed for window [{start}, {end}]: {message}")]
    AudioEncode {
        start: f64,
        end: f64,
        message: String,
    },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl LongformError {
    /// True when the error is a rate-limit signal.
    ///
    /// Rate limits are never retried locally; they propagate to the scheduler
    /// or batch loop, which applies its cooldown policy.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// True when the error stops a unit immediately with no retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidCredential { .. })
    }

    /// True when the invocation engine may retry the call with backoff.
    ///
    /// Covers malformed output, service-internal failures, empty responses
    /// and timeouts. Rate limits and credential failures are excluded.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ServiceInternal { .. }
                | Self::EmptyResponse
                | Self::InvokeTimeout { .. }
                | Self::Decode { .. }
                | Self::SchemaMismatch { .. }
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, LongformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_display_names_model() {
        let error = LongformError::RateLimited {
            model_id: "transform-large".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Rate limited by transform service (model transform-large)"
        );
        assert!(error.is_rate_limit());
        assert!(!error.is_retryable());
        assert!(!error.is_fatal());
    }

    #[test]
    fn invalid_credential_is_fatal_only() {
        let error = LongformError::InvalidCredential {
            message: "key rejected".to_string(),
        };
        assert!(error.is_fatal());
        assert!(!error.is_retryable());
        assert!(!error.is_rate_limit());
    }

    #[test]
    fn timeout_and_decode_are_retryable() {
        let timeout = LongformError::InvokeTimeout { seconds: 300 };
        let decode = LongformError::Decode {
            message: "expected value".to_string(),
            offset: 12,
            snippet: "…".to_string(),
        };
        assert!(timeout.is_retryable());
        assert!(decode.is_retryable());
    }

    #[test]
    fn decode_display_carries_offset() {
        let error = LongformError::Decode {
            message: "trailing characters".to_string(),
            offset: 42,
            snippet: "xyz".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Malformed response at byte 42: trailing characters"
        );
    }

    #[test]
    fn from_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: LongformError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: LongformError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<LongformError>();
        assert_sync::<LongformError>();
    }
}
