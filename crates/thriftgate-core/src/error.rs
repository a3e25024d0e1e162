//! Error types for Thriftgate

use thiserror::Error;

/// Result type alias using Thriftgate's Error
pub type Result<T> = std::result::Result<T, Error>;

/// One failed dispatch inside a fallback chain, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAttempt {
    /// Catalog name of the model that was tried
    pub model: String,
    /// Human-readable reason the attempt failed
    pub error: String,
}

impl FailedAttempt {
    pub fn new(model: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            error: error.into(),
        }
    }
}

/// Thriftgate error types with stable codes
#[derive(Error, Debug)]
pub enum Error {
    // Routing errors (E100-E199)
    #[error("No eligible model for task type '{0}'")]
    NoEligibleModel(String),

    // Dispatch errors (E200-E299)
    #[error("Model '{model}' timed out after {timeout_ms}ms")]
    ProviderTimeout { model: String, timeout_ms: u64 },

    #[error("Provider error for model '{model}': {message}")]
    ProviderError { model: String, message: String },

    #[error("Rate limited. Waiting {0} seconds before retry.")]
    RateLimited(u64),

    #[error("Fallback chain exhausted after {} failed attempt(s)", attempted.len())]
    ProviderUnavailable { attempted: Vec<FailedAttempt> },

    // Embedding errors (E300-E399)
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    // Persistence errors (E400-E499)
    #[error("Cache write failed: {0}")]
    CacheWriteFailure(String),

    #[error("Cost record write failed: {0}")]
    CostWriteFailure(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Network errors (E500-E599)
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoEligibleModel(_) => "E100",
            Self::ProviderTimeout { .. } => "E200",
            Self::ProviderError { .. } => "E201",
            Self::RateLimited(_) => "E202",
            Self::ProviderUnavailable { .. } => "E203",
            Self::EmbeddingUnavailable(_) => "E300",
            Self::CacheWriteFailure(_) => "E400",
            Self::CostWriteFailure(_) => "E401",
            Self::DatabaseError(_) => "E402",
            Self::NetworkError(_) => "E500",
            Self::ConfigError(_) => "E600",
        }
    }

    /// Whether the pipeline can continue past this error.
    ///
    /// Recoverable errors advance the fallback chain or degrade a cache
    /// tier. Everything else terminates the request.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ProviderTimeout { .. }
                | Self::ProviderError { .. }
                | Self::RateLimited(_)
                | Self::EmbeddingUnavailable(_)
                | Self::CacheWriteFailure(_)
                | Self::CostWriteFailure(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(Error::NoEligibleModel("reasoning".to_string()).code(), "E100");
        assert_eq!(
            Error::ProviderTimeout {
                model: "openai/gpt-4o".to_string(),
                timeout_ms: 30_000,
            }
            .code(),
            "E200"
        );
        assert_eq!(Error::RateLimited(60).code(), "E202");
        assert_eq!(
            Error::ProviderUnavailable { attempted: vec![] }.code(),
            "E203"
        );
        assert_eq!(Error::ConfigError("bad".to_string()).code(), "E600");
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::RateLimited(10).is_recoverable());
        assert!(
            Error::ProviderError {
                model: "openai/gpt-4o".to_string(),
                message: "boom".to_string(),
            }
            .is_recoverable()
        );
        assert!(Error::EmbeddingUnavailable("offline".to_string()).is_recoverable());
        assert!(!Error::NoEligibleModel("translation".to_string()).is_recoverable());
        assert!(!Error::ProviderUnavailable { attempted: vec![] }.is_recoverable());
    }

    #[test]
    fn test_provider_unavailable_message_counts_attempts() {
        let error = Error::ProviderUnavailable {
            attempted: vec![
                FailedAttempt::new("openai/gpt-4o-mini", "timed out after 30000ms"),
                FailedAttempt::new("openai/gpt-4o", "rate limited"),
            ],
        };
        assert_eq!(
            error.to_string(),
            "Fallback chain exhausted after 2 failed attempt(s)"
        );
    }
}
