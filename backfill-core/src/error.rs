use thiserror::Error;

/// Unified error type for the backfill workspace.
///
/// Covers configuration validation, provider-tagged fetch failures,
/// data-shape issues, persistence failures, rate-limit budget exhaustion,
/// and fatal pipeline errors.
#[derive(Debug, Error)]
pub enum BackfillError {
    /// Invalid configuration or argument, detected before any I/O.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A data source call failed; tagged with the provider name.
    #[error("{provider} failed: {msg}")]
    Source {
        /// Name of the data source that failed.
        provider: String,
        /// Human-readable failure message.
        msg: String,
    },

    /// Issues with returned or expected data (bad timestamps, empty columns, etc.).
    #[error("data issue: {0}")]
    Data(String),

    /// Writing a series or a report artifact failed.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// The shared rate-limit budget is exhausted.
    #[error("rate limited: retry in {retry_in_ms}ms")]
    RateLimited {
        /// Time until the current accounting window resets.
        retry_in_ms: u64,
    },

    /// Fatal orchestration error caught at the pipeline top level.
    #[error("pipeline error: {0}")]
    Pipeline(String),
}

impl BackfillError {
    /// Helper: build a `Config` error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Helper: build a `Source` error with the provider name and message.
    pub fn source(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Source {
            provider: provider.into(),
            msg: msg.into(),
        }
    }

    /// Helper: build a `Data` error.
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    /// True if the error is worth retrying (transient source or rate-limit failures).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Source { .. } | Self::RateLimited { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_errors_carry_the_provider_tag() {
        let e = BackfillError::source("yahoo", "timed out");
        assert_eq!(e.to_string(), "yahoo failed: timed out");
        assert!(e.is_transient());
    }

    #[test]
    fn config_errors_are_not_transient() {
        assert!(!BackfillError::config("max_workers must be > 0").is_transient());
        assert!(
            BackfillError::RateLimited { retry_in_ms: 250 }.is_transient()
        );
    }
}
