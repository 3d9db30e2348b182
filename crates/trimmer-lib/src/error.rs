//! Error types for the trimmer

use thiserror::Error;

/// Errors returned by the platform API client
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Errors raised while configuring or running a scan
#[derive(Debug, Error)]
pub enum TrimError {
    /// Invalid or missing settings, fatal before the scan starts
    #[error("invalid configuration: {}", .0.join("; "))]
    Configuration(Vec<String>),

    /// Incomplete inventory, fatal for the whole run
    #[error("failed to list {scope}: {source}")]
    Inventory {
        scope: String,
        #[source]
        source: PlatformError,
    },

    /// Process listing or statistics unavailable, the app is skipped
    #[error("failed to fetch {what} for {unit}: {source}")]
    Telemetry {
        what: &'static str,
        unit: String,
        #[source]
        source: PlatformError,
    },

    /// A resize or restart call failed, the scan continues
    #[error("failed to {action} {unit}: {source}")]
    Action {
        action: &'static str,
        unit: String,
        #[source]
        source: PlatformError,
    },
}

impl TrimError {
    /// Whether the run must stop
    pub fn is_fatal(&self) -> bool {
        matches!(self, TrimError::Configuration(_) | TrimError::Inventory { .. })
    }
}

pub type PlatformResult<T> = Result<T, PlatformError>;
pub type TrimResult<T> = Result<T, TrimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_lists_all_problems() {
        let err = TrimError::Configuration(vec![
            "missing envvar : CF_API_ADDR".to_string(),
            "missing envvar : CF_PASSWORD".to_string(),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("CF_API_ADDR"));
        assert!(msg.contains("CF_PASSWORD"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_recoverable_errors_are_not_fatal() {
        let err = TrimError::Action {
            action: "restart",
            unit: "acme/prod/web-1".to_string(),
            source: PlatformError::Api {
                status: 500,
                body: "boom".to_string(),
            },
        };
        assert!(!err.is_fatal());
        assert_eq!(
            err.to_string(),
            "failed to restart acme/prod/web-1: API error (500): boom"
        );
    }
}
