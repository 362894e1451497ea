//! Error types for version resolution.
//!
//! Errors are categorized so the transport retry helper can tell a flaky
//! network from a channel or chart that simply does not exist.

use std::fmt;

/// Result type alias for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of resolution errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network-related errors (transient, retryable).
    Network,
    /// Channel, chart or endpoint not found.
    NotFound,
    /// Response could not be decoded.
    Format,
    /// Other/unknown errors.
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network)
    }

    /// Get a user-friendly description of this error category.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Network => "Network connectivity issue",
            Self::NotFound => "Channel or chart not found",
            Self::Format => "Invalid response format",
            Self::Other => "Unexpected error",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur while resolving versions.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request failed.
    #[error("HTTP request failed: {message}")]
    Http {
        /// Error message.
        message: String,
        /// HTTP status code if available.
        status: Option<u16>,
    },

    /// A channel endpoint answered without a redirect location.
    #[error("getting channel version URL from ({url}): no Location header")]
    MissingLocation {
        /// Channel URL that was queried.
        url: String,
    },

    /// The chart index has no entry for the chart.
    #[error("failed to find version for {chart} chart at ({url})")]
    ChartNotFound {
        /// Chart name.
        chart: String,
        /// Index URL.
        url: String,
    },

    /// Invalid response body.
    #[error("invalid response from ({url}): {message}")]
    InvalidResponse {
        /// URL that returned the body.
        url: String,
        /// Decoder message.
        message: String,
    },

    /// Server URL could not be parsed.
    #[error("invalid server URL {url}: {message}")]
    InvalidServerUrl {
        /// The offending URL.
        url: String,
        /// What is wrong with it.
        message: String,
    },

    /// The join server answered, but not with the expected ping reply.
    #[error("server url is not ready ({url}): {body}")]
    ServerNotReady {
        /// Ping URL.
        url: String,
        /// Body that came back.
        body: String,
    },

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an HTTP error.
    pub fn http(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Http {
            message: message.into(),
            status,
        }
    }

    /// Create an invalid-response error.
    pub fn invalid_response(url: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidResponse {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Get the error category for retry logic.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Http { status, .. } => match status {
                None => ErrorCategory::Network,
                Some(404) => ErrorCategory::NotFound,
                Some(code) if *code == 429 || *code >= 500 => ErrorCategory::Network,
                Some(_) => ErrorCategory::Other,
            },
            Error::MissingLocation { .. } => ErrorCategory::Format,
            Error::ChartNotFound { .. } => ErrorCategory::NotFound,
            Error::InvalidResponse { .. } => ErrorCategory::Format,
            Error::InvalidServerUrl { .. } => ErrorCategory::Other,
            Error::ServerNotReady { .. } => ErrorCategory::Other,
            Error::Other(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(code) => Self::Http {
                message: format!("HTTP {}", code),
                status: Some(code),
            },
            other => Self::Http {
                message: other.to_string(),
                status: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_retryable() {
        assert!(Error::http("connection refused", None).is_retryable());
        assert!(Error::http("HTTP 503", Some(503)).is_retryable());
        assert!(Error::http("HTTP 429", Some(429)).is_retryable());
    }

    #[test]
    fn test_not_found_is_not_retryable() {
        let err = Error::http("HTTP 404", Some(404));
        assert_eq!(err.category(), ErrorCategory::NotFound);
        assert!(!err.is_retryable());

        let err = Error::ChartNotFound {
            chart: "nodestrap-operator".to_string(),
            url: "https://example.com/index.yaml".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }

    #[test]
    fn test_format_errors() {
        let err = Error::invalid_response("https://example.com", "expected a map");
        assert_eq!(err.category(), ErrorCategory::Format);
        assert!(err.to_string().contains("expected a map"));
    }

    #[test]
    fn test_category_display() {
        assert!(format!("{}", ErrorCategory::Network).contains("Network"));
    }
}
