//! Error types for GraphQL API operations.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::http::{HttpHeaders, header_get};
use crate::retry::{ClassifyFailure, Failure, RetryError};

/// Prefix the API uses for rate-limit messages in the GraphQL `errors` array.
pub const RATE_LIMIT_MESSAGE_PREFIX: &str = "Client error: Too many requests";

/// Header carrying the time the rate-limit window resets.
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

/// Errors that can occur on a single GraphQL exchange.
#[derive(Debug, Error)]
pub enum GraphQLError {
    /// Connection-level failure (DNS, reset, timeout, ...).
    #[error("Network error: {message}")]
    Network { message: String },

    /// Non-2xx status.
    #[error("API error ({status}): {message}")]
    Status { status: u16, message: String },

    /// The server asked us to slow down.
    #[error("{message}")]
    RateLimited {
        reset_at: Option<DateTime<Utc>>,
        message: String,
    },

    /// 2xx response whose `errors` array is non-empty.
    #[error("{message}")]
    Response { message: String },

    /// Response body could not be decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Response decoded but the expected member is absent.
    #[error("Response missing field \"{field}\"")]
    MissingData { field: String },

    /// Invalid client configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl GraphQLError {
    /// Check if this error is a rate limit error.
    #[inline]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

impl ClassifyFailure for GraphQLError {
    fn failure(&self) -> Failure {
        match self {
            Self::RateLimited { reset_at, .. } => Failure::RateLimited {
                reset_at: *reset_at,
            },
            Self::Status {
                status: 401 | 403, ..
            } => Failure::Fatal,
            Self::Json(_) | Self::MissingData { .. } | Self::Config(_) => Failure::Fatal,
            Self::Network { .. } | Self::Status { .. } | Self::Response { .. } => {
                Failure::Transient
            }
        }
    }
}

/// Terminal error of a retried GraphQL request.
pub type RequestError = RetryError<GraphQLError>;

/// Check whether a GraphQL error message signals rate limiting.
#[must_use]
pub fn is_rate_limit_message(message: &str) -> bool {
    message.starts_with(RATE_LIMIT_MESSAGE_PREFIX) || message.starts_with("Too many requests")
}

/// Parse the rate-limit reset time from response headers.
///
/// Accepts an RFC 3339 / RFC 2822 date or integer Unix epoch seconds.
#[must_use]
pub fn parse_rate_limit_reset(headers: &HttpHeaders) -> Option<DateTime<Utc>> {
    let raw = header_get(headers, RATE_LIMIT_RESET_HEADER)?.trim();
    if let Ok(epoch) = raw.parse::<i64>() {
        return DateTime::from_timestamp(epoch, 0);
    }
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(value: &str) -> HttpHeaders {
        vec![("X-RateLimit-Reset".to_string(), value.to_string())]
    }

    #[test]
    fn parses_rfc3339_reset() {
        let reset = parse_rate_limit_reset(&headers("2026-01-02T03:04:05.250Z"))
            .expect("should parse");
        assert_eq!(reset.timestamp_millis() % 1000, 250);
    }

    #[test]
    fn parses_epoch_seconds_reset() {
        let reset = parse_rate_limit_reset(&headers("1700000000")).expect("should parse");
        assert_eq!(reset.timestamp(), 1_700_000_000);
    }

    #[test]
    fn parses_rfc2822_reset() {
        assert!(parse_rate_limit_reset(&headers("Tue, 1 Jul 2003 10:52:37 +0200")).is_some());
    }

    #[test]
    fn garbage_or_missing_reset_is_none() {
        assert_eq!(parse_rate_limit_reset(&headers("soon")), None);
        assert_eq!(parse_rate_limit_reset(&Vec::new()), None);
    }

    #[test]
    fn rate_limit_message_detection() {
        assert!(is_rate_limit_message(
            "Client error: Too many requests, slow down"
        ));
        assert!(is_rate_limit_message("Too many requests"));
        assert!(!is_rate_limit_message("Validation failed: Too many requests"));
    }

    #[test]
    fn classification() {
        let auth = GraphQLError::Status {
            status: 401,
            message: "nope".into(),
        };
        assert_eq!(auth.failure(), Failure::Fatal);

        let server = GraphQLError::Status {
            status: 502,
            message: "bad gateway".into(),
        };
        assert_eq!(server.failure(), Failure::Transient);

        let missing = GraphQLError::MissingData {
            field: "dataSilos".into(),
        };
        assert_eq!(missing.failure(), Failure::Fatal);

        let limited = GraphQLError::RateLimited {
            reset_at: None,
            message: RATE_LIMIT_MESSAGE_PREFIX.into(),
        };
        assert!(limited.is_rate_limited());
        assert_eq!(limited.failure(), Failure::RateLimited { reset_at: None });
    }
}
