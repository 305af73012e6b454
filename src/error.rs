//! Error taxonomy shared by the API clients and the rotation engine.
//!
//! Secrets never appear in error messages. Response bodies are truncated
//! before they are attached to an error.

use std::time::Duration;

/// Maximum number of response-body characters kept in an error message.
const MAX_BODY_CHARS: usize = 200;

/// Errors raised while talking to the identity provider or the secret store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RotationError {
    /// Transport failure, 5xx or 429. Retried at the client-call level.
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Server-provided `Retry-After` hint, if any.
        retry_after: Option<Duration>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Password field missing on item {0}")]
    FieldMissing(String),

    #[error("Secret store did not converge after {attempts} polls")]
    ConvergenceTimeout { attempts: u32 },

    /// Non-auth 4xx: the request or the configuration is wrong.
    #[error("Request rejected ({status}): {body}")]
    Client { status: u16, body: String },

    /// 401/403. Every later call would fail the same way.
    #[error("Authentication rejected by {service} ({status})")]
    Auth { service: &'static str, status: u16 },

    #[error("Unexpected response from {service}: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },

    #[error("{count} items share the title '{title}'")]
    AmbiguousRecord { title: String, count: usize },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl RotationError {
    /// Build an error from a non-2xx HTTP status and its response body.
    pub fn from_status(service: &'static str, status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => RotationError::Auth { service, status },
            404 => RotationError::NotFound(format!("{service} returned 404")),
            429 | 500..=599 => RotationError::Network {
                message: format!("{service} returned {status}: {}", truncate_body(body)),
                retry_after,
            },
            _ => RotationError::Client {
                status,
                body: truncate_body(body),
            },
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        RotationError::Network {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Whether the failed call may be retried with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, RotationError::Network { .. })
    }

    /// Whether the error poisons the whole run rather than one identity.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, RotationError::Auth { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RotationError::Network { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RotationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return RotationError::Decode {
                service: "http",
                message: err.to_string(),
            };
        }
        if err.is_builder() {
            return RotationError::Config(err.to_string());
        }
        RotationError::network(err.to_string())
    }
}

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_BODY_CHARS {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(MAX_BODY_CHARS).collect();
    out.push('…');
    out
}

pub type Result<T, E = RotationError> = std::result::Result<T, E>;
