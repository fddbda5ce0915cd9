//! Error taxonomy for delegation.
//!
//! Every variant is caught at the dispatch boundary and turned into a failed
//! [`DelegationOutcome`](crate::a2a::dispatch::DelegationOutcome); nothing
//! here is meant to reach an end user verbatim except through
//! [`DelegationError::user_message`].

use std::time::Duration;
use thiserror::Error;

/// Coarse classification used for logging and outcome metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Resolution,
    Transport,
    Protocol,
    Authorization,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Resolution => "resolution",
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Authorization => "authorization",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum DelegationError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to resolve agent card from {url}: {reason}")]
    Resolution { url: String, reason: String },

    #[error("transport error: {message}")]
    Transport { message: String, retryable: bool },

    #[error("delegation timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("remote agent returned JSON-RPC error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error("remote agent rejected credentials (HTTP {status})")]
    Authorization { status: u16 },
}

impl DelegationError {
    pub fn transport(err: reqwest::Error) -> Self {
        // Connection-level failures and server-side 5xx are worth another try.
        let retryable = err.is_connect()
            || err.is_timeout()
            || err.is_request()
            || err.status().is_some_and(|s| s.is_server_error());
        DelegationError::Transport {
            message: err.to_string(),
            retryable,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DelegationError::Configuration(_) => ErrorKind::Configuration,
            DelegationError::Resolution { .. } => ErrorKind::Resolution,
            DelegationError::Transport { .. } | DelegationError::Timeout(_) => ErrorKind::Transport,
            DelegationError::Protocol(_) | DelegationError::Remote { .. } => ErrorKind::Protocol,
            DelegationError::Authorization { .. } => ErrorKind::Authorization,
        }
    }

    /// Whether a retry policy may try the send again.
    pub fn is_transient(&self) -> bool {
        matches!(self, DelegationError::Transport { retryable: true, .. })
    }

    /// Natural-language text for the end user. No codes, no stack traces.
    pub fn user_message(&self, target: &str) -> String {
        match self {
            DelegationError::Configuration(_) => format!(
                "I can't reach the {} agent because its address is not configured.",
                target
            ),
            DelegationError::Resolution { .. } => format!(
                "I couldn't find out what the {} agent can do, so I didn't send it the task.",
                target
            ),
            DelegationError::Transport { .. } => format!(
                "I couldn't get through to the {} agent. Please try again shortly.",
                target
            ),
            DelegationError::Timeout(limit) => format!(
                "The {} agent didn't answer within {}.",
                target,
                human_duration(*limit)
            ),
            DelegationError::Protocol(_) => format!(
                "The {} agent sent back a reply I couldn't understand.",
                target
            ),
            DelegationError::Remote { message, .. } => {
                format!("The {} agent reported a problem: {}", target, message)
            }
            DelegationError::Authorization { .. } => format!(
                "The {} agent refused my credentials, so the task was not run.",
                target
            ),
        }
    }
}

/// Whole seconds, or milliseconds below one second.
fn human_duration(limit: Duration) -> String {
    match limit.as_secs() {
        0 => format!("{} ms", limit.as_millis()),
        1 => "1 second".to_string(),
        secs => format!("{} seconds", secs),
    }
}

/// Failure inside a provider skill.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SkillError {
    #[error("no expression found in input")]
    EmptyInput,

    #[error("could not parse expression: {0}")]
    Parse(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("result is not a finite number")]
    NonFinite,
}
