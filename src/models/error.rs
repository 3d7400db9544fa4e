//! Error types for bedeval.
//!
//! Taxonomy:
//! - Configuration: caller bugs (unknown model, bad config). Never retried.
//! - Infrastructure: throttling, transient call faults, exhausted budgets.
//! - Invariant: internal bugs (lost slots, panicked tasks).

use std::fmt;
use thiserror::Error;

/// Top-level error type for bedeval.
#[derive(Debug, Error)]
pub enum EvalError {
    // ═══════════════════════════════════════════════════════════════════
    // CONFIGURATION: caller bug, fatal to the calling context
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Invalid model name: '{0}' is not in the model registry")]
    InvalidModel(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ═══════════════════════════════════════════════════════════════════
    // INFRASTRUCTURE: remote endpoint or local I/O failed
    // ═══════════════════════════════════════════════════════════════════
    #[error("All {regions} region(s) throttled for model '{model}'")]
    AllRegionsThrottled { model: String, regions: usize },

    #[error("Call to region {region} failed: {source}")]
    Call {
        region: String,
        #[source]
        source: CallError,
    },

    #[error("Item retry budget exhausted after {attempts} attempt(s): {last_error}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last_error: Box<EvalError>,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // INVARIANT: should not happen
    // ═══════════════════════════════════════════════════════════════════
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Worker task failed: {0}")]
    TaskFailed(String),
}

impl EvalError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Configuration errors abort the batch and are never retried anywhere.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Config(_) | Self::InvalidModel(_))
    }

    /// Check if the per-item wrapper may retry this error.
    pub fn is_retryable(&self) -> bool {
        !self.is_configuration()
    }

    /// Classification of the underlying call failure, if any.
    pub fn call_kind(&self) -> Option<CallErrorKind> {
        match self {
            Self::Call { source, .. } => Some(source.kind),
            Self::AllRegionsThrottled { .. } => Some(CallErrorKind::Throttled),
            Self::RetryExhausted { last_error, .. } => last_error.call_kind(),
            _ => None,
        }
    }
}

/// Category of a failed remote call, as reported by the transport.
///
/// The router branches on this value only, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallErrorKind {
    /// Rate limit or quota rejection. Router fails over to the next region.
    Throttled,
    /// Network fault, timeout, 5xx.
    Transient,
    /// Request rejected for a reason retrying will not fix (4xx).
    Fatal,
    /// The endpoint answered but the body could not be decoded.
    MalformedResponse,
}

impl fmt::Display for CallErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Throttled => "throttled",
            Self::Transient => "transient",
            Self::Fatal => "fatal",
            Self::MalformedResponse => "malformed-response",
        };
        f.write_str(s)
    }
}

/// Classified failure returned by a [`Transport`](crate::client::Transport).
#[derive(Debug, Clone, Error)]
#[error("{kind} error{}: {message}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
pub struct CallError {
    pub kind: CallErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl CallError {
    pub fn new(kind: CallErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(CallErrorKind::Throttled, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(CallErrorKind::Transient, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(CallErrorKind::Fatal, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(CallErrorKind::MalformedResponse, message)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_throttled(&self) -> bool {
        self.kind == CallErrorKind::Throttled
    }
}

/// Result type alias for bedeval.
pub type Result<T> = std::result::Result<T, EvalError>;
