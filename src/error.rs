//! Unified error types for the bridge.
//!
//! Each component boundary returns its own error enum so callers can tell a
//! busy gate from a slow controller thread without matching on strings.

use std::time::Duration;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ToolError
// ---------------------------------------------------------------------------

/// Errors reported by a tool body. They become `ToolResult`s with an error
/// status, never protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    /// The caller supplied arguments the tool couldn't parse.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    /// The tool ran but encountered a failure.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors when loading or parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// DispatchError
// ---------------------------------------------------------------------------

/// Failures of the controller-thread dispatch mechanism itself.
///
/// Errors produced by the dispatched closure are part of its return value and
/// never appear here.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The controller thread did not finish the work item in time. The item
    /// stays queued and will still run; its result is discarded.
    #[error("controller thread did not complete work within {0:?}")]
    Timeout(Duration),
    /// The dispatched closure panicked on the controller thread.
    #[error("dispatched work panicked: {0}")]
    Panicked(String),
    /// The work item was dropped without running (controller torn down).
    #[error("controller dropped the work item before completing it")]
    Disconnected,
}

// ---------------------------------------------------------------------------
// GateBusy / InvokeError
// ---------------------------------------------------------------------------

/// The execution gate could not be acquired within the wait budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("execution gate busy after waiting {waited:?}")]
pub struct GateBusy {
    pub waited: Duration,
}

/// Outcomes of a tool invocation that are not a tool-level result.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// Another tool call holds the gate; retry with backoff.
    #[error("server busy: another tool call is still running ({0})")]
    Busy(GateBusy),
    /// The tool started but did not finish within the processing timeout.
    #[error("tool execution timed out after {0:?}")]
    Timeout(Duration),
    /// Dispatch infrastructure failure (panic, torn-down controller).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<GateBusy> for InvokeError {
    fn from(e: GateBusy) -> Self {
        Self::Busy(e)
    }
}

impl From<DispatchError> for InvokeError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Timeout(after) => Self::Timeout(after),
            other => Self::Internal(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// AccumulateError
// ---------------------------------------------------------------------------

/// Errors when merging a streamed delta into the accumulated message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccumulateError {
    #[error("cannot merge {delta} into {existing} at `{key}`")]
    TypeMismatch {
        key: String,
        existing: &'static str,
        delta: &'static str,
    },
    #[error("list entry under `{key}` has no integer `index`")]
    MissingIndex { key: String },
}

// ---------------------------------------------------------------------------
// ApiError
// ---------------------------------------------------------------------------

/// Errors from the model HTTP layer.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network / reqwest-level error.
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    /// Non-2xx status from the API.
    #[error("status {code}: {body}")]
    Status {
        code: u16,
        body: String,
        retry_after_secs: Option<u64>,
    },
    /// Provider returned a payload the stream parser could not understand.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    pub fn status(code: u16, body: impl Into<String>, retry_after_secs: Option<u64>) -> Self {
        Self::Status {
            code,
            body: body.into(),
            retry_after_secs,
        }
    }

    /// HTTP status code when this error came from a non-2xx response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Status {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Terminal failures of one conversation turn.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("api: {0}")]
    Api(#[from] ApiError),
    #[error("stream merge: {0}")]
    Accumulate(#[from] AccumulateError),
    /// The model repeated the same fragment past the configured limit.
    #[error("model repeated the fragment {fragment:?} {count} times in a row")]
    RepetitionLoop { fragment: String, count: usize },
    /// The tool round-trip loop exceeded the configured cap.
    #[error("max conversation rounds reached ({0})")]
    MaxRoundsReached(usize),
}
