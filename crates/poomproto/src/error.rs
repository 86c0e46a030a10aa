//! Typed tool errors and the uniform response envelope.
//!
//! Every failure path in the gateway ends in a [`ToolError`]. The envelope is
//! what crosses the tool boundary: either `{"ok": true, "result": ...}` or
//! `{"ok": false, "error": {code, message, retryable}}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known error codes. Backend-declared codes pass through verbatim and
/// need not appear here.
pub mod codes {
    /// Transport failure, timeout, or 5xx-class upstream response.
    pub const UPSTREAM_TIMEOUT: &str = "UPSTREAM_TIMEOUT";
    /// 404 from upstream, or no runs available to open.
    pub const RUN_NOT_FOUND: &str = "RUN_NOT_FOUND";
    /// Run exists but its manifest has no playable media or bad chapter ranges.
    pub const MANIFEST_INVALID: &str = "MANIFEST_INVALID";
    /// 2xx upstream body is missing fields the operation requires.
    pub const UPSTREAM_FORMAT: &str = "UPSTREAM_FORMAT";
    /// Tool input failed shape validation.
    pub const INVALID_ARGUMENT: &str = "INVALID_ARGUMENT";
    /// No tool with the requested name.
    pub const UNKNOWN_TOOL: &str = "UNKNOWN_TOOL";
    /// Gateway-internal failure (task panic, serialization).
    pub const INTERNAL: &str = "INTERNAL";
}

/// The single error shape produced at every failure site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ToolError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub retryable: bool,
}

impl ToolError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable,
        }
    }

    /// Transport-level failure or 5xx-class status. Retryable unless the
    /// caller knows better (4xx statuses map here as non-retryable).
    pub fn upstream_timeout(message: impl Into<String>, retryable: bool) -> Self {
        Self::new(codes::UPSTREAM_TIMEOUT, message, retryable)
    }

    pub fn run_not_found(message: impl Into<String>) -> Self {
        Self::new(codes::RUN_NOT_FOUND, message, false)
    }

    pub fn manifest_invalid(message: impl Into<String>) -> Self {
        Self::new(codes::MANIFEST_INVALID, message, false)
    }

    pub fn upstream_format(message: impl Into<String>) -> Self {
        Self::new(codes::UPSTREAM_FORMAT, message, false)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_ARGUMENT, message, false)
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::new(codes::UNKNOWN_TOOL, format!("No such tool: {}", name), false)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL, message, true)
    }

    /// Check the error code.
    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(e: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {}", e))
    }
}

/// Uniform response envelope returned by every tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEnvelope {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

impl ToolEnvelope {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: ToolError) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error),
        }
    }

    /// Wrap a typed operation result. A result that fails to serialize
    /// becomes an `INTERNAL` error rather than a panic.
    pub fn from_result<T: Serialize>(result: Result<T, ToolError>) -> Self {
        match result.and_then(|value| serde_json::to_value(value).map_err(ToolError::from)) {
            Ok(value) => Self::success(value),
            Err(err) => Self::failure(err),
        }
    }

    /// Unwrap back into a result on the consumer side.
    pub fn into_result(self) -> Result<Value, ToolError> {
        match (self.ok, self.result, self.error) {
            (true, Some(value), _) => Ok(value),
            (true, None, _) => Ok(Value::Null),
            (false, _, Some(err)) => Err(err),
            (false, _, None) => Err(ToolError::internal("error envelope without error detail")),
        }
    }

    /// Convert to JSON for the transport edge.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({
                "ok": false,
                "error": {
                    "code": codes::INTERNAL,
                    "message": e.to_string(),
                    "retryable": false,
                }
            })
        })
    }
}
