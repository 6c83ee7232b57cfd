//! gridrpc Result Envelope
//!
//! Every method body, every transport exchange and every client call resolves
//! to exactly one [`RpcResult`]: a success carrying a value, or a failure
//! carrying a human-readable message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::RpcError;

/// Why a call failed.
///
/// The kind travels with the message so that clients can tell "try
/// elsewhere" apart from "this input was rejected".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// A failure the method body returned on purpose.
    #[default]
    Application,
    MethodNotFound,
    AccessDenied,
    BadArgumentShape,
    ServiceBusy,
    UnknownService,
    /// The method body failed unexpectedly (panicked or was aborted).
    Handler,
}

impl FailureKind {
    /// Availability failures are worth retrying on another endpoint.
    pub fn is_availability(&self) -> bool {
        matches!(self, FailureKind::ServiceBusy | FailureKind::UnknownService)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

/// The universal call outcome.
///
/// # Wire Format
///
/// ```text
/// {"ok": true,  "value": <any>}
/// {"ok": false, "message": "<text>", "kind": "<failure kind>"}
/// ```
///
/// A success without a value is still a success; it decodes as `null`.
///
/// # Example
///
/// ```
/// use gridrpc_common::protocol::RpcResult;
/// use serde_json::json;
///
/// let ok = RpcResult::ok(json!({"pi": 3.14159}));
/// assert!(ok.is_ok());
///
/// let failed = RpcResult::error("Division by zero");
/// assert_eq!(failed.message(), Some("Division by zero"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "ResultEnvelope", try_from = "ResultEnvelope")]
pub enum RpcResult {
    Ok(Value),
    Err(Failure),
}

impl RpcResult {
    pub fn ok(value: impl Into<Value>) -> Self {
        RpcResult::Ok(value.into())
    }

    /// A success with no value.
    pub fn ok_empty() -> Self {
        RpcResult::Ok(Value::Null)
    }

    /// An application-level failure.
    pub fn error(message: impl Into<String>) -> Self {
        Self::failure(FailureKind::Application, message)
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        RpcResult::Err(Failure {
            kind,
            message: message.into(),
        })
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, RpcResult::Ok(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            RpcResult::Ok(value) => Some(value),
            RpcResult::Err(_) => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            RpcResult::Ok(_) => None,
            RpcResult::Err(failure) => Some(&failure.message),
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            RpcResult::Ok(_) => None,
            RpcResult::Err(failure) => Some(failure.kind),
        }
    }

    /// Converts into a plain `Result`, turning any failure into
    /// [`RpcError::Remote`].
    pub fn into_value(self) -> Result<Value, RpcError> {
        match self {
            RpcResult::Ok(value) => Ok(value),
            RpcResult::Err(failure) => Err(RpcError::Remote(failure.message)),
        }
    }
}

impl From<Result<Value, String>> for RpcResult {
    fn from(result: Result<Value, String>) -> Self {
        match result {
            Ok(value) => RpcResult::Ok(value),
            Err(message) => RpcResult::error(message),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ResultEnvelope {
    ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<FailureKind>,
}

impl From<RpcResult> for ResultEnvelope {
    fn from(result: RpcResult) -> Self {
        match result {
            RpcResult::Ok(value) => ResultEnvelope {
                ok: true,
                value: Some(value),
                message: None,
                kind: None,
            },
            RpcResult::Err(failure) => ResultEnvelope {
                ok: false,
                value: None,
                message: Some(failure.message),
                kind: Some(failure.kind),
            },
        }
    }
}

impl TryFrom<ResultEnvelope> for RpcResult {
    type Error = String;

    fn try_from(envelope: ResultEnvelope) -> Result<Self, Self::Error> {
        if envelope.ok {
            if envelope.message.is_some() {
                return Err("successful result must not carry a message".to_string());
            }
            return Ok(RpcResult::Ok(envelope.value.unwrap_or(Value::Null)));
        }
        let message = envelope
            .message
            .ok_or_else(|| "failed result is missing its message".to_string())?;
        Ok(RpcResult::Err(Failure {
            kind: envelope.kind.unwrap_or_default(),
            message,
        }))
    }
}
