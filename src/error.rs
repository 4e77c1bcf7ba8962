//! Error types for rpcmux.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::{RequestId, SessionId};

/// Main error type for all engine operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// The outbound write primitive failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Message addressed to a session that is not open.
    #[error("Session not open: {0}")]
    SessionNotOpen(SessionId),

    /// A response operation was used after the request left the table.
    #[error("Request {id} is no longer active ({op})")]
    RequestInactive { id: RequestId, op: String },

    /// The client engine was destroyed.
    #[error("Client destroyed")]
    Destroyed,

    /// A handler reported a failure.
    #[error("Handler error: {0}")]
    Handler(String),

    /// The access-control gate itself failed.
    #[error("Access control error: {0}")]
    Gate(String),

    /// The remote side answered with an `err` response.
    #[error("Remote error: {0}")]
    Remote(serde_json::Value),

    /// A request was dropped before a terminal reply arrived.
    #[error("Request canceled")]
    Canceled,

    /// A call was parsed outside a tokio runtime.
    #[error("No tokio runtime to run the handler on")]
    NoRuntime,

    /// Flow-control window stayed full for too long.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

impl RpcError {
    /// Build a handler failure from any displayable message.
    pub fn handler(msg: impl fmt::Display) -> Self {
        Self::Handler(msg.to_string())
    }

    /// Build a transport failure from any displayable message.
    pub fn transport(msg: impl fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Numeric codes carried inside engine-generated `err` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    MethodNotFound = 300,
    AccessControlFailed = 301,
    PermissionDenied = 302,
    HandlerFailed = 578,
}

impl ErrorCode {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(value: u16) -> Option<Self> {
        match value {
            300 => Some(Self::MethodNotFound),
            301 => Some(Self::AccessControlFailed),
            302 => Some(Self::PermissionDenied),
            578 => Some(Self::HandlerFailed),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MethodNotFound => write!(f, "no method found"),
            Self::AccessControlFailed => write!(f, "access control error"),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::HandlerFailed => write!(f, "rpc failed during execution"),
        }
    }
}

/// Payload of an `err` response: `{ code, msg }`.
///
/// Engine-generated errors always carry a code. Synthetic client-side
/// terminations carry only a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    pub msg: String,
}

impl ErrorPayload {
    pub fn new(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self {
            code: Some(code.code()),
            msg: msg.into(),
        }
    }

    pub fn method_not_found(op: &str) -> Self {
        Self::new(ErrorCode::MethodNotFound, format!("No method found: {op}"))
    }

    pub fn access_control_failed(op: &str) -> Self {
        Self::new(
            ErrorCode::AccessControlFailed,
            format!("Access control error: {op}"),
        )
    }

    pub fn permission_denied(op: &str) -> Self {
        Self::new(ErrorCode::PermissionDenied, format!("Permission denied: {op}"))
    }

    pub fn handler_failed(op: &str) -> Self {
        Self::new(
            ErrorCode::HandlerFailed,
            format!("rpc failed during execution of {op}"),
        )
    }

    /// Error delivered to pending client requests when the connection drops.
    pub fn terminated() -> Self {
        Self {
            code: None,
            msg: "request terminated by remote host".to_string(),
        }
    }

    /// The known error code, if any.
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.code.and_then(ErrorCode::from_code)
    }

    pub fn to_value(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        if let Some(code) = self.code {
            map.insert("code".to_string(), code.into());
        }
        map.insert("msg".to_string(), self.msg.clone().into());
        serde_json::Value::Object(map)
    }

    /// Parse an `err` data value, if it has the `{ code?, msg }` shape.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}
