//! Message records exchanged between client and server.
//!
//! Messages are structured records whose populated field names act as the
//! discriminator:
//!
//! ```text
//! client -> server                 server -> client
//! { op, args?, id?, stream? }      { ack, data }   terminal
//! { push, data }                   { err, data }   terminal
//! { sig, data }                    { sig, data }   non-terminal
//! { end }                          { fin }         terminal
//! ```
//!
//! Both enums are `#[serde(untagged)]` so any self-describing codec
//! (JSON, MessagePack with named fields) produces exactly these records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request identifier, unique per session while live.
pub type RequestId = u64;

/// Server-assigned session identifier.
pub type SessionId = u64;

fn is_false(v: &bool) -> bool {
    !*v
}

/// Message sent by a client to a server session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestMessage {
    /// Client wants request `end` terminated.
    End { end: RequestId },
    /// Raw streaming data addressed to a live request.
    Push {
        push: RequestId,
        #[serde(default)]
        data: Value,
    },
    /// Mid-stream signal addressed to a live request.
    Sig {
        sig: RequestId,
        #[serde(default)]
        data: Value,
    },
    /// Invoke an operation. Without `id` this is fire-and-forget.
    Call {
        op: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<RequestId>,
        #[serde(default, skip_serializing_if = "is_false")]
        stream: bool,
    },
}

impl RequestMessage {
    /// Build a call message.
    pub fn call(op: impl Into<String>, args: Vec<Value>, id: Option<RequestId>) -> Self {
        Self::Call {
            op: op.into(),
            args,
            id,
            stream: false,
        }
    }

    /// Build a call message that opens a streaming request.
    pub fn stream_call(op: impl Into<String>, args: Vec<Value>, id: RequestId) -> Self {
        Self::Call {
            op: op.into(),
            args,
            id: Some(id),
            stream: true,
        }
    }

    /// The request id this message creates or addresses.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::End { end } => Some(*end),
            Self::Push { push, .. } => Some(*push),
            Self::Sig { sig, .. } => Some(*sig),
            Self::Call { id, .. } => *id,
        }
    }
}

/// Message sent by a server back to a client.
///
/// Variant order matters for untagged decoding: a record carrying both
/// `err` and `ack` is an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseMessage {
    Err {
        err: RequestId,
        #[serde(default)]
        data: Value,
    },
    Ack {
        ack: RequestId,
        #[serde(default)]
        data: Value,
    },
    Sig {
        sig: RequestId,
        #[serde(default)]
        data: Value,
    },
    Fin { fin: RequestId },
}

impl ResponseMessage {
    pub fn ack(id: RequestId, data: Value) -> Self {
        Self::Ack { ack: id, data }
    }

    pub fn err(id: RequestId, data: Value) -> Self {
        Self::Err { err: id, data }
    }

    pub fn sig(id: RequestId, data: Value) -> Self {
        Self::Sig { sig: id, data }
    }

    pub fn fin(id: RequestId) -> Self {
        Self::Fin { fin: id }
    }

    /// The request id this message is addressed to.
    pub fn request_id(&self) -> RequestId {
        match self {
            Self::Err { err, .. } => *err,
            Self::Ack { ack, .. } => *ack,
            Self::Sig { sig, .. } => *sig,
            Self::Fin { fin } => *fin,
        }
    }

    /// True for `ack`, `err` and `fin`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Sig { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Err { .. })
    }

    /// Payload, if the message carries one.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Err { data, .. } | Self::Ack { data, .. } | Self::Sig { data, .. } => Some(data),
            Self::Fin { .. } => None,
        }
    }
}
