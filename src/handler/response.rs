//! Request and response objects handed to handlers.
//!
//! A [`Response`] is bound to one incarnation of a request in its session's
//! [`RequestTable`]. Exactly one of [`send`](Response::send),
//! [`error`](Response::error) or [`close`](Response::close) succeeds; it
//! removes the request, writes the terminal message and runs the end hook.
//! Any later terminal call, or an [`emit`](Response::emit) after removal,
//! fails with [`RpcError::RequestInactive`].

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{ErrorPayload, Result, RpcError};
use crate::message::{RequestId, ResponseMessage};
use crate::session::RequestTable;
use crate::transport::Respond;

/// Inbound data forwarded to a streaming request.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// Raw data sent with `{ push, data }`.
    Push(Value),
    /// Signal sent with `{ sig, data }`.
    Sig(Value),
}

impl Signal {
    pub fn data(&self) -> &Value {
        match self {
            Self::Push(data) | Self::Sig(data) => data,
        }
    }

    pub fn into_data(self) -> Value {
        match self {
            Self::Push(data) | Self::Sig(data) => data,
        }
    }
}

/// Receiving end of a streaming request's inbound data.
pub type SignalReceiver = mpsc::UnboundedReceiver<Signal>;

/// An inbound call as seen by a handler.
#[derive(Debug)]
pub struct Request {
    id: Option<RequestId>,
    op: String,
    args: Vec<Value>,
    signals: Option<SignalReceiver>,
}

impl Request {
    pub(crate) fn new(
        id: Option<RequestId>,
        op: impl Into<String>,
        args: Vec<Value>,
        signals: Option<SignalReceiver>,
    ) -> Self {
        Self {
            id,
            op: op.into(),
            args,
            signals,
        }
    }

    /// Request id. `None` for fire-and-forget calls.
    pub fn id(&self) -> Option<RequestId> {
        self.id
    }

    /// Full dot-joined operation name.
    pub fn op(&self) -> &str {
        &self.op
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Decode the argument list as `T`, typically a tuple.
    pub fn parse_args<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Array(self.args.clone()))?)
    }

    pub fn into_args(self) -> Vec<Value> {
        self.args
    }

    /// True when the caller opened the request in streaming mode.
    pub fn is_streaming(&self) -> bool {
        self.signals.is_some()
    }

    /// Take the inbound `push`/`sig` stream. Only the first call gets it.
    pub fn take_signals(&mut self) -> Option<SignalReceiver> {
        self.signals.take()
    }
}

#[derive(Clone)]
enum Target {
    Tracked {
        id: RequestId,
        token: u64,
        table: Arc<RequestTable>,
        respond: Respond,
    },
    Detached,
}

/// Response object handed to a handler.
///
/// Cheap to clone; all clones address the same request.
#[derive(Clone)]
pub struct Response {
    op: Arc<str>,
    target: Target,
}

impl Response {
    pub(crate) fn tracked(
        op: &str,
        id: RequestId,
        token: u64,
        table: Arc<RequestTable>,
        respond: Respond,
    ) -> Self {
        Self {
            op: Arc::from(op),
            target: Target::Tracked {
                id,
                token,
                table,
                respond,
            },
        }
    }

    /// Response for a call without an id. Every operation is accepted and
    /// dropped.
    pub(crate) fn detached(op: &str) -> Self {
        Self {
            op: Arc::from(op),
            target: Target::Detached,
        }
    }

    pub fn id(&self) -> Option<RequestId> {
        match &self.target {
            Target::Tracked { id, .. } => Some(*id),
            Target::Detached => None,
        }
    }

    pub fn op(&self) -> &str {
        &self.op
    }

    /// True while the request is still in its table.
    pub fn is_active(&self) -> bool {
        match &self.target {
            Target::Tracked {
                id, token, table, ..
            } => table.is_live(*id, *token),
            Target::Detached => false,
        }
    }

    /// Successful terminal reply: `{ ack, data }`.
    pub fn send<T: Serialize + ?Sized>(&self, data: &T) -> Result<()> {
        let data = serde_json::to_value(data)?;
        self.terminate("send", |id| ResponseMessage::ack(id, data))
    }

    /// Non-terminal signal: `{ sig, data }`. May be called repeatedly.
    pub fn emit<T: Serialize + ?Sized>(&self, data: &T) -> Result<()> {
        let data = serde_json::to_value(data)?;
        match &self.target {
            Target::Detached => {
                tracing::debug!(op = %self.op, "dropping emit of fire-and-forget call");
                Ok(())
            }
            Target::Tracked {
                id,
                token,
                table,
                respond,
            } => {
                let lock = match table.write_lock(*id) {
                    Some((current, lock)) if current == *token => lock,
                    _ => return Err(self.inactive(*id, table, "emit")),
                };
                let _serial = lock.lock();
                if table.is_live(*id, *token) {
                    respond.write(ResponseMessage::sig(*id, data))
                } else {
                    Err(self.inactive(*id, table, "emit"))
                }
            }
        }
    }

    /// Error terminal reply: `{ err, data }`.
    pub fn error<T: Serialize + ?Sized>(&self, data: &T) -> Result<()> {
        let data = serde_json::to_value(data)?;
        self.terminate("error", |id| ResponseMessage::err(id, data))
    }

    /// Graceful terminal reply without payload: `{ fin }`.
    pub fn close(&self) -> Result<()> {
        self.terminate("close", ResponseMessage::fin)
    }

    /// Install the cleanup hook run exactly once when the request ends.
    ///
    /// Replaces any earlier hook. If the request has already ended (or has
    /// no id) the hook runs immediately.
    pub fn on_end<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.target {
            Target::Tracked {
                id, token, table, ..
            } => {
                if let Err(hook) = table.set_end_hook(*id, *token, Box::new(hook)) {
                    hook();
                }
            }
            Target::Detached => hook(),
        }
    }

    /// Engine-side failure report (gate denial, handler failure).
    ///
    /// Unlike the handler-facing operations, a request that already ended
    /// is not an error here.
    pub(crate) fn abort(&self, payload: &ErrorPayload) -> Result<()> {
        match &self.target {
            Target::Detached => {
                tracing::warn!(op = %self.op, msg = %payload.msg, "fire-and-forget call failed");
                Ok(())
            }
            Target::Tracked {
                id,
                token,
                table,
                respond,
            } => match finish_with(table, *id, *token, respond, || {
                ResponseMessage::err(*id, payload.to_value())
            }) {
                Some(written) => written,
                None => {
                    tracing::warn!(
                        session = table.session(),
                        id,
                        op = %self.op,
                        msg = %payload.msg,
                        "failure after request already ended"
                    );
                    Ok(())
                }
            },
        }
    }

    fn terminate(
        &self,
        kind: &'static str,
        message: impl FnOnce(RequestId) -> ResponseMessage,
    ) -> Result<()> {
        match &self.target {
            Target::Detached => {
                tracing::debug!(op = %self.op, kind, "dropping reply of fire-and-forget call");
                Ok(())
            }
            Target::Tracked {
                id,
                token,
                table,
                respond,
            } => match finish_with(table, *id, *token, respond, || message(*id)) {
                Some(written) => written,
                None => Err(self.inactive(*id, table, kind)),
            },
        }
    }

    fn inactive(&self, id: RequestId, table: &RequestTable, kind: &str) -> RpcError {
        tracing::error!(
            session = table.session(),
            id,
            op = %self.op,
            kind,
            "response on a request that is no longer active"
        );
        RpcError::RequestInactive {
            id,
            op: self.op.to_string(),
        }
    }
}

/// Remove incarnation `token` of `id` and write its terminal message while
/// holding the request's write lock, then run its end hook.
///
/// `None` if the request is no longer live.
pub(crate) fn finish_with(
    table: &RequestTable,
    id: RequestId,
    token: u64,
    respond: &Respond,
    message: impl FnOnce() -> ResponseMessage,
) -> Option<Result<()>> {
    let lock = match table.write_lock(id) {
        Some((current, lock)) if current == token => lock,
        _ => return None,
    };

    let serial = lock.lock();
    let live = table.remove(id, token)?;
    let written = respond.write(message());
    drop(serial);

    live.finish();
    Some(written)
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("op", &self.op)
            .field("id", &self.id())
            .finish()
    }
}
