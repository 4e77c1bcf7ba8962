//! Server engine: sessions, dispatch and the request state machine.
//!
//! The [`Server`] owns the method registry, the optional access-control
//! gate and one [`RequestTable`] per open session. Embedders feed every
//! decoded inbound message to [`Server::parse`] together with the session's
//! write primitive:
//!
//! ```ignore
//! let server = Server::builder()
//!     .methods(MethodTree::new().method("echo", MethodMeta::new(), echo))
//!     .build();
//!
//! let session = server.open();
//! while let Some(msg) = inbound.recv().await {
//!     server.parse(session, msg, respond.clone(), Context::new())?;
//! }
//! server.close(session);
//! ```
//!
//! `parse` never waits for a handler. Calls are resolved and recorded
//! synchronously, then the gate check and the handler run on a spawned
//! task, so `push`/`sig`/`end` arriving right behind a call always find
//! the request.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::acl::{AccessControl, Gate};
use crate::error::{ErrorPayload, Result, RpcError};
use crate::handler::{Context, HandlerResult, MethodEntry, MethodMeta, MethodRegistry, MethodTree, Request, Response, Signal};
use crate::message::{RequestId, RequestMessage, ResponseMessage, SessionId};
use crate::session::{LiveRequest, RequestTable, SignalRoute};
use crate::transport::Respond;

/// Name of the built-in operation listing visible methods.
pub const METHODS_OP: &str = "methods";

/// Builder for configuring and creating a [`Server`].
#[derive(Default)]
pub struct ServerBuilder {
    registry: MethodRegistry,
    gate: Option<Gate>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a method definition tree at the root.
    pub fn methods(mut self, tree: MethodTree) -> Self {
        self.registry.insert_methods(tree);
        self
    }

    /// Merge a method definition tree under `path`.
    pub fn namespace(mut self, path: &str, tree: MethodTree) -> Self {
        self.registry.register_namespace(path, tree);
        self
    }

    /// Register one method at a full dot-joined path.
    pub fn method<F, Fut>(mut self, path: &str, meta: MethodMeta, f: F) -> Self
    where
        F: Fn(Request, Response, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register_method(path, meta, f);
        self
    }

    /// Install the access-control gate.
    pub fn access_control<A: AccessControl>(mut self, gate: A) -> Self {
        self.gate = Some(Arc::new(gate));
        self
    }

    pub fn build(self) -> Server {
        Server {
            inner: Arc::new(ServerInner {
                registry: RwLock::new(Arc::new(self.registry)),
                gate: RwLock::new(self.gate),
                sessions: Mutex::new(HashMap::new()),
                next_session: AtomicU64::new(1),
                next_token: AtomicU64::new(1),
            }),
        }
    }
}

struct ServerInner {
    registry: RwLock<Arc<MethodRegistry>>,
    gate: RwLock<Option<Gate>>,
    sessions: Mutex<HashMap<SessionId, Arc<RequestTable>>>,
    next_session: AtomicU64,
    next_token: AtomicU64,
}

/// The server engine. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Default for Server {
    fn default() -> Self {
        ServerBuilder::new().build()
    }
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Server with an empty registry and no gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge more methods. Requests already running keep the registry they
    /// were dispatched with.
    pub fn insert_methods(&self, tree: MethodTree) {
        let mut registry = self.inner.registry.write();
        Arc::make_mut(&mut *registry).insert_methods(tree);
    }

    /// Register one method at a full dot-joined path.
    pub fn register_method<F, Fut>(&self, path: &str, meta: MethodMeta, f: F)
    where
        F: Fn(Request, Response, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let mut registry = self.inner.registry.write();
        Arc::make_mut(&mut *registry).register_method(path, meta, f);
    }

    /// Install or replace the access-control gate.
    pub fn access_control<A: AccessControl>(&self, gate: A) {
        *self.inner.gate.write() = Some(Arc::new(gate));
    }

    /// Snapshot of the current registry.
    pub fn registry(&self) -> Arc<MethodRegistry> {
        self.inner.registry.read().clone()
    }

    fn gate(&self) -> Option<Gate> {
        self.inner.gate.read().clone()
    }

    /// Open a session and return its id.
    pub fn open(&self) -> SessionId {
        let id = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
        self.inner
            .sessions
            .lock()
            .insert(id, Arc::new(RequestTable::new(id)));
        tracing::debug!(session = id, "session opened");
        id
    }

    /// Close a session. Every live request is terminated and its end hook
    /// has run when this returns.
    pub fn close(&self, session: SessionId) -> usize {
        let table = self.inner.sessions.lock().remove(&session);
        match table {
            Some(table) => {
                let ended = table.drain();
                tracing::debug!(session, ended, "session closed");
                ended
            }
            None => {
                tracing::debug!(session, "close of unknown session");
                0
            }
        }
    }

    /// Terminate every live request of a session whose client went away,
    /// keeping the session open.
    pub fn client_offline(&self, session: SessionId) -> usize {
        match self.table(session) {
            Some(table) => {
                let ended = table.drain();
                tracing::debug!(session, ended, "client offline");
                ended
            }
            None => 0,
        }
    }

    /// Terminate every live request of every session. Sessions stay open.
    pub fn close_all(&self) -> usize {
        self.tables().iter().map(|table| table.drain()).sum()
    }

    /// Terminate everything and forget every session.
    pub fn destroy(&self) -> usize {
        let tables: Vec<Arc<RequestTable>> = self.inner.sessions.lock().drain().map(|(_, t)| t).collect();
        let ended: usize = tables.iter().map(|table| table.drain()).sum();
        tracing::debug!(sessions = tables.len(), ended, "server destroyed");
        ended
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Number of live requests in a session; `None` if it is not open.
    pub fn active_requests(&self, session: SessionId) -> Option<usize> {
        self.table(session).map(|table| table.len())
    }

    fn table(&self, session: SessionId) -> Option<Arc<RequestTable>> {
        self.inner.sessions.lock().get(&session).cloned()
    }

    fn tables(&self) -> Vec<Arc<RequestTable>> {
        self.inner.sessions.lock().values().cloned().collect()
    }

    /// Send `{ sig, data }` to every live request running `op`, in every
    /// session. Returns the number of requests reached.
    pub fn broadcast<T: Serialize + ?Sized>(&self, op: &str, data: &T) -> Result<usize> {
        let data = serde_json::to_value(data)?;
        let mut reached = 0;

        for table in self.tables() {
            for (id, respond) in table.subscribers(op) {
                match respond.write(ResponseMessage::sig(id, data.clone())) {
                    Ok(()) => reached += 1,
                    Err(e) => {
                        tracing::warn!(session = table.session(), id, op, error = %e, "broadcast write failed");
                    }
                }
            }
        }

        Ok(reached)
    }

    /// Run an operation in-process and wait for its terminal reply.
    ///
    /// Goes through the same gate and state machine as a remote call.
    /// `sig` emissions are discarded; `fin` resolves to `Value::Null`.
    pub async fn invoke(&self, op: &str, args: Vec<Value>, ctx: Context) -> Result<Value> {
        let session = self.open();
        let (tx, mut rx) = mpsc::unbounded_channel::<ResponseMessage>();
        let respond: Respond = Arc::new(tx);

        let outcome = match self.parse(session, RequestMessage::call(op, args, Some(1)), respond, ctx) {
            Ok(()) => loop {
                match rx.recv().await {
                    Some(ResponseMessage::Ack { data, .. }) => break Ok(data),
                    Some(ResponseMessage::Err { data, .. }) => break Err(RpcError::Remote(data)),
                    Some(ResponseMessage::Fin { .. }) => break Ok(Value::Null),
                    Some(ResponseMessage::Sig { .. }) => continue,
                    None => break Err(RpcError::Canceled),
                }
            },
            Err(e) => Err(e),
        };

        self.close(session);
        outcome
    }

    /// Process one inbound message of `session`.
    ///
    /// Calls run their handler on a tokio task; a call parsed outside a
    /// runtime fails with [`RpcError::NoRuntime`] and is not recorded.
    /// Otherwise an error is returned only for a session that is not open
    /// or when the write primitive fails while answering synchronously.
    pub fn parse(&self, session: SessionId, msg: RequestMessage, respond: Respond, ctx: Context) -> Result<()> {
        let Some(table) = self.table(session) else {
            tracing::warn!(session, "message for a session that is not open");
            return Err(RpcError::SessionNotOpen(session));
        };

        match msg {
            RequestMessage::End { end } => {
                let ended = table.write_lock(end).and_then(|(token, lock)| {
                    let serial = lock.lock();
                    let live = table.remove(end, token)?;
                    let written = live.respond.write(ResponseMessage::fin(end));
                    drop(serial);
                    Some((live, written))
                });

                match ended {
                    Some((live, written)) => {
                        tracing::debug!(session, id = end, op = %live.op, "client ended request");
                        live.finish();
                        written
                    }
                    None => {
                        tracing::debug!(session, id = end, "end for unknown request");
                        Ok(())
                    }
                }
            }
            RequestMessage::Push { push, data } => {
                self.forward(&table, push, Signal::Push(data));
                Ok(())
            }
            RequestMessage::Sig { sig, data } => {
                self.forward(&table, sig, Signal::Sig(data));
                Ok(())
            }
            RequestMessage::Call {
                op,
                args,
                id,
                stream,
            } => self.dispatch(table, op, args, id, stream, respond, ctx),
        }
    }

    fn forward(&self, table: &RequestTable, id: RequestId, signal: Signal) {
        match table.route_signal(id, signal) {
            SignalRoute::Delivered => {}
            SignalRoute::NotStreaming => {
                tracing::debug!(session = table.session(), id, "stream data for non-streaming request");
            }
            SignalRoute::HandlerGone => {
                tracing::debug!(session = table.session(), id, "handler dropped its stream");
            }
            SignalRoute::Unknown => {
                tracing::debug!(session = table.session(), id, "stream data for unknown request");
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &self,
        table: Arc<RequestTable>,
        op: String,
        args: Vec<Value>,
        id: Option<RequestId>,
        stream: bool,
        respond: Respond,
        mut ctx: Context,
    ) -> Result<()> {
        let session = table.session();
        let Ok(runtime) = Handle::try_current() else {
            tracing::error!(session, ?id, op = %op, "call parsed outside a tokio runtime");
            return Err(RpcError::NoRuntime);
        };
        let gate = self.gate();

        if op == METHODS_OP {
            let Some(id) = id else {
                tracing::debug!(session, "methods listing without id");
                return Ok(());
            };
            let registry = self.registry();
            runtime.spawn(async move {
                let list = registry.list_visible(gate.as_ref(), &ctx).await;
                if let Err(e) = respond.write(ResponseMessage::ack(id, Value::Object(list))) {
                    tracing::error!(session, id, error = %e, "failed to write method list");
                }
            });
            return Ok(());
        }

        let Some(entry) = self.registry().resolve(&op) else {
            tracing::debug!(session, ?id, op = %op, "no such method");
            return match id {
                Some(id) => respond.write(ResponseMessage::err(
                    id,
                    ErrorPayload::method_not_found(&op).to_value(),
                )),
                None => Ok(()),
            };
        };

        ctx.set_gate(gate.clone());
        let gate = if entry.meta().public { None } else { gate };

        let (request, response) = match id {
            None => (
                Request::new(None, entry.name(), args, None),
                Response::detached(entry.name()),
            ),
            Some(id) => {
                let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
                let (signals, receiver) = if stream || entry.meta().stream {
                    let (tx, rx) = mpsc::unbounded_channel();
                    (Some(tx), Some(rx))
                } else {
                    (None, None)
                };

                let live = LiveRequest::new(token, entry.name(), ctx.clone(), respond.clone(), signals);
                if let Some(previous) = table.insert(id, live) {
                    tracing::warn!(session, id, op = %previous.op, "request id reused, terminating previous request");
                    previous.finish();
                }

                (
                    Request::new(Some(id), entry.name(), args, receiver),
                    Response::tracked(entry.name(), id, token, table, respond),
                )
            }
        };

        runtime.spawn(run_request(entry, gate, request, response, ctx));
        Ok(())
    }
}

async fn run_request(entry: Arc<MethodEntry>, gate: Option<Gate>, req: Request, res: Response, mut ctx: Context) {
    let op = entry.name();

    if let Some(gate) = gate {
        match gate.check(op, &entry.meta().acl, &ctx).await {
            Err(e) => {
                tracing::debug!(op, error = %e, "access control failed");
                report(&res, ErrorPayload::access_control_failed(op));
                return;
            }
            Ok(decision) if !decision.allowed => {
                tracing::debug!(op, "permission denied");
                report(&res, ErrorPayload::permission_denied(op));
                return;
            }
            Ok(decision) => ctx.set_permissions(decision.permissions.into_iter().collect()),
        }

        if res.id().is_some() && !res.is_active() {
            tracing::debug!(op, id = ?res.id(), "request ended while access was checked");
            return;
        }
    }

    let handler = entry.handler().clone();
    let call = {
        let res = res.clone();
        async move { handler.call(req, res, ctx).await }
    };

    let failure = match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e.to_string(),
        Err(panic) => panic_message(panic.as_ref()),
    };

    tracing::error!(op, id = ?res.id(), error = %failure, "handler failed");
    report(&res, ErrorPayload::handler_failed(op));
}

fn report(res: &Response, payload: ErrorPayload) {
    if let Err(e) = res.abort(&payload) {
        tracing::error!(op = res.op(), id = ?res.id(), error = %e, "failed to write error response");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic in handler: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic in handler: {s}")
    } else {
        "panic in handler".to_string()
    }
}
