//! Client engine and builder.
//!
//! The [`Client`] issues requests over an [`Outbound`] write primitive and
//! routes every inbound [`ResponseMessage`] to the callback that issued the
//! request. Callbacks always receive a [`Reply`] of `(err, data, end)`:
//!
//! ```text
//! { sig, data }  ->  Reply { err: None,       data, end: false }
//! { ack, data }  ->  Reply { err: None,       data, end: true  }
//! { err, data }  ->  Reply { err: Some(data), data, end: true  }
//! { fin }        ->  Reply { err: None,       data: null, end: true }
//! ```
//!
//! # Example
//!
//! ```ignore
//! let client = Client::builder()
//!     .cancel_timeout(Duration::from_secs(2))
//!     .build(writer);
//!
//! client.request("count", vec![json!(3)], |cx, reply| {
//!     println!("{}: {:?}", cx.id(), reply);
//! })?;
//!
//! let value = client.call("echo", vec![json!("hi")]).await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};

use crate::error::{ErrorPayload, Result, RpcError};
use crate::message::{RequestId, RequestMessage, ResponseMessage};
use crate::server::METHODS_OP;
use crate::transport::Outbound;

/// Default delay after `cancel()` before a still-pending request is
/// reported.
pub const DEFAULT_CANCEL_TIMEOUT: Duration = Duration::from_millis(1500);

/// What happens when a canceled request has not been terminated by the
/// server within the cancel timeout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CancelPolicy {
    /// Log a warning and drop the entry.
    #[default]
    ForceRemove,
    /// Log a warning and keep waiting for the server.
    Diagnose,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub cancel_timeout: Duration,
    pub cancel_policy: CancelPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cancel_timeout: DEFAULT_CANCEL_TIMEOUT,
            cancel_policy: CancelPolicy::default(),
        }
    }
}

/// One delivery to a request callback.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Error payload for `err` replies and synthetic terminations.
    pub err: Option<Value>,
    pub data: Value,
    /// True for the single terminal delivery.
    pub end: bool,
}

impl Reply {
    pub fn is_error(&self) -> bool {
        self.err.is_some()
    }

    /// The error payload as `{ code?, msg }`, when it has that shape.
    pub fn error_payload(&self) -> Option<ErrorPayload> {
        self.err.as_ref().and_then(ErrorPayload::from_value)
    }

    fn from_message(msg: ResponseMessage) -> Self {
        match msg {
            ResponseMessage::Ack { data, .. } => Self {
                err: None,
                data,
                end: true,
            },
            ResponseMessage::Err { data, .. } => Self {
                err: Some(data.clone()),
                data,
                end: true,
            },
            ResponseMessage::Sig { data, .. } => Self {
                err: None,
                data,
                end: false,
            },
            ResponseMessage::Fin { .. } => Self {
                err: None,
                data: Value::Null,
                end: true,
            },
        }
    }
}

/// Request callback.
pub type Callback = Box<dyn FnMut(&CallContext, Reply) + Send + 'static>;

/// Per-request handle passed to callbacks.
#[derive(Clone)]
pub struct CallContext {
    id: RequestId,
    client: Weak<ClientInner>,
}

impl CallContext {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Ask the server to end the request. Writes `{ end }` at most once;
    /// no further callbacks are delivered for this request.
    pub fn cancel(&self) -> Result<()> {
        match self.client.upgrade() {
            Some(client) => client.cancel(self.id),
            None => Err(RpcError::Destroyed),
        }
    }

    /// Send `{ sig, data }` to the server side of this request.
    pub fn emit<T: Serialize + ?Sized>(&self, data: &T) -> Result<()> {
        let client = self.client.upgrade().ok_or(RpcError::Destroyed)?;
        let data = serde_json::to_value(data)?;
        client.write(RequestMessage::Sig { sig: self.id, data })
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext").field("id", &self.id).finish()
    }
}

struct Pending {
    callback: Arc<Mutex<Callback>>,
    canceled: bool,
    context: CallContext,
}

struct ClientState {
    write: Arc<dyn Outbound<RequestMessage>>,
    requests: HashMap<RequestId, Pending>,
    next_id: RequestId,
}

struct ClientInner {
    config: ClientConfig,
    /// `None` once destroyed.
    state: Mutex<Option<ClientState>>,
}

impl ClientInner {
    fn writer(&self) -> Result<Arc<dyn Outbound<RequestMessage>>> {
        self.state
            .lock()
            .as_ref()
            .map(|state| state.write.clone())
            .ok_or(RpcError::Destroyed)
    }

    fn write(&self, msg: RequestMessage) -> Result<()> {
        self.writer()?.write(msg)
    }

    fn cancel(self: &Arc<Self>, id: RequestId) -> Result<()> {
        let write = {
            let mut guard = self.state.lock();
            let state = guard.as_mut().ok_or(RpcError::Destroyed)?;
            match state.requests.get_mut(&id) {
                Some(pending) if !pending.canceled => {
                    pending.canceled = true;
                    state.write.clone()
                }
                Some(_) => return Ok(()),
                None => {
                    tracing::debug!(id, "cancel of finished request");
                    return Ok(());
                }
            }
        };

        write.write(RequestMessage::End { end: id })?;
        self.arm_cancel_timer(id);
        Ok(())
    }

    fn arm_cancel_timer(self: &Arc<Self>, id: RequestId) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(id, "no runtime, cancel timer not armed");
            return;
        };

        let client = Arc::downgrade(self);
        let timeout = self.config.cancel_timeout;
        let policy = self.config.cancel_policy;

        runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(client) = client.upgrade() else {
                return;
            };

            let stale = {
                let mut guard = client.state.lock();
                let Some(state) = guard.as_mut() else {
                    return;
                };
                if !state.requests.contains_key(&id) {
                    return;
                }
                match policy {
                    CancelPolicy::ForceRemove => state.requests.remove(&id),
                    CancelPolicy::Diagnose => None,
                }
            };

            tracing::warn!(
                id,
                ?timeout,
                removed = stale.is_some(),
                "canceled request was not terminated by the server"
            );
        });
    }
}

/// Cancels a request whose caller stopped waiting for it.
struct CancelOnDrop {
    id: RequestId,
    client: Weak<ClientInner>,
    armed: bool,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Some(client) = self.client.upgrade() else {
            return;
        };

        tracing::debug!(id = self.id, "call dropped before reply, canceling");
        if let Err(e) = client.cancel(self.id) {
            tracing::debug!(id = self.id, error = %e, "cancel of dropped call failed");
        }
    }
}

/// Builder for configuring and creating a [`Client`].
#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delay after `cancel()` before the cancel policy applies.
    ///
    /// Default: 1500 ms
    pub fn cancel_timeout(mut self, timeout: Duration) -> Self {
        self.config.cancel_timeout = timeout;
        self
    }

    /// Default: [`CancelPolicy::ForceRemove`]
    pub fn cancel_policy(mut self, policy: CancelPolicy) -> Self {
        self.config.cancel_policy = policy;
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build<W: Outbound<RequestMessage>>(self, write: W) -> Client {
        Client {
            inner: Arc::new(ClientInner {
                config: self.config,
                state: Mutex::new(Some(ClientState {
                    write: Arc::new(write),
                    requests: HashMap::new(),
                    next_id: 1,
                })),
            }),
        }
    }
}

/// The client engine. Cheap to clone; clones share the request table.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Client with default configuration.
    pub fn new<W: Outbound<RequestMessage>>(write: W) -> Self {
        ClientBuilder::new().build(write)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Issue a request. Returns the id allocated for it.
    pub fn request<F>(&self, op: &str, args: Vec<Value>, callback: F) -> Result<RequestId>
    where
        F: FnMut(&CallContext, Reply) + Send + 'static,
    {
        self.issue(op, args, false, Box::new(callback))
    }

    /// Issue a request in streaming mode; the server side may then receive
    /// `push`/`sig` data for it.
    pub fn request_stream<F>(&self, op: &str, args: Vec<Value>, callback: F) -> Result<RequestId>
    where
        F: FnMut(&CallContext, Reply) + Send + 'static,
    {
        self.issue(op, args, true, Box::new(callback))
    }

    /// Fire-and-forget call. No id is allocated and nothing comes back.
    pub fn notify(&self, op: &str, args: Vec<Value>) -> Result<()> {
        self.inner.write(RequestMessage::call(op, args, None))
    }

    fn issue(&self, op: &str, args: Vec<Value>, stream: bool, callback: Callback) -> Result<RequestId> {
        let (id, write) = {
            let mut guard = self.inner.state.lock();
            let state = guard.as_mut().ok_or(RpcError::Destroyed)?;
            let id = state.next_id;
            state.next_id += 1;
            state.requests.insert(
                id,
                Pending {
                    callback: Arc::new(Mutex::new(callback)),
                    canceled: false,
                    context: CallContext {
                        id,
                        client: Arc::downgrade(&self.inner),
                    },
                },
            );
            (id, state.write.clone())
        };

        let msg = if stream {
            RequestMessage::stream_call(op, args, id)
        } else {
            RequestMessage::call(op, args, Some(id))
        };

        if let Err(e) = write.write(msg) {
            if let Some(state) = self.inner.state.lock().as_mut() {
                state.requests.remove(&id);
            }
            return Err(e);
        }

        tracing::debug!(id, op, stream, "request issued");
        Ok(id)
    }

    /// Route one inbound message to its request.
    pub fn message_received(&self, msg: ResponseMessage) -> Result<()> {
        let id = msg.request_id();
        let terminal = msg.is_terminal();

        let target = {
            let mut guard = self.inner.state.lock();
            let state = guard.as_mut().ok_or(RpcError::Destroyed)?;
            if terminal {
                state
                    .requests
                    .remove(&id)
                    .map(|p| (p.canceled, p.callback, p.context))
            } else {
                state
                    .requests
                    .get(&id)
                    .map(|p| (p.canceled, p.callback.clone(), p.context.clone()))
            }
        };

        let Some((canceled, callback, context)) = target else {
            tracing::debug!(id, "reply for unknown request");
            return Ok(());
        };

        if canceled {
            tracing::debug!(id, terminal, "request canceled, reply dropped");
            return Ok(());
        }

        let mut callback = callback.lock();
        (*callback)(&context, Reply::from_message(msg));
        Ok(())
    }

    /// Send `{ push, data }` to a live request.
    pub fn send<T: Serialize + ?Sized>(&self, id: RequestId, data: &T) -> Result<()> {
        let data = serde_json::to_value(data)?;
        self.inner.write(RequestMessage::Push { push: id, data })
    }

    /// Send `{ sig, data }` to a live request. Same as [`CallContext::emit`].
    pub fn signal<T: Serialize + ?Sized>(&self, id: RequestId, data: &T) -> Result<()> {
        let data = serde_json::to_value(data)?;
        self.inner.write(RequestMessage::Sig { sig: id, data })
    }

    /// Write `{ end }` for a request without marking it canceled.
    pub fn end(&self, id: RequestId) -> Result<()> {
        self.inner.write(RequestMessage::End { end: id })
    }

    /// Cancel a request by id. Same as [`CallContext::cancel`].
    pub fn cancel(&self, id: RequestId) -> Result<()> {
        self.inner.cancel(id)
    }

    /// Terminate every pending request with a synthetic error and clear
    /// the table. Canceled requests are dropped silently.
    pub fn connection_lost(&self) -> Result<()> {
        let pending: Vec<Pending> = {
            let mut guard = self.inner.state.lock();
            let state = guard.as_mut().ok_or(RpcError::Destroyed)?;
            state.requests.drain().map(|(_, p)| p).collect()
        };

        tracing::debug!(pending = pending.len(), "connection lost");
        let err = ErrorPayload::terminated().to_value();

        for p in pending.into_iter().filter(|p| !p.canceled) {
            let mut callback = p.callback.lock();
            (*callback)(
                &p.context,
                Reply {
                    err: Some(err.clone()),
                    data: Value::Null,
                    end: true,
                },
            );
        }
        Ok(())
    }

    /// Release the request table and the writer. Every later operation
    /// fails with [`RpcError::Destroyed`].
    pub fn destroy(&self) {
        if let Some(state) = self.inner.state.lock().take() {
            tracing::debug!(pending = state.requests.len(), "client destroyed");
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().is_none()
    }

    /// Number of requests awaiting a terminal reply.
    pub fn pending_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .as_ref()
            .map_or(0, |state| state.requests.len())
    }

    pub fn is_pending(&self, id: RequestId) -> bool {
        self.inner
            .state
            .lock()
            .as_ref()
            .is_some_and(|state| state.requests.contains_key(&id))
    }

    /// Issue a request and wait for its terminal reply.
    ///
    /// Resolves to the `ack` data, `Value::Null` on `fin`, or
    /// [`RpcError::Remote`] on `err`. Signals are discarded. Dropping the
    /// future before the reply arrives cancels the request.
    pub async fn call(&self, op: &str, args: Vec<Value>) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        let mut tx = Some(tx);

        let id = self.request(op, args, move |_cx, reply| {
            if reply.end {
                if let Some(tx) = tx.take() {
                    let _ = tx.send(reply);
                }
            }
        })?;

        let mut guard = CancelOnDrop {
            id,
            client: Arc::downgrade(&self.inner),
            armed: true,
        };
        let reply = rx.await;
        guard.armed = false;

        let reply = reply.map_err(|_| RpcError::Canceled)?;
        match reply.err {
            Some(err) => Err(RpcError::Remote(err)),
            None => Ok(reply.data),
        }
    }

    /// Open a streaming request and receive every reply on a channel.
    ///
    /// The channel closes after the terminal reply.
    pub fn subscribe(&self, op: &str, args: Vec<Value>) -> Result<(RequestId, mpsc::UnboundedReceiver<Reply>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.request_stream(op, args, move |_cx, reply| {
            let _ = tx.send(reply);
        })?;
        Ok((id, rx))
    }

    /// Fetch the server's visible method list.
    pub async fn methods(&self) -> Result<Map<String, Value>> {
        match self.call(METHODS_OP, Vec::new()).await? {
            Value::Object(map) => Ok(map),
            other => Err(RpcError::handler(format!("unexpected method list: {other}"))),
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    type Written = Arc<Mutex<Vec<RequestMessage>>>;

    fn recording_client(config: ClientConfig) -> (Client, Written) {
        let written: Written = Arc::new(Mutex::new(Vec::new()));
        let sink = written.clone();
        let client = Client::builder().config(config).build(move |msg: RequestMessage| {
            sink.lock().push(msg);
            Ok::<(), RpcError>(())
        });
        (client, written)
    }

    fn collecting() -> (Arc<Mutex<Vec<Reply>>>, impl FnMut(&CallContext, Reply) + Send + 'static) {
        let replies = Arc::new(Mutex::new(Vec::new()));
        let sink = replies.clone();
        (replies, move |_cx: &CallContext, reply: Reply| sink.lock().push(reply))
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let (client, written) = recording_client(ClientConfig::default());
        assert_eq!(client.request("a", vec![], |_, _| {}).unwrap(), 1);
        client.notify("b", vec![]).unwrap();
        assert_eq!(client.request("c", vec![json!(1)], |_, _| {}).unwrap(), 2);

        assert_eq!(
            *written.lock(),
            vec![
                RequestMessage::call("a", vec![], Some(1)),
                RequestMessage::call("b", vec![], None),
                RequestMessage::call("c", vec![json!(1)], Some(2)),
            ]
        );
        assert_eq!(client.pending_count(), 2);
    }

    #[test]
    fn test_routing_sig_then_ack() {
        let (client, _written) = recording_client(ClientConfig::default());
        let (replies, cb) = collecting();
        let id = client.request("count", vec![], cb).unwrap();

        client.message_received(ResponseMessage::sig(id, json!(1))).unwrap();
        client.message_received(ResponseMessage::ack(id, json!(2))).unwrap();
        client.message_received(ResponseMessage::ack(id, json!(3))).unwrap();

        assert_eq!(
            *replies.lock(),
            vec![
                Reply { err: None, data: json!(1), end: false },
                Reply { err: None, data: json!(2), end: true },
            ]
        );
        assert!(!client.is_pending(id));
    }

    #[test]
    fn test_err_and_fin_replies() {
        let (client, _written) = recording_client(ClientConfig::default());
        let (replies, cb) = collecting();
        let a = client.request("a", vec![], cb).unwrap();
        let (fin_replies, cb) = collecting();
        let b = client.request("b", vec![], cb).unwrap();

        client
            .message_received(ResponseMessage::err(a, json!({ "code": 302, "msg": "no" })))
            .unwrap();
        client.message_received(ResponseMessage::fin(b)).unwrap();

        let reply = replies.lock()[0].clone();
        assert!(reply.end);
        assert_eq!(
            reply.error_payload().unwrap().error_code(),
            Some(crate::error::ErrorCode::PermissionDenied)
        );
        assert_eq!(
            *fin_replies.lock(),
            vec![Reply { err: None, data: Value::Null, end: true }]
        );
    }

    #[test]
    fn test_cancel_writes_end_once_and_silences_callbacks() {
        let (client, written) = recording_client(ClientConfig::default());
        let (replies, cb) = collecting();
        let id = client.request("watch", vec![], cb).unwrap();

        client.cancel(id).unwrap();
        client.cancel(id).unwrap();
        assert!(client.is_pending(id));

        client.message_received(ResponseMessage::sig(id, json!(1))).unwrap();
        client.message_received(ResponseMessage::fin(id)).unwrap();

        assert!(replies.lock().is_empty());
        assert!(!client.is_pending(id));
        let ends = written
            .lock()
            .iter()
            .filter(|m| matches!(m, RequestMessage::End { end } if *end == id))
            .count();
        assert_eq!(ends, 1);
    }

    #[test]
    fn test_callback_can_cancel_itself() {
        let (client, written) = recording_client(ClientConfig::default());
        let id = client
            .request("watch", vec![], |cx, reply| {
                if reply.data == json!("stop") {
                    cx.cancel().unwrap();
                }
            })
            .unwrap();

        client.message_received(ResponseMessage::sig(id, json!("stop"))).unwrap();
        assert_eq!(written.lock().last(), Some(&RequestMessage::End { end: id }));
    }

    #[test]
    fn test_emit_and_send_shapes() {
        let (client, written) = recording_client(ClientConfig::default());
        let cx_slot = Arc::new(Mutex::new(None));
        let slot = cx_slot.clone();
        let id = client
            .request_stream("upload", vec![], move |cx, _reply| {
                *slot.lock() = Some(cx.clone());
            })
            .unwrap();

        client.send(id, &json!([1, 2])).unwrap();
        client.message_received(ResponseMessage::sig(id, json!(null))).unwrap();
        let cx = cx_slot.lock().clone().unwrap();
        cx.emit(&json!({ "_ack": 1 })).unwrap();
        client.end(id).unwrap();

        assert_eq!(
            *written.lock(),
            vec![
                RequestMessage::stream_call("upload", vec![], id),
                RequestMessage::Push { push: id, data: json!([1, 2]) },
                RequestMessage::Sig { sig: id, data: json!({ "_ack": 1 }) },
                RequestMessage::End { end: id },
            ]
        );
    }

    #[test]
    fn test_connection_lost_terminates_pending() {
        let (client, _written) = recording_client(ClientConfig::default());
        let (replies, cb) = collecting();
        client.request("a", vec![], cb).unwrap();
        let (canceled_replies, cb) = collecting();
        let canceled = client.request("b", vec![], cb).unwrap();
        client.cancel(canceled).unwrap();

        client.connection_lost().unwrap();

        assert_eq!(
            *replies.lock(),
            vec![Reply {
                err: Some(json!({ "msg": "request terminated by remote host" })),
                data: Value::Null,
                end: true,
            }]
        );
        assert!(canceled_replies.lock().is_empty());
        assert_eq!(client.pending_count(), 0);
    }

    #[test]
    fn test_destroy_rejects_everything() {
        let (client, _written) = recording_client(ClientConfig::default());
        client.destroy();

        assert!(client.is_destroyed());
        assert!(matches!(client.request("a", vec![], |_, _| {}), Err(RpcError::Destroyed)));
        assert!(matches!(client.notify("a", vec![]), Err(RpcError::Destroyed)));
        assert!(matches!(
            client.message_received(ResponseMessage::fin(1)),
            Err(RpcError::Destroyed)
        ));
    }

    #[test]
    fn test_failed_write_releases_id() {
        let client = Client::new(|_msg: RequestMessage| Err::<(), RpcError>(RpcError::transport("down")));
        assert!(client.request("a", vec![], |_, _| {}).is_err());
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_remove_after_cancel_timeout() {
        let (client, _written) = recording_client(ClientConfig::default());
        let id = client.request("watch", vec![], |_, _| {}).unwrap();
        client.cancel(id).unwrap();

        tokio::time::sleep(DEFAULT_CANCEL_TIMEOUT - Duration::from_millis(1)).await;
        assert!(client.is_pending(id));

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(!client.is_pending(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_diagnose_keeps_entry() {
        let config = ClientConfig {
            cancel_policy: CancelPolicy::Diagnose,
            ..ClientConfig::default()
        };
        let (client, _written) = recording_client(config);
        let id = client.request("watch", vec![], |_, _| {}).unwrap();
        client.cancel(id).unwrap();

        tokio::time::sleep(DEFAULT_CANCEL_TIMEOUT * 2).await;
        assert!(client.is_pending(id));
    }

    #[tokio::test]
    async fn test_dropped_call_is_canceled() {
        let (client, written) = recording_client(ClientConfig::default());

        let timed_out = tokio::time::timeout(Duration::from_millis(10), client.call("hang", vec![])).await;
        assert!(timed_out.is_err());

        assert_eq!(
            *written.lock(),
            vec![
                RequestMessage::call("hang", vec![], Some(1)),
                RequestMessage::End { end: 1 },
            ]
        );
        client.message_received(ResponseMessage::fin(1)).unwrap();
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_call_resolves_on_ack() {
        let (client, written) = recording_client(ClientConfig::default());
        let responder = client.clone();

        let call = tokio::spawn({
            let client = client.clone();
            async move { client.call("echo", vec![json!("hi")]).await }
        });

        while written.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        responder.message_received(ResponseMessage::ack(1, json!("hi"))).unwrap();

        assert_eq!(call.await.unwrap().unwrap(), json!("hi"));
    }
}
