//! Per-session request table (server side).
//!
//! Each open session owns one [`RequestTable`] mapping request id to the
//! live request state. The table is the only shared mutable state between a
//! session's inbound message stream and its handlers' responses:
//!
//! - terminal transitions remove under the lock with a compare on the
//!   request's `token`, so a stale response object can never finish a
//!   newer request that reused the same id
//! - end hooks and transport writes always run after the table lock is
//!   released
//! - every write for one request, and the liveness check before it, happen
//!   under that request's own write lock, so nothing can be written for an
//!   id after its terminal message

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::handler::{Context, Signal};
use crate::message::{RequestId, SessionId};
use crate::transport::Respond;

/// Cleanup callback installed by a handler, run exactly once when the
/// request terminates.
pub type EndHook = Box<dyn FnOnce() + Send + 'static>;

/// Server-side state of one active request.
pub(crate) struct LiveRequest {
    pub(crate) token: u64,
    pub(crate) op: String,
    pub(crate) context: Context,
    pub(crate) end_hook: Option<EndHook>,
    pub(crate) respond: Respond,
    pub(crate) signals: Option<mpsc::UnboundedSender<Signal>>,
    pub(crate) write_lock: Arc<Mutex<()>>,
}

impl LiveRequest {
    pub(crate) fn new(
        token: u64,
        op: impl Into<String>,
        context: Context,
        respond: Respond,
        signals: Option<mpsc::UnboundedSender<Signal>>,
    ) -> Self {
        Self {
            token,
            op: op.into(),
            context,
            end_hook: None,
            respond,
            signals,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Consume the request, running its end hook if one was installed.
    pub(crate) fn finish(self) {
        if let Some(hook) = self.end_hook {
            hook();
        }
    }
}

impl fmt::Debug for LiveRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveRequest")
            .field("token", &self.token)
            .field("op", &self.op)
            .field("context", &self.context)
            .field("has_end_hook", &self.end_hook.is_some())
            .field("streaming", &self.signals.is_some())
            .finish()
    }
}

/// Result of routing an inbound `push`/`sig` to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SignalRoute {
    Delivered,
    NotStreaming,
    HandlerGone,
    Unknown,
}

/// Request table for one session.
pub struct RequestTable {
    session: SessionId,
    requests: Mutex<HashMap<RequestId, LiveRequest>>,
}

impl RequestTable {
    pub(crate) fn new(session: SessionId) -> Self {
        Self {
            session,
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Session this table belongs to.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Number of live requests.
    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.lock().is_empty()
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.requests.lock().contains_key(&id)
    }

    /// Ids of all live requests, in no particular order.
    pub fn ids(&self) -> Vec<RequestId> {
        self.requests.lock().keys().copied().collect()
    }

    /// Store a request, returning any previous request with the same id.
    pub(crate) fn insert(&self, id: RequestId, request: LiveRequest) -> Option<LiveRequest> {
        self.requests.lock().insert(id, request)
    }

    /// Remove the request only if it is still the incarnation `token`.
    pub(crate) fn remove(&self, id: RequestId, token: u64) -> Option<LiveRequest> {
        let mut requests = self.requests.lock();
        match requests.get(&id) {
            Some(live) if live.token == token => requests.remove(&id),
            _ => None,
        }
    }

    /// Token and write lock of whatever request currently holds `id`.
    pub(crate) fn write_lock(&self, id: RequestId) -> Option<(u64, Arc<Mutex<()>>)> {
        self.requests
            .lock()
            .get(&id)
            .map(|live| (live.token, live.write_lock.clone()))
    }

    pub(crate) fn is_live(&self, id: RequestId, token: u64) -> bool {
        self.requests
            .lock()
            .get(&id)
            .is_some_and(|live| live.token == token)
    }

    /// Install an end hook. Hands the hook back if the request is gone.
    pub(crate) fn set_end_hook(
        &self,
        id: RequestId,
        token: u64,
        hook: EndHook,
    ) -> std::result::Result<(), EndHook> {
        let mut requests = self.requests.lock();
        match requests.get_mut(&id) {
            Some(live) if live.token == token => {
                live.end_hook = Some(hook);
                Ok(())
            }
            _ => Err(hook),
        }
    }

    pub(crate) fn route_signal(&self, id: RequestId, signal: Signal) -> SignalRoute {
        let sink = {
            let requests = self.requests.lock();
            match requests.get(&id) {
                None => return SignalRoute::Unknown,
                Some(live) => match &live.signals {
                    None => return SignalRoute::NotStreaming,
                    Some(tx) => tx.clone(),
                },
            }
        };

        match sink.send(signal) {
            Ok(()) => SignalRoute::Delivered,
            Err(_) => SignalRoute::HandlerGone,
        }
    }

    /// Response writers of every live request running `op`.
    pub(crate) fn subscribers(&self, op: &str) -> Vec<(RequestId, Respond)> {
        self.requests
            .lock()
            .iter()
            .filter(|(_, live)| live.op == op)
            .map(|(id, live)| (*id, live.respond.clone()))
            .collect()
    }

    /// Remove every request and run every end hook before returning.
    ///
    /// Returns the number of requests that were terminated.
    pub fn drain(&self) -> usize {
        let drained: Vec<(RequestId, LiveRequest)> = self.requests.lock().drain().collect();
        let count = drained.len();

        for (id, live) in drained {
            tracing::debug!(session = self.session, id, op = %live.op, "terminating request");
            live.finish();
        }

        count
    }
}

impl fmt::Debug for RequestTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestTable")
            .field("session", &self.session)
            .field("live", &self.len())
            .finish()
    }
}
