//! In-process harness wiring one [`Client`] to one server session.
//!
//! ```text
//! Client ─► ChannelWriter<RequestMessage>  ─► pump ─► Server::parse(session)
//! Client ◄─ pump ◄─ ChannelWriter<ResponseMessage> ◄─ handlers
//! ```
//!
//! Both directions go through [`channel`](super::channel) so message order
//! is preserved and neither side ever calls the other re-entrantly.

use std::sync::Arc;

use tokio::task::JoinHandle;

use super::{channel, ChannelWriter, Respond, WriterConfig};
use crate::client::{Client, ClientBuilder, ClientConfig};
use crate::handler::Context;
use crate::message::{RequestMessage, ResponseMessage, SessionId};
use crate::server::Server;

/// A connected client/session pair.
pub struct Loopback {
    client: Client,
    server: Server,
    session: SessionId,
    responses: ChannelWriter<ResponseMessage>,
    tasks: Vec<JoinHandle<()>>,
}

impl Loopback {
    /// Open a session on `server` and connect a default client to it.
    ///
    /// `context` is handed to every call made through this connection.
    /// Must be called from within a tokio runtime.
    pub fn connect(server: &Server, context: Context) -> Self {
        Self::connect_with(server, context, ClientConfig::default(), WriterConfig::default())
    }

    pub fn connect_with(
        server: &Server,
        context: Context,
        client_config: ClientConfig,
        writer_config: WriterConfig,
    ) -> Self {
        let session = server.open();

        let (request_tx, mut request_rx) = channel::<RequestMessage>(writer_config.clone());
        let (response_tx, mut response_rx) = channel::<ResponseMessage>(writer_config);

        let client = ClientBuilder::new().config(client_config).build(request_tx);

        let inbound = {
            let server = server.clone();
            let respond: Respond = Arc::new(response_tx.clone());
            tokio::spawn(async move {
                while let Some(msg) = request_rx.recv().await {
                    if let Err(e) = server.parse(session, msg, respond.clone(), context.clone()) {
                        tracing::warn!(session, error = %e, "loopback request dropped");
                    }
                }
            })
        };

        let outbound = {
            let client = client.clone();
            tokio::spawn(async move {
                while let Some(msg) = response_rx.recv().await {
                    if let Err(e) = client.message_received(msg) {
                        tracing::debug!(session, error = %e, "loopback reply dropped");
                    }
                }
            })
        };

        tracing::debug!(session, "loopback connected");

        Self {
            client,
            server: server.clone(),
            session,
            responses: response_tx,
            tasks: vec![inbound, outbound],
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Responses written by the server but not yet seen by the client.
    pub fn pending_responses(&self) -> usize {
        self.responses.pending_count()
    }

    /// Simulate the connection dropping: the session is closed on the
    /// server and every pending client request is terminated.
    pub fn disconnect(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if self.server.active_requests(self.session).is_some() {
            self.server.close(self.session);
        }
        if !self.client.is_destroyed() {
            if let Err(e) = self.client.connection_lost() {
                tracing::debug!(session = self.session, error = %e, "loopback client already gone");
            }
        }
    }
}

impl Drop for Loopback {
    fn drop(&mut self) {
        self.shutdown();
    }
}
