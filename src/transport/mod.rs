//! Transport module - the outbound `write` primitive and ready-made wiring.
//!
//! The engines never own a socket. They are handed an [`Outbound`] and call
//! `write(message)`; delivery order and reliability are the embedder's
//! business. This module provides:
//!
//! - [`Outbound`] - the write primitive, implemented for closures and plain
//!   unbounded tokio senders
//! - [`ChannelWriter`] / [`ChannelReceiver`] - a tokio channel with a pending
//!   message counter for advisory backpressure
//! - [`Loopback`] - an in-process harness wiring one [`Client`] to one
//!   server session
//!
//! [`Client`]: crate::Client

mod channel;
mod loopback;

use std::sync::Arc;

use crate::error::Result;

pub use channel::{channel, ChannelReceiver, ChannelWriter, WriterConfig, DEFAULT_MAX_PENDING};
pub use loopback::Loopback;

/// Outbound half of a message transport.
///
/// Implementations must preserve the order of successive `write` calls.
pub trait Outbound<M>: Send + Sync + 'static {
    /// Hand one message to the transport.
    fn write(&self, msg: M) -> Result<()>;
}

impl<M, F> Outbound<M> for F
where
    F: Fn(M) -> Result<()> + Send + Sync + 'static,
{
    fn write(&self, msg: M) -> Result<()> {
        (self)(msg)
    }
}

impl<M: Send + 'static> Outbound<M> for tokio::sync::mpsc::UnboundedSender<M> {
    fn write(&self, msg: M) -> Result<()> {
        self.send(msg)
            .map_err(|_| crate::error::RpcError::transport("channel closed"))
    }
}

/// Shared write primitive for server responses.
pub type Respond = Arc<dyn Outbound<crate::message::ResponseMessage>>;
