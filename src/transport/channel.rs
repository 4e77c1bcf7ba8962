//! Channel-backed write primitive.
//!
//! ```text
//! Handler 1 ─┐
//! Handler 2 ─┼─► ChannelWriter<M> ─► ChannelReceiver<M> ─► socket / peer engine
//! Handler N ─┘
//! ```
//!
//! Writes never block: the channel is unbounded and the writer keeps a
//! count of messages that were written but not yet received. Producers that
//! care can poll [`ChannelWriter::is_backpressure_active`] and hold off.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::Outbound;
use crate::error::{Result, RpcError};

/// Default maximum pending messages before backpressure is reported.
pub const DEFAULT_MAX_PENDING: usize = 1024;

/// Configuration for a channel transport.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Pending message count at which backpressure is reported.
    pub max_pending: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

/// Sending half of a channel transport.
///
/// Cheaply cloneable; all clones share the pending counter.
pub struct ChannelWriter<M> {
    tx: mpsc::UnboundedSender<M>,
    pending: Arc<AtomicUsize>,
    max_pending: usize,
}

impl<M> Clone for ChannelWriter<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            pending: self.pending.clone(),
            max_pending: self.max_pending,
        }
    }
}

impl<M> ChannelWriter<M> {
    /// Check if backpressure is currently active.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.max_pending
    }

    /// Get current pending message count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// True once the receiving half has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<M: Send + 'static> Outbound<M> for ChannelWriter<M> {
    fn write(&self, msg: M) -> Result<()> {
        // Increment pending count BEFORE sending
        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(msg).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            RpcError::transport("channel closed")
        })
    }
}

/// Receiving half of a channel transport.
pub struct ChannelReceiver<M> {
    rx: mpsc::UnboundedReceiver<M>,
    pending: Arc<AtomicUsize>,
}

impl<M> ChannelReceiver<M> {
    /// Receive the next message, or `None` once every writer is gone.
    pub async fn recv(&mut self) -> Option<M> {
        let msg = self.rx.recv().await?;
        self.pending.fetch_sub(1, Ordering::Release);
        Some(msg)
    }

    /// Receive without waiting.
    pub fn try_recv(&mut self) -> Option<M> {
        let msg = self.rx.try_recv().ok()?;
        self.pending.fetch_sub(1, Ordering::Release);
        Some(msg)
    }
}

/// Create a channel transport.
pub fn channel<M>(config: WriterConfig) -> (ChannelWriter<M>, ChannelReceiver<M>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));

    let writer = ChannelWriter {
        tx,
        pending: pending.clone(),
        max_pending: config.max_pending,
    };

    (writer, ChannelReceiver { rx, pending })
}
