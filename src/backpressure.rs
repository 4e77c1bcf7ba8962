//! Credit-window flow control for streaming requests.
//!
//! Streams have no built-in flow control: a producer sends chunks with
//! `emit`/`send` and the consumer acknowledges with ordinary data (for
//! example `{ "_ack": n }` pushed back on the same request). [`FlowControl`]
//! tracks unacknowledged chunks on the producing side and makes the
//! producer wait while the window is full.
//!
//! # Usage
//!
//! ```ignore
//! let flow = FlowControl::new(8);
//! for chunk in chunks {
//!     flow.reserve().await?;
//!     res.emit(&chunk)?;
//! }
//!
//! // elsewhere, when the peer acknowledges `n` chunks
//! flow.release(n);
//! ```
//!
//! # Configuration
//!
//! - `window`: maximum unacknowledged chunks (default: 16)
//! - timeout: how long `reserve` waits for credit (default: 5s)

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::{Result, RpcError};

/// Default number of unacknowledged chunks allowed in flight.
pub const DEFAULT_WINDOW: usize = 16;

/// Default time `reserve` waits for the window to open.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Shared {
    pending: AtomicUsize,
    released: Notify,
}

/// Credit window shared by a producer and whatever reads acknowledgements.
///
/// Cloning shares the window.
#[derive(Debug, Clone)]
pub struct FlowControl {
    shared: Arc<Shared>,
    window: usize,
    timeout: Duration,
}

impl FlowControl {
    pub fn new(window: usize) -> Self {
        Self::with_timeout(window, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(window: usize, timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                pending: AtomicUsize::new(0),
                released: Notify::new(),
            }),
            window,
            timeout,
        }
    }

    #[inline]
    pub fn window(&self) -> usize {
        self.window
    }

    /// Unacknowledged chunks.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// True while the window is full.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.pending_count() >= self.window
    }

    #[inline]
    pub fn available_capacity(&self) -> usize {
        self.window.saturating_sub(self.pending_count())
    }

    /// Take one credit without waiting.
    ///
    /// Returns `Err(BackpressureTimeout)` if the window is full.
    pub fn try_reserve(&self) -> Result<()> {
        let mut current = self.shared.pending.load(Ordering::Acquire);
        loop {
            if current >= self.window {
                return Err(RpcError::BackpressureTimeout);
            }
            match self.shared.pending.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Take one credit, waiting up to the configured timeout.
    pub async fn reserve(&self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.timeout;

        loop {
            let released = self.shared.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if self.try_reserve().is_ok() {
                return Ok(());
            }

            if tokio::time::timeout_at(deadline, released).await.is_err() {
                tracing::debug!(window = self.window, "flow control window stayed full");
                return Err(RpcError::BackpressureTimeout);
            }
        }
    }

    /// Take one credit and hand back a guard that returns it on drop.
    pub async fn reserve_guard(&self) -> Result<FlowGuard> {
        self.reserve().await?;
        Ok(FlowGuard::new(self.clone()))
    }

    /// Return `count` credits, typically when the peer acknowledges.
    pub fn release(&self, count: usize) {
        let mut current = self.shared.pending.load(Ordering::Acquire);
        loop {
            let next = current.saturating_sub(count);
            match self.shared.pending.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.shared.released.notify_waiters();
    }

    /// Drop all outstanding credits.
    pub fn reset(&self) {
        self.shared.pending.store(0, Ordering::Release);
        self.shared.released.notify_waiters();
    }
}

impl Default for FlowControl {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

/// Guard that returns one credit on drop.
pub struct FlowGuard {
    flow: FlowControl,
    released: bool,
}

impl FlowGuard {
    fn new(flow: FlowControl) -> Self {
        Self {
            flow,
            released: false,
        }
    }

    pub fn release(mut self) {
        if !self.released {
            self.flow.release(1);
            self.released = true;
        }
    }

    /// Keep the credit taken; it will be returned by an explicit
    /// [`FlowControl::release`], usually on acknowledgement.
    pub fn disarm(&mut self) {
        self.released = true;
    }
}

impl Drop for FlowGuard {
    fn drop(&mut self) {
        if !self.released {
            self.flow.release(1);
        }
    }
}
