//! Handler module - method definitions, registry and per-request objects.
//!
//! Provides:
//! - [`Handler`] - the callable behind an operation
//! - [`MethodTree`] / [`MethodRegistry`] - nested definitions flattened into
//!   a dot-path dispatch table
//! - [`Request`], [`Response`], [`Context`] - what a handler is given
//!
//! # Example
//!
//! ```ignore
//! use rpcmux::handler::{MethodMeta, MethodTree};
//!
//! let tree = MethodTree::new()
//!     .method("echo", MethodMeta::new(), |req: Request, res: Response, _ctx| async move {
//!         res.send(&req.args()[0])
//!     })
//!     .namespace(
//!         "fwupdate",
//!         MethodTree::new().typed_method("state", MethodMeta::new().acl(json!(["user"])),
//!             |(file,): (String,), res: Response, _ctx| async move {
//!                 res.send(&format!("{file}: idle"))
//!             }),
//!     );
//! ```

mod context;
mod registry;
mod response;

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use serde::de::DeserializeOwned;

use crate::error::Result;

pub use context::{Context, Permissions};
pub use registry::{MethodEntry, MethodMeta, MethodRegistry, MethodTree};
pub use response::{Request, Response, Signal, SignalReceiver};

/// Result type for handler functions.
///
/// An `Err` (or a panic) is reported to the caller as code 578.
pub type HandlerResult = Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for operation handlers.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, req: Request, res: Response, ctx: Context) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request, Response, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, req: Request, res: Response, ctx: Context) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self)(req, res, ctx))
    }
}

/// Wrapper that decodes the argument list before calling the handler.
///
/// `T` is usually a tuple matching the positional args. Typed handlers do
/// not see inbound stream data.
pub struct TypedHandler<F, T, Fut>
where
    F: Fn(T, Response, Context) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, Fut> TypedHandler<F, T, Fut>
where
    F: Fn(T, Response, Context) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, Fut> Handler for TypedHandler<F, T, Fut>
where
    F: Fn(T, Response, Context) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, req: Request, res: Response, ctx: Context) -> BoxFuture<'static, HandlerResult> {
        let parsed: T = match req.parse_args() {
            Ok(v) => v,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        Box::pin((self.handler)(parsed, res, ctx))
    }
}
