//! # rpcmux
//!
//! Transport-agnostic RPC engine: a method registry, a request-multiplexing
//! server and client, and streaming over any ordered, reliable message
//! channel.
//!
//! ## Architecture
//!
//! - **Messages** are structured records ([`RequestMessage`],
//!   [`ResponseMessage`]); the engine never touches bytes. Optional codecs
//!   live in [`codec`].
//! - **Server** ([`Server`]): registry + optional access-control gate + one
//!   request table per session. Feed it inbound messages with
//!   [`Server::parse`].
//! - **Client** ([`Client`]): issues requests over an
//!   [`Outbound`](transport::Outbound) write primitive and routes replies to
//!   callbacks.
//!
//! ## Example
//!
//! ```ignore
//! use rpcmux::{Context, MethodMeta, MethodTree, Request, Response, Server};
//! use rpcmux::transport::Loopback;
//!
//! #[tokio::main]
//! async fn main() -> rpcmux::Result<()> {
//!     let server = Server::builder()
//!         .methods(MethodTree::new().method(
//!             "echo",
//!             MethodMeta::new().doc("Echo the first argument"),
//!             |req: Request, res: Response, _ctx: Context| async move {
//!                 res.send(&req.args()[0])
//!             },
//!         ))
//!         .build();
//!
//!     let link = Loopback::connect(&server, Context::new());
//!     let reply = link.client().call("echo", vec!["hi".into()]).await?;
//!     assert_eq!(reply, "hi");
//!     Ok(())
//! }
//! ```

pub mod acl;
pub mod backpressure;
pub mod client;
pub mod codec;
pub mod error;
pub mod handler;
pub mod message;
pub mod server;
pub mod session;
pub mod transport;

pub use acl::{AccessControl, AccessDecision, Gate};
pub use backpressure::{FlowControl, FlowGuard};
pub use client::{CallContext, CancelPolicy, Client, ClientBuilder, ClientConfig, Reply};
pub use error::{ErrorCode, ErrorPayload, Result, RpcError};
pub use handler::{
    Context, Handler, HandlerResult, MethodMeta, MethodRegistry, MethodTree, Permissions, Request,
    Response, Signal,
};
pub use message::{RequestId, RequestMessage, ResponseMessage, SessionId};
pub use server::{Server, ServerBuilder};
