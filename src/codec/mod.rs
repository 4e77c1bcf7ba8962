//! Codec module - optional record encodings for embedders.
//!
//! The engine itself exchanges structured [`RequestMessage`] and
//! [`ResponseMessage`] records and never touches bytes. Transports that do
//! need bytes can use one of these:
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (`to_vec_named`, so
//!   records stay maps with field names)
//! - [`JsonCodec`] - JSON using `serde_json`
//!
//! # Design
//!
//! Codecs are marker structs with static methods rather than trait objects,
//! so a transport picks its codec at compile time.
//!
//! # Example
//!
//! ```
//! use rpcmux::codec::{JsonCodec, MsgPackCodec};
//! use rpcmux::RequestMessage;
//!
//! let msg = RequestMessage::call("echo", vec!["hi".into()], Some(1));
//!
//! let packed = MsgPackCodec::encode(&msg).unwrap();
//! let back: RequestMessage = MsgPackCodec::decode(&packed).unwrap();
//! assert_eq!(back, msg);
//!
//! let text = JsonCodec::encode(&msg).unwrap();
//! assert_eq!(&text[..], br#"{"op":"echo","args":["hi"],"id":1}"#);
//! ```
//!
//! [`RequestMessage`]: crate::RequestMessage
//! [`ResponseMessage`]: crate::ResponseMessage

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;
