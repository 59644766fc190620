//! Wire Protocol
//!
//! This module implements the line/array protocol shared by client connections and
//! the append-only file.
//!
//! ## Modules
//!
//! - `types`: [`RespValue`] replies and [`Frame`] commands, with their encodings
//! - `decoder`: incremental [`Decoder`] that turns bytes into frames
//!
//! ## Example
//!
//! ```
//! use quillkv::protocol::{Decoder, Frame, RespValue};
//! use bytes::{Bytes, BytesMut};
//!
//! // Decoding incoming data
//! let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n"[..]);
//! let frame = Decoder::new().decode(&mut buf).unwrap().unwrap();
//! assert_eq!(frame, Frame::from_parts(["GET", "name"]));
//!
//! // Creating replies
//! let reply = RespValue::bulk_string(Bytes::from("Ariz"));
//! assert_eq!(reply.serialize(), b"$4\r\nAriz\r\n");
//! ```

pub mod decoder;
pub mod types;

pub use decoder::{Decoder, ProtocolError};
pub use types::{Frame, RespValue};
