//! Wire Types: Replies and Command Frames
//!
//! This module defines the two values that cross the wire:
//!
//! - [`RespValue`]: a reply sent back to a client.
//! - [`Frame`]: one decoded command (verb + arguments). Frames are produced by the
//!   [`Decoder`](crate::protocol::Decoder) and are also the record format of the
//!   append-only file.
//!
//! ## Reply Format
//!
//! Each reply starts with a type prefix byte:
//! - `+` Status
//! - `-` Error
//! - `:` Integer
//! - `$` Bulk String (`$-1` is the null bulk)
//! - `*` Array
//!
//! All lines are terminated with CRLF (`\r\n`).
//!
//! ## Frame Format
//!
//! A frame is always written in array form:
//!
//! ```text
//! *3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nAriz\r\n
//! ```

use bytes::Bytes;

/// The CRLF terminator used by the protocol
pub const CRLF: &[u8] = b"\r\n";

/// Protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A reply sent back to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Status reply. Cannot contain CRLF.
    /// Format: `+<string>\r\n`
    SimpleString(String),

    /// Error reply.
    /// Format: `-<error message>\r\n`
    Error(String),

    /// 64-bit signed integer.
    /// Format: `:<integer>\r\n`
    Integer(i64),

    /// Binary-safe string.
    /// Format: `$<length>\r\n<data>\r\n`
    BulkString(Bytes),

    /// Null bulk string, used to signal "absent" or "not set".
    /// Format: `$-1\r\n`
    Null,

    /// Array of replies.
    /// Format: `*<count>\r\n<element1><element2>...`
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Creates a new status reply.
    ///
    /// # Example
    /// ```
    /// use quillkv::protocol::types::RespValue;
    /// let ok = RespValue::simple_string("OK");
    /// ```
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// Creates a new error reply.
    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    /// Creates a new integer reply.
    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    /// Creates a new bulk string reply.
    ///
    /// # Example
    /// ```
    /// use quillkv::protocol::types::RespValue;
    /// use bytes::Bytes;
    /// let bulk = RespValue::bulk_string(Bytes::from("hello"));
    /// ```
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    /// Creates a null bulk reply.
    pub fn null() -> Self {
        RespValue::Null
    }

    /// Creates an array reply.
    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// Common reply for successful operations
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// Common reply for PING
    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Serializes the reply to bytes for sending over the wire.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the reply into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => {
                buf.push(prefix::SIMPLE_STRING);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::Error(s) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::BulkString(data) => write_bulk(buf, data),
            RespValue::Null => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(b"-1");
                buf.extend_from_slice(CRLF);
            }
            RespValue::Array(values) => {
                write_array_header(buf, values.len());
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }
}

/// One decoded command: the verb followed by its arguments.
///
/// Frames are immutable once built. Every argument is an owned `Bytes`, so
/// handlers may keep them without tying up the connection's read buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    args: Vec<Bytes>,
}

impl Frame {
    /// Builds a frame from its arguments, verb first.
    pub fn new(args: Vec<Bytes>) -> Self {
        Self { args }
    }

    /// Builds a frame from anything byte-like. Mostly useful in tests.
    pub fn from_parts<I, T>(parts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        Self::new(parts.into_iter().map(Into::into).collect())
    }

    /// The command verb, if the frame has one.
    pub fn verb(&self) -> Option<&Bytes> {
        self.args.first()
    }

    /// The arguments after the verb.
    pub fn params(&self) -> &[Bytes] {
        self.args.get(1..).unwrap_or(&[])
    }

    /// All arguments, verb included.
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Encodes the frame in array form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.write_to(&mut buf);
        buf
    }

    /// Encodes the frame in array form into an existing buffer.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        write_array_header(buf, self.args.len());
        for arg in &self.args {
            write_bulk(buf, arg);
        }
    }

    fn encoded_len(&self) -> usize {
        // *N\r\n plus, per argument, $L\r\n<data>\r\n
        let digits = |n: usize| n.to_string().len();
        3 + digits(self.args.len())
            + self
                .args
                .iter()
                .map(|a| 5 + digits(a.len()) + a.len())
                .sum::<usize>()
    }
}

fn write_array_header(buf: &mut Vec<u8>, len: usize) {
    buf.push(prefix::ARRAY);
    buf.extend_from_slice(len.to_string().as_bytes());
    buf.extend_from_slice(CRLF);
}

fn write_bulk(buf: &mut Vec<u8>, data: &[u8]) {
    buf.push(prefix::BULK_STRING);
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(CRLF);
    buf.extend_from_slice(data);
    buf.extend_from_slice(CRLF);
}
