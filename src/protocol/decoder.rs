//! Incremental Command Decoder
//!
//! This module turns a byte stream into a sequence of [`Frame`]s. The same decoder
//! drives live connections and append-only file replay.
//!
//! ## Framing Modes
//!
//! The first byte of a header line selects the mode:
//!
//! - **Inline**: a line that does not start with `*`. It is split on spaces and
//!   every token becomes one argument.
//! - **Array**: `*<N>\r\n` announces `N` arguments, each sent as `$<L>\r\n` followed
//!   by exactly `L` bytes and `\r\n`.
//!
//! ## State Machine
//!
//! ```text
//!                 ┌──────────────────── inline line ───────────────────┐
//!                 │                                                    ▼
//!   ┌──────────┐  │  *N   ┌──────────────┐  $L   ┌────────────┐   emit Frame
//!   │  Header  │──┴─────> │  BulkHeader  │ ────> │  BulkBody  │ ──── (N-th arg)
//!   └──────────┘          └──────────────┘ <──── └────────────┘
//!        ▲                                  more args      │
//!        └──────────────────────────────────────────────────┘
//! ```
//!
//! Each call to [`Decoder::decode`] only consumes what the current state needs: a
//! whole header line, or a body of exactly `L + 2` bytes. If the buffer holds less
//! than that, nothing is consumed and `Ok(None)` is returned. The partially built
//! frame is kept in the decoder, so a body split across any number of reads is fine.
//!
//! ## Errors
//!
//! A [`ProtocolError`] means the framing of the stream can no longer be trusted.
//! The decoder resets itself, but callers must stop decoding that stream: close the
//! connection, or stop the replay.

use crate::protocol::types::{prefix, Frame};
use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Longest header or inline line accepted without a terminator (64 KB)
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Maximum number of arguments in one array frame
pub const MAX_MULTIBULK_LEN: usize = 1024 * 1024;

/// Maximum size for a single bulk argument (512 MB, same as Redis)
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Errors that make a byte stream undecodable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// `*<N>` did not carry a valid non-negative count
    #[error("invalid multibulk length")]
    InvalidMultibulkLength,

    /// `$<L>` did not carry a valid positive length
    #[error("invalid bulk length")]
    InvalidBulkLength,

    /// An argument header did not start with `$`
    #[error("expected '$', got '{0}'")]
    ExpectedBulkHeader(char),

    /// The `L` bytes of a bulk argument were not followed by CRLF
    #[error("bulk argument not terminated by CRLF")]
    UnterminatedBulk,

    /// An array header line ended with a bare `\n`
    #[error("header line not terminated by CRLF")]
    UnterminatedLine,

    /// No line terminator within [`MAX_LINE_LEN`] bytes
    #[error("line longer than {} bytes", MAX_LINE_LEN)]
    LineTooLong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for an inline command or a `*<N>` line
    Header,
    /// Waiting for a `$<L>` line
    BulkHeader,
    /// Waiting for `bulk_len` bytes plus CRLF
    BulkBody,
}

/// Incremental decoder for command frames.
///
/// Each connection (and each replay) owns its own decoder.
///
/// # Example
///
/// ```
/// use quillkv::protocol::Decoder;
/// use bytes::BytesMut;
///
/// let mut decoder = Decoder::new();
/// let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$4\r\nna"[..]);
/// assert!(decoder.decode(&mut buf).unwrap().is_none());
///
/// buf.extend_from_slice(b"me\r\n");
/// let frame = decoder.decode(&mut buf).unwrap().unwrap();
/// assert_eq!(frame.args().len(), 2);
/// ```
#[derive(Debug)]
pub struct Decoder {
    state: State,
    /// Arguments announced by the current `*<N>` line
    expected: usize,
    /// Arguments received so far for the current frame
    args: Vec<Bytes>,
    /// Length announced by the current `$<L>` line
    bulk_len: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            state: State::Header,
            expected: 0,
            args: Vec::new(),
            bulk_len: 0,
        }
    }

    /// Returns true if the decoder holds part of a frame.
    pub fn is_mid_frame(&self) -> bool {
        self.state != State::Header
    }

    /// Attempts to decode the next frame, consuming bytes from `buf`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(frame))` - a complete frame
    /// - `Ok(None)` - more bytes are needed
    /// - `Err(e)` - the stream is malformed and must be abandoned
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        let result = self.step(buf);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn step(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        loop {
            match self.state {
                State::Header => {
                    let Some(line) = take_line(buf)? else {
                        return Ok(None);
                    };

                    if line.content.first() != Some(&prefix::ARRAY) {
                        let args = split_inline(&line.content);
                        if args.is_empty() {
                            continue;
                        }
                        return Ok(Some(Frame::new(args)));
                    }

                    if !line.crlf {
                        return Err(ProtocolError::UnterminatedLine);
                    }
                    let count = parse_len(&line.content[1..])
                        .filter(|n| *n <= MAX_MULTIBULK_LEN)
                        .ok_or(ProtocolError::InvalidMultibulkLength)?;
                    if count == 0 {
                        continue;
                    }

                    self.expected = count;
                    self.args = Vec::with_capacity(count.min(64));
                    self.state = State::BulkHeader;
                }
                State::BulkHeader => {
                    let Some(line) = take_line(buf)? else {
                        return Ok(None);
                    };
                    match line.content.first() {
                        Some(&prefix::BULK_STRING) => {}
                        Some(&other) => {
                            return Err(ProtocolError::ExpectedBulkHeader(char::from(other)))
                        }
                        None => return Err(ProtocolError::InvalidBulkLength),
                    }
                    if !line.crlf {
                        return Err(ProtocolError::UnterminatedLine);
                    }

                    self.bulk_len = parse_len(&line.content[1..])
                        .filter(|n| *n > 0 && *n <= MAX_BULK_LEN)
                        .ok_or(ProtocolError::InvalidBulkLength)?;
                    self.state = State::BulkBody;
                }
                State::BulkBody => {
                    let needed = self.bulk_len + 2;
                    if buf.len() < needed {
                        buf.reserve(needed - buf.len());
                        return Ok(None);
                    }
                    if &buf[self.bulk_len..needed] != b"\r\n" {
                        return Err(ProtocolError::UnterminatedBulk);
                    }

                    let data = Bytes::copy_from_slice(&buf[..self.bulk_len]);
                    buf.advance(needed);
                    self.args.push(data);

                    if self.args.len() == self.expected {
                        let args = std::mem::take(&mut self.args);
                        self.reset();
                        return Ok(Some(Frame::new(args)));
                    }
                    self.state = State::BulkHeader;
                }
            }
        }
    }

    fn reset(&mut self) {
        self.state = State::Header;
        self.expected = 0;
        self.args.clear();
        self.bulk_len = 0;
    }
}

/// A header line with its terminator stripped.
struct Line {
    content: BytesMut,
    /// Whether the line ended with `\r\n` rather than a bare `\n`
    crlf: bool,
}

/// Removes one `\n`-terminated line from the front of `buf`.
fn take_line(buf: &mut BytesMut) -> Result<Option<Line>, ProtocolError> {
    let Some(pos) = buf.iter().position(|&b| b == b'\n') else {
        if buf.len() > MAX_LINE_LEN {
            return Err(ProtocolError::LineTooLong);
        }
        return Ok(None);
    };

    let mut content = buf.split_to(pos + 1);
    content.truncate(pos);
    let crlf = content.last() == Some(&b'\r');
    if crlf {
        content.truncate(pos - 1);
    }
    Ok(Some(Line { content, crlf }))
}

/// Parses a decimal length. Signs, blanks and overflow are rejected.
fn parse_len(digits: &[u8]) -> Option<usize> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

fn split_inline(line: &[u8]) -> Vec<Bytes> {
    line.split(|&b| b == b' ')
        .filter(|token| !token.is_empty())
        .map(Bytes::copy_from_slice)
        .collect()
}
