//! Codec for the wire protocol through which requests/replies are exchanged.
//!
//! The wire protocol is RESP2: a request is an array whose elements are the
//! command name followed by its arguments, each one a simple or bulk string.
//!
//! # Request
//!
//! - COMMAND
//!     - `*1\r\n$7\r\nCOMMAND\r\n`
//! - SET
//!     - `*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n`
//! - GET
//!     - `*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n`
//! - DEL
//!     - `*2\r\n$3\r\nDEL\r\n$3\r\nkey\r\n`
//!
//! # Reply
//!
//! - simple string: `+ok\r\n`
//! - bulk string: `$5\r\nvalue\r\n`
//! - null: `$-1\r\n`
//! - integer: `:1\r\n`
//! - error: `-invalid syntax\r\n`
//!
//! Malformed requests are not stream errors: they decode into a
//! [`DecodeError`] so the connection can answer them and carry on.

use super::{
    frame::{self, Frame, Header, Invalid, Parse},
    types::{DecodeError, Request},
};
use crate::command::{Command, Reply};
use anyhow::Result;
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Decodes requests element by element.
///
/// Once the header of a request array has been read, every element is
/// consumed from the buffer as soon as it is complete, so a request arriving
/// in many reads is scanned once rather than from its start on every read.
#[derive(Default, Debug)]
pub struct Codec {
    pending: Option<PendingArray>,
}

/// A request array whose header has been consumed but not all its elements.
#[derive(Debug)]
struct PendingArray {
    len: usize,
    elements: Vec<Frame>,
}

impl PendingArray {
    fn new(len: usize) -> Self {
        Self {
            len,
            // The declared length is untrusted until the elements actually arrive.
            elements: Vec::with_capacity(len.min(16)),
        }
    }
}

impl Decoder for Codec {
    type Item = Request;

    type Error = anyhow::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut pending = match self.pending.take() {
            Some(pending) => pending,
            None if src.first() == Some(&b'*') => match frame::parse_array_header(src) {
                Ok(None) => return Ok(None),
                Ok(Some(Header { len: None, consumed })) => {
                    src.advance(consumed);
                    return Ok(Some(Err(DecodeError::NotArray)));
                }
                Ok(Some(Header {
                    len: Some(len),
                    consumed,
                })) => {
                    src.advance(consumed);
                    PendingArray::new(len)
                }
                Err(Invalid { reason, at }) => return Ok(Some(reject(src, reason, at))),
            },
            None => {
                return match frame::parse(src) {
                    Parse::Incomplete => Ok(None),
                    Parse::Complete(_, consumed) => {
                        src.advance(consumed);
                        Ok(Some(Err(DecodeError::NotArray)))
                    }
                    Parse::Invalid { reason, at } => Ok(Some(reject(src, reason, at))),
                }
            }
        };

        while pending.elements.len() < pending.len {
            if src.first() == Some(&b'*') {
                let reason = "nested arrays are not supported".into();
                return Ok(Some(reject(src, reason, 0)));
            }
            match frame::parse(src) {
                Parse::Complete(element, consumed) => {
                    src.advance(consumed);
                    pending.elements.push(element);
                }
                Parse::Incomplete => {
                    self.pending = Some(pending);
                    return Ok(None);
                }
                Parse::Invalid { reason, at } => return Ok(Some(reject(src, reason, at))),
            }
        }

        Ok(Some(Command::from_wire(pending.elements)))
    }
}

/// Turns malformed input into a request error, dropping the line it spoiled.
fn reject(src: &mut BytesMut, reason: String, at: usize) -> Request {
    discard_line(src, at);
    Err(DecodeError::Protocol(reason))
}

impl Encoder<Reply> for Codec {
    type Error = anyhow::Error;

    fn encode(&mut self, item: Reply, dst: &mut BytesMut) -> Result<(), Self::Error> {
        Frame::from(item).encode_into(dst);
        Ok(())
    }
}

/// Skips past the line holding the malformed byte at `at`, or everything if
/// that line is not terminated yet.
fn discard_line(src: &mut BytesMut, at: usize) {
    let at = at.min(src.len());
    let end = src[at..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|i| at + i + 2)
        .unwrap_or_else(|| src.len());
    src.advance(end);
}

impl Command {
    fn from_wire(elements: Vec<Frame>) -> Result<Self, DecodeError> {
        let mut tokens = elements
            .into_iter()
            .map(token)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter();

        let command = tokens.next().ok_or(DecodeError::Empty)?;

        match command.to_ascii_lowercase().as_str() {
            "command" => Ok(Command::Ping),
            "set" => match (tokens.next(), tokens.next(), tokens.next()) {
                (Some(key), Some(value), None) => Ok(Command::Set { key, value }),
                _ => Err(DecodeError::WrongArity { command: "set" }),
            },
            "get" => match (tokens.next(), tokens.next()) {
                (Some(key), None) => Ok(Command::Get { key }),
                _ => Err(DecodeError::WrongArity { command: "get" }),
            },
            "del" => {
                let keys: Vec<_> = tokens.collect();
                if keys.is_empty() {
                    Err(DecodeError::WrongArity { command: "del" })
                } else {
                    Ok(Command::Del { keys })
                }
            }
            _ => Err(DecodeError::InvalidSyntax { command }),
        }
    }
}

fn token(element: Frame) -> Result<String, DecodeError> {
    match element {
        Frame::Simple(text) => Ok(text),
        Frame::Bulk(Some(data)) => String::from_utf8(data.to_vec()).map_err(|_| DecodeError::NotUtf8),
        _ => Err(DecodeError::NonString),
    }
}

impl From<Reply> for Frame {
    fn from(reply: Reply) -> Self {
        match reply {
            Reply::Simple(text) => Frame::Simple(text),
            Reply::Bulk(value) => Frame::Bulk(Some(value.into())),
            Reply::Null => Frame::Bulk(None),
            Reply::Integer(n) => Frame::Integer(n),
            Reply::Error(message) => Frame::Error(message),
        }
    }
}
