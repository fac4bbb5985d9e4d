//! Outcome of decoding a single request frame.

use crate::command::Command;
use thiserror::Error;

/// A decoded request: either a command to run or the reason it was rejected.
pub type Request = Result<Command, DecodeError>;

/// Why a request frame could not be turned into a [`Command`].
///
/// The display text is what clients see in the error reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid syntax")]
    InvalidSyntax { command: String },
    #[error("wrong number of arguments")]
    WrongArity { command: &'static str },
    #[error("expected an array of strings")]
    NotArray,
    #[error("empty command")]
    Empty,
    #[error("expected a string element")]
    NonString,
    #[error("invalid utf-8 in element")]
    NotUtf8,
    #[error("protocol error: {0}")]
    Protocol(String),
}
