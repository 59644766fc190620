//! Command-level errors.
//!
//! Every variant renders as the text of a `-…` error reply. None of them affect
//! the connection that issued the command.

use crate::protocol::RespValue;
use thiserror::Error;

/// Result type returned by command handlers.
pub type CommandResult = Result<RespValue, CommandError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Bad or conflicting command options
    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArgCount(&'static str),

    /// The stored entity is not of the shape the command expects
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    /// A TTL option that is zero or negative
    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpire(&'static str),

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    /// A handler panicked; the panic was contained at the dispatch boundary
    #[error("ERR unknown")]
    Internal,
}

impl From<CommandError> for RespValue {
    fn from(err: CommandError) -> Self {
        RespValue::error(err.to_string())
    }
}
