//! Server Commands

use crate::commands::error::{CommandError, CommandResult};
use crate::db::Database;
use crate::protocol::RespValue;
use bytes::Bytes;

/// PING [message]
///
/// Replies `+PONG`, or echoes the message back as a quoted status line.
pub fn ping(_db: &Database, args: &[Bytes]) -> CommandResult {
    match args {
        [] => Ok(RespValue::pong()),
        [message] => {
            // A status line cannot carry line breaks
            let text: String = String::from_utf8_lossy(message)
                .chars()
                .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
                .collect();
            Ok(RespValue::simple_string(format!("\"{}\"", text)))
        }
        _ => Err(CommandError::WrongArgCount("ping")),
    }
}
