//! Command Registry
//!
//! Maps lowercase command names to handler functions. The registry is built
//! once, on first use, and is read-only afterwards, so lookups from any number
//! of connections need no locking.

use crate::commands::error::{CommandError, CommandResult};
use crate::commands::{server, string};
use crate::db::Database;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::OnceLock;

/// A command handler.
///
/// Handlers receive the arguments after the verb. Anything they store must be
/// an owned value; `Bytes` arguments already are.
pub type CommandFn = fn(&Database, &[Bytes]) -> CommandResult;

pub struct CommandRegistry {
    commands: HashMap<&'static str, CommandFn>,
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.names())
            .finish()
    }
}

impl CommandRegistry {
    fn new() -> Self {
        let mut registry = Self {
            commands: HashMap::new(),
        };

        // Server commands
        registry.register("ping", server::ping);

        // String commands
        registry.register("get", string::get);
        registry.register("set", string::set);
        registry.register("pexpireat", string::pexpireat);

        registry
    }

    /// Returns the process-wide registry.
    pub fn global() -> &'static CommandRegistry {
        static REGISTRY: OnceLock<CommandRegistry> = OnceLock::new();
        REGISTRY.get_or_init(CommandRegistry::new)
    }

    fn register(&mut self, name: &'static str, handler: CommandFn) {
        self.commands.insert(name, handler);
    }

    /// Looks up a handler by verb, ignoring case.
    pub fn lookup(&self, verb: &[u8]) -> Result<CommandFn, CommandError> {
        let name = String::from_utf8_lossy(verb).to_ascii_lowercase();
        self.commands
            .get(name.as_str())
            .copied()
            .ok_or(CommandError::UnknownCommand(name))
    }

    /// Names of all registered commands, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.commands.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
