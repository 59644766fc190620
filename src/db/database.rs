use crate::aof::{self, Aof, AofConfig, AofError, LoadStop};
use crate::commands::{CommandError, CommandFn, CommandRegistry, CommandResult};
use crate::db::Entity;
use crate::protocol::{Frame, RespValue};
use crate::storage::{Gate, StorageEngine};
use bytes::Bytes;
use std::fs::OpenOptions;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use tracing::{error, info, warn};

/// The database engine shared by every connection.
///
/// # Example
///
/// ```
/// use quillkv::db::Database;
/// use quillkv::protocol::{Frame, RespValue};
///
/// let db = Database::new();
/// let reply = db.execute(&Frame::from_parts(["SET", "name", "Ariz"]));
/// assert_eq!(reply, RespValue::ok());
///
/// let reply = db.execute(&Frame::from_parts(["GET", "name"]));
/// assert_eq!(reply, RespValue::bulk_string("Ariz"));
/// ```
pub struct Database {
    /// Key → entity
    data: StorageEngine<Entity>,

    /// Key → absolute expiry instant, for keys that have one
    ttl: StorageEngine<SystemTime>,

    gate: Gate,

    registry: &'static CommandRegistry,

    /// Append-only log, absent for memory-only databases
    aof: Option<Aof>,

    /// Cleared while the log is being replayed
    logging: AtomicBool,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("keys", &self.data.len())
            .field("ttl_keys", &self.ttl.len())
            .field("aof", &self.aof)
            .finish()
    }
}

impl Database {
    /// Creates an empty database without persistence.
    pub fn new() -> Self {
        Self {
            data: StorageEngine::new(),
            ttl: StorageEngine::new(),
            gate: Gate::new(),
            registry: CommandRegistry::global(),
            aof: None,
            logging: AtomicBool::new(true),
        }
    }

    /// Opens a database backed by the append-only log at `config.path`.
    ///
    /// Existing records are replayed first (up to `config.load_max_bytes`);
    /// commands executed afterwards are appended to the same file.
    pub fn open(config: &AofConfig) -> Result<Self, AofError> {
        let mut db = Self::new();

        let report = aof::load(&db, &config.path, config.load_max_bytes)?;
        info!(
            path = %config.path.display(),
            applied = report.applied,
            skipped = report.skipped,
            bytes = report.bytes_read,
            stop = ?report.stop,
            "AOF loaded"
        );

        // New records must not be glued onto a partial one
        if report.stop == LoadStop::TruncatedRecord {
            truncate_log(&config.path, report.valid_bytes)?;
        }

        db.aof = Some(Aof::open(config)?);
        Ok(db)
    }

    /// Executes one command frame and returns its reply.
    ///
    /// Command errors become error replies. A panicking handler is contained
    /// here and reported as `ERR unknown`; the caller's session carries on.
    pub fn execute(&self, frame: &Frame) -> RespValue {
        match self.dispatch(frame) {
            Ok(reply) => reply,
            Err(e) => e.into(),
        }
    }

    /// Looks up and runs the handler for `frame`.
    pub(crate) fn dispatch(&self, frame: &Frame) -> CommandResult {
        let verb = frame
            .verb()
            .ok_or_else(|| CommandError::UnknownCommand(String::new()))?;
        let handler = self.registry.lookup(verb)?;
        self.invoke(handler, frame.params())
    }

    fn invoke(&self, handler: CommandFn, args: &[Bytes]) -> CommandResult {
        match panic::catch_unwind(AssertUnwindSafe(|| handler(self, args))) {
            Ok(result) => result,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                    .unwrap_or("<non-string panic>");
                error!(panic = message, "Command handler panicked");
                Err(CommandError::Internal)
            }
        }
    }

    /// Returns the entity stored under `key`, expiring it first if its
    /// deadline has passed.
    pub fn get(&self, key: &[u8]) -> Option<Entity> {
        self.gate.wait();
        self.expire_if_due(key);
        self.data.get(key)
    }

    /// Inserts or overwrites `key`. Always returns `1`.
    ///
    /// The TTL record is left alone; callers that want a fresh key call
    /// [`Database::persist`] first.
    pub fn put(&self, key: Bytes, entity: Entity) -> usize {
        self.gate.wait();
        self.data.put(key, entity)
    }

    /// Inserts `key` only if it is absent (or expired).
    ///
    /// Returns `1` if the entity was stored, `0` otherwise.
    pub fn put_if_absent(&self, key: Bytes, entity: Entity) -> usize {
        self.gate.wait();
        self.expire_if_due(&key);
        self.data.put_if_absent(key, entity)
    }

    /// Overwrites `key` only if it exists and has not expired.
    ///
    /// Returns `1` if the entity was stored, `0` otherwise.
    pub fn put_if_exists(&self, key: Bytes, entity: Entity) -> usize {
        self.gate.wait();
        self.expire_if_due(&key);
        self.data.put_if_exists(key, entity)
    }

    /// Installs or replaces the absolute expiry instant of `key`.
    pub fn expire(&self, key: Bytes, at: SystemTime) {
        self.ttl.put(key, at);
    }

    /// Removes the TTL record of `key`, leaving the entity alone.
    pub fn persist(&self, key: &[u8]) {
        self.ttl.remove(key);
    }

    /// Returns the expiry instant of `key`, if it has one.
    pub fn expires_at(&self, key: &[u8]) -> Option<SystemTime> {
        self.ttl.get(key)
    }

    /// Removes `key` and its TTL record. Returns `1` if the entity existed.
    pub fn remove(&self, key: &[u8]) -> usize {
        self.gate.wait();
        self.ttl.remove(key);
        self.data.remove(key)
    }

    /// Number of stored entities, including expired ones not yet reclaimed.
    pub fn len(&self) -> u64 {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub fn aof(&self) -> Option<&Aof> {
        self.aof.as_ref()
    }

    /// Queues `frame` for the append-only log.
    ///
    /// A no-op for memory-only databases and while replay is in progress.
    pub fn add_to_log(&self, frame: Frame) {
        if !self.logging.load(Ordering::Acquire) {
            return;
        }
        if let Some(aof) = &self.aof {
            if let Err(e) = aof.append(frame) {
                warn!(error = %e, "Dropping AOF record");
            }
        }
    }

    /// Drains and closes the append-only log, if any.
    pub fn close(&self) {
        if let Some(aof) = &self.aof {
            aof.close();
        }
    }

    /// Stops [`Database::add_to_log`] from queueing records until the returned
    /// guard is dropped.
    pub(crate) fn suspend_logging(&self) -> LoggingSuspended<'_> {
        self.logging.store(false, Ordering::Release);
        LoggingSuspended(&self.logging)
    }

    /// Removes `key` if its TTL has passed. Returns `true` if it was expired.
    fn expire_if_due(&self, key: &[u8]) -> bool {
        let Some(at) = self.ttl.get(key) else {
            return false;
        };
        if SystemTime::now() < at {
            return false;
        }

        // Only drop the entity if the record we saw is still the current one;
        // otherwise a concurrent write has already given the key a new life.
        if self.ttl.remove_if(key, |current| *current == at) == 1 {
            self.data.remove(key);
        }
        true
    }
}

/// Cuts the log back to `len` bytes, dropping a partial trailing record.
fn truncate_log(path: &Path, len: u64) -> Result<(), AofError> {
    let truncate = |path: &Path| {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(len)?;
        file.sync_all()
    };
    truncate(path).map_err(|source| AofError::Truncate {
        path: path.to_path_buf(),
        source,
    })?;
    warn!(path = %path.display(), len, "Truncated incomplete AOF record");
    Ok(())
}

pub(crate) struct LoggingSuspended<'a>(&'a AtomicBool);

impl Drop for LoggingSuspended<'_> {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn string(s: &'static str) -> Entity {
        Entity::String(Bytes::from_static(s.as_bytes()))
    }

    #[test]
    fn test_unknown_command() {
        let db = Database::new();
        let reply = db.execute(&Frame::from_parts(["FLUSHALL"]));
        assert_eq!(reply, RespValue::error("ERR unknown command 'flushall'"));

        let reply = db.execute(&Frame::new(vec![]));
        assert_eq!(reply, RespValue::error("ERR unknown command ''"));
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        fn boom(_db: &Database, _args: &[Bytes]) -> CommandResult {
            panic!("handler bug");
        }

        let db = Database::new();
        assert_eq!(db.invoke(boom, &[]), Err(CommandError::Internal));

        // The database is still usable afterwards
        db.put(Bytes::from("k"), string("v"));
        assert_eq!(db.get(b"k"), Some(string("v")));
    }

    #[test]
    fn test_lazy_expiry_on_get() {
        let db = Database::new();
        db.put(Bytes::from("k"), string("v"));
        db.expire(Bytes::from("k"), SystemTime::now() - Duration::from_secs(1));

        assert_eq!(db.len(), 1);
        assert_eq!(db.get(b"k"), None);
        assert_eq!(db.len(), 0);
        assert!(db.expires_at(b"k").is_none());
    }

    #[test]
    fn test_future_ttl_keeps_key() {
        let db = Database::new();
        db.put(Bytes::from("k"), string("v"));
        db.expire(Bytes::from("k"), SystemTime::now() + Duration::from_secs(60));
        assert_eq!(db.get(b"k"), Some(string("v")));

        db.persist(b"k");
        assert!(db.expires_at(b"k").is_none());
        assert_eq!(db.get(b"k"), Some(string("v")));
    }

    #[test]
    fn test_conditional_puts_see_expired_keys_as_absent() {
        let db = Database::new();
        db.put(Bytes::from("k"), string("old"));
        db.expire(Bytes::from("k"), SystemTime::now() - Duration::from_millis(1));

        assert_eq!(db.put_if_exists(Bytes::from("k"), string("new")), 0);
        assert_eq!(db.get(b"k"), None);

        db.put(Bytes::from("k"), string("old"));
        db.expire(Bytes::from("k"), SystemTime::now() - Duration::from_millis(1));
        assert_eq!(db.put_if_absent(Bytes::from("k"), string("new")), 1);
        assert_eq!(db.get(b"k"), Some(string("new")));
    }

    #[test]
    fn test_remove_clears_ttl() {
        let db = Database::new();
        db.put(Bytes::from("k"), string("v"));
        db.expire(Bytes::from("k"), SystemTime::now() + Duration::from_secs(60));

        assert_eq!(db.remove(b"k"), 1);
        assert_eq!(db.remove(b"k"), 0);
        assert!(db.expires_at(b"k").is_none());
    }

    #[test]
    fn test_suspended_logging_is_restored() {
        let db = Database::new();
        {
            let _suspended = db.suspend_logging();
            assert!(!db.logging.load(Ordering::Acquire));
        }
        assert!(db.logging.load(Ordering::Acquire));
    }

    #[test]
    fn test_open_replays_existing_log() {
        let dir = tempfile::tempdir().unwrap();
        let config = AofConfig::new(dir.path().join("db.aof"));
        std::fs::write(
            &config.path,
            b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n*3\r\n$3\r\nSET\r\n$1\r\nb\r\n$1\r\n2\r\n",
        )
        .unwrap();

        let db = Database::open(&config).unwrap();
        assert_eq!(db.get(b"a"), Some(string("1")));
        assert_eq!(db.get(b"b"), Some(string("2")));
        db.close();

        // Replay did not append the records it read back to the file
        let len = std::fs::metadata(&config.path).unwrap().len();
        assert_eq!(len, 54);
    }

    #[test]
    fn test_open_cuts_partial_record_before_appending() {
        let dir = tempfile::tempdir().unwrap();
        let config = AofConfig::new(dir.path().join("db.aof"));
        std::fs::write(
            &config.path,
            b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n*3\r\n$3\r\nSET\r\n$1\r\nb\r\n$5\r\nhel",
        )
        .unwrap();

        let db = Database::open(&config).unwrap();
        assert_eq!(std::fs::metadata(&config.path).unwrap().len(), 27);
        assert_eq!(db.execute(&Frame::from_parts(["SET", "c", "3"])), RespValue::ok());
        db.close();

        let db = Database::open(&config).unwrap();
        assert_eq!(db.get(b"a"), Some(string("1")));
        assert_eq!(db.get(b"b"), None);
        assert_eq!(db.get(b"c"), Some(string("3")));
    }
}
