//! AOF replay
//!
//! Reads the log in chunks, decodes it with the same [`Decoder`] live
//! connections use, and dispatches every frame directly to its handler. Log
//! emission is suspended for the duration, so nothing read is written back.

use crate::aof::AofError;
use crate::commands::CommandError;
use crate::db::Database;
use crate::protocol::{Decoder, Frame};
use bytes::BytesMut;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::{debug, warn};

const CHUNK_SIZE: usize = 64 * 1024;

/// Why replay stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadStop {
    /// The whole file was replayed
    #[default]
    EndOfLog,
    /// The byte bound was reached
    ByteLimit,
    /// The file ended in the middle of a record; the partial record was ignored
    TruncatedRecord,
    /// A malformed record was found; nothing from it onwards was applied
    Corrupt,
}

/// Summary of a replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Frames whose handler ran successfully
    pub applied: u64,
    /// Frames that were unknown or whose handler returned an error
    pub skipped: u64,
    /// Bytes read from the file
    pub bytes_read: u64,
    /// Offset just past the last complete record
    pub valid_bytes: u64,
    pub stop: LoadStop,
}

/// Replays the log at `path` into `db`.
///
/// A missing file is an empty log. With `max_bytes` set, at most that many
/// bytes are read and a record cut by the bound is not applied.
pub fn load(db: &Database, path: &Path, max_bytes: Option<u64>) -> Result<LoadReport, AofError> {
    let mut report = LoadReport::default();

    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No AOF file, starting empty");
            return Ok(report);
        }
        Err(source) => {
            return Err(AofError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let _suspended = db.suspend_logging();
    let mut reader = file.take(max_bytes.unwrap_or(u64::MAX));
    let mut decoder = Decoder::new();
    let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
    let mut chunk = vec![0u8; CHUNK_SIZE];

    loop {
        loop {
            match decoder.decode(&mut buf) {
                Ok(Some(frame)) => {
                    report.valid_bytes = report.bytes_read - buf.len() as u64;
                    apply(db, &frame, &mut report);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        offset = report.valid_bytes,
                        error = %e,
                        "Malformed AOF record, stopping replay"
                    );
                    report.stop = LoadStop::Corrupt;
                    return Ok(report);
                }
            }
        }

        let n = match reader.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(AofError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        if n == 0 {
            break;
        }
        report.bytes_read += n as u64;
        buf.extend_from_slice(&chunk[..n]);
    }

    report.stop = if max_bytes.is_some() && reader.limit() == 0 {
        LoadStop::ByteLimit
    } else if !buf.is_empty() || decoder.is_mid_frame() {
        warn!(
            path = %path.display(),
            offset = report.valid_bytes,
            pending = report.bytes_read - report.valid_bytes,
            "AOF ends with an incomplete record, ignoring it"
        );
        LoadStop::TruncatedRecord
    } else {
        LoadStop::EndOfLog
    };

    Ok(report)
}

fn apply(db: &Database, frame: &Frame, report: &mut LoadReport) {
    match db.dispatch(frame) {
        Ok(_) => report.applied += 1,
        Err(CommandError::UnknownCommand(verb)) => {
            warn!(command = %verb, "Skipping unknown command in AOF");
            report.skipped += 1;
        }
        Err(e) => {
            debug!(error = %e, "AOF record failed to apply");
            report.skipped += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Entity;
    use bytes::Bytes;

    const SET_A: &[u8] = b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n";
    const SET_B: &[u8] = b"*3\r\n$3\r\nSET\r\n$1\r\nb\r\n$1\r\n2\r\n";

    fn write_log(dir: &tempfile::TempDir, contents: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join("replay.aof");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn value(db: &Database, key: &[u8]) -> Option<Bytes> {
        db.get(key).and_then(|e| e.as_string().cloned())
    }

    #[test]
    fn test_missing_file_is_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new();
        let report = load(&db, &dir.path().join("nope.aof"), None).unwrap();
        assert_eq!(report, LoadReport::default());
        assert!(db.is_empty());
    }

    #[test]
    fn test_replays_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(&dir, &[SET_A, SET_B].concat());
        let db = Database::new();

        let report = load(&db, &path, None).unwrap();
        assert_eq!(report.applied, 2);
        assert_eq!(report.bytes_read, (SET_A.len() + SET_B.len()) as u64);
        assert_eq!(report.valid_bytes, report.bytes_read);
        assert_eq!(report.stop, LoadStop::EndOfLog);
        assert_eq!(value(&db, b"a"), Some(Bytes::from("1")));
        assert_eq!(value(&db, b"b"), Some(Bytes::from("2")));
    }

    #[test]
    fn test_byte_bound_cuts_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(&dir, &[SET_A, SET_B].concat());
        let db = Database::new();

        // Stop five bytes into the second record
        let bound = SET_A.len() as u64 + 5;
        let report = load(&db, &path, Some(bound)).unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.bytes_read, bound);
        assert_eq!(report.stop, LoadStop::ByteLimit);
        assert_eq!(value(&db, b"a"), Some(Bytes::from("1")));
        assert_eq!(db.get(b"b"), None);
    }

    #[test]
    fn test_truncated_tail_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(&dir, &[SET_A, &SET_B[..SET_B.len() - 3]].concat());
        let db = Database::new();

        let report = load(&db, &path, None).unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.stop, LoadStop::TruncatedRecord);
        assert_eq!(report.valid_bytes, SET_A.len() as u64);
        assert_eq!(db.get(b"b"), None);
    }

    #[test]
    fn test_corrupt_record_stops_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(
            &dir,
            &[SET_A, &b"*2\r\n$3\r\nGET\r\n$ab\r\n"[..], SET_B].concat(),
        );
        let db = Database::new();

        let report = load(&db, &path, None).unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.stop, LoadStop::Corrupt);
        assert_eq!(db.get(b"b"), None);
    }

    #[test]
    fn test_unknown_commands_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(&dir, &[&b"*1\r\n$8\r\nFLUSHALL\r\n"[..], SET_A].concat());
        let db = Database::new();

        let report = load(&db, &path, None).unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(db.get(b"a"), Some(Entity::String(Bytes::from("1"))));
    }

    #[test]
    fn test_pexpireat_restores_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(
            &dir,
            &[
                SET_A,
                &b"*3\r\n$9\r\nPEXPIREAT\r\n$1\r\na\r\n$4\r\n1000\r\n"[..],
                SET_B,
                &b"*3\r\n$9\r\nPEXPIREAT\r\n$1\r\nb\r\n$14\r\n99999999999999\r\n"[..],
            ]
            .concat(),
        );
        let db = Database::new();

        let report = load(&db, &path, None).unwrap();
        assert_eq!(report.applied, 4);
        // Deadline long past: expired on access
        assert_eq!(db.get(b"a"), None);
        assert_eq!(value(&db, b"b"), Some(Bytes::from("2")));
        assert!(db.expires_at(b"b").is_some());
    }
}
