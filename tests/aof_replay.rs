//! End-to-end AOF tests: execute commands against a file-backed database,
//! close it, and replay the log into a fresh one.

use bytes::{Bytes, BytesMut};
use quillkv::aof::{AofConfig, LoadStop};
use quillkv::protocol::{Decoder, Frame, RespValue};
use quillkv::Database;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, UNIX_EPOCH};

fn exec(db: &Database, parts: &[&str]) -> RespValue {
    db.execute(&Frame::from_parts(parts.iter().map(|s| s.to_string())))
}

fn value(db: &Database, key: &str) -> Option<Bytes> {
    db.get(key.as_bytes())
        .and_then(|entity| entity.as_string().cloned())
}

/// Decodes every frame in the log file.
fn read_log(path: &Path) -> Vec<Frame> {
    let mut buf = BytesMut::from(&std::fs::read(path).unwrap()[..]);
    let mut decoder = Decoder::new();
    let mut frames = Vec::new();
    while let Some(frame) = decoder.decode(&mut buf).unwrap() {
        frames.push(frame);
    }
    assert!(buf.is_empty(), "log ends with a partial record");
    frames
}

#[test]
fn replay_reproduces_live_state() {
    let dir = tempfile::tempdir().unwrap();
    let config = AofConfig::new(dir.path().join("appendonly.aof"));

    let live = Database::open(&config).unwrap();
    for i in 0..50 {
        let key = format!("key:{}", i);
        let value = format!("value:{}", i);
        assert_eq!(exec(&live, &["SET", &key, &value]), RespValue::ok());
    }
    // Overwrites, refused and accepted conditional writes
    exec(&live, &["SET", "key:1", "changed"]);
    exec(&live, &["SET", "key:2", "ignored", "NX"]);
    exec(&live, &["SET", "key:3", "updated", "XX"]);
    exec(&live, &["SET", "fresh", "inserted", "NX"]);
    exec(&live, &["SET", "ghost", "never", "XX"]);
    exec(&live, &["GET", "key:1"]);
    live.close();

    let replayed = Database::open(&config).unwrap();
    assert_eq!(replayed.len(), live.len());
    for i in 0..50 {
        let key = format!("key:{}", i);
        assert_eq!(value(&replayed, &key), value(&live, &key), "{}", key);
    }
    assert_eq!(value(&replayed, "key:1"), Some(Bytes::from("changed")));
    assert_eq!(value(&replayed, "key:2"), Some(Bytes::from("value:2")));
    assert_eq!(value(&replayed, "key:3"), Some(Bytes::from("updated")));
    assert_eq!(value(&replayed, "fresh"), Some(Bytes::from("inserted")));
    assert_eq!(value(&replayed, "ghost"), None);
}

#[test]
fn replay_keeps_absolute_expiry() {
    let dir = tempfile::tempdir().unwrap();
    let config = AofConfig::new(dir.path().join("appendonly.aof"));

    let live = Database::open(&config).unwrap();
    exec(&live, &["SET", "long", "lived", "EX", "600"]);
    exec(&live, &["SET", "short", "lived", "PX", "40"]);
    exec(&live, &["SET", "plain", "value"]);
    let deadline = live.expires_at(b"long").unwrap();
    live.close();

    thread::sleep(Duration::from_millis(80));

    let replayed = Database::open(&config).unwrap();
    assert_eq!(value(&replayed, "long"), Some(Bytes::from("lived")));
    assert_eq!(value(&replayed, "short"), None);
    assert_eq!(value(&replayed, "plain"), Some(Bytes::from("value")));
    assert!(replayed.expires_at(b"plain").is_none());

    // The log stores milliseconds since the epoch
    let millis = |t: std::time::SystemTime| t.duration_since(UNIX_EPOCH).unwrap().as_millis();
    assert_eq!(millis(replayed.expires_at(b"long").unwrap()), millis(deadline));
}

#[test]
fn single_producer_order_matches_file_order() {
    let dir = tempfile::tempdir().unwrap();
    let config = AofConfig::new(dir.path().join("appendonly.aof"));

    let db = Database::open(&config).unwrap();
    let mut expected = Vec::new();
    for i in 0..200 {
        let key = format!("k{}", i % 7);
        let value = format!("v{}", i);
        exec(&db, &["SET", &key, &value]);
        expected.push(Frame::from_parts(["SET".to_string(), key, value]));
    }
    db.close();

    assert_eq!(read_log(&config.path), expected);
}

#[test]
fn concurrent_writers_are_all_logged() {
    let dir = tempfile::tempdir().unwrap();
    let config = AofConfig::new(dir.path().join("appendonly.aof"));

    let db = Arc::new(Database::open(&config).unwrap());
    let writers: Vec<_> = (0..8)
        .map(|t| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for i in 0..250 {
                    let key = format!("t{}:k{}", t, i);
                    assert_eq!(exec(&db, &["SET", &key, "v"]), RespValue::ok());
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }
    db.close();

    assert_eq!(db.aof().unwrap().appended(), 2000);
    assert_eq!(read_log(&config.path).len(), 2000);

    let replayed = Database::open(&config).unwrap();
    assert_eq!(replayed.len(), 2000);
}

#[test]
fn small_queue_applies_backpressure_without_loss() {
    let dir = tempfile::tempdir().unwrap();
    let config = AofConfig {
        queue_size: 4,
        ..AofConfig::new(dir.path().join("appendonly.aof"))
    };

    let db = Database::open(&config).unwrap();
    for i in 0..500 {
        exec(&db, &["SET", &format!("k{}", i), "v"]);
    }
    db.close();

    assert_eq!(read_log(&config.path).len(), 500);
}

#[test]
fn paused_writer_drains_after_release() {
    let dir = tempfile::tempdir().unwrap();
    let config = AofConfig::new(dir.path().join("appendonly.aof"));

    let db = Database::open(&config).unwrap();
    let aof = db.aof().unwrap();

    let pause = aof.pause();
    for i in 0..100 {
        exec(&db, &["SET", &format!("k{}", i), "v"]);
    }
    thread::sleep(Duration::from_millis(50));
    assert_eq!(aof.appended(), 0);
    assert_eq!(std::fs::metadata(&config.path).unwrap().len(), 0);
    drop(pause);

    db.close();
    assert_eq!(aof.appended(), 100);
    assert_eq!(read_log(&config.path).len(), 100);
}

#[test]
fn bounded_replay_applies_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("appendonly.aof");

    let db = Database::open(&AofConfig::new(&path)).unwrap();
    for i in 0..10 {
        exec(&db, &["SET", &format!("k{}", i), "v"]);
    }
    db.close();
    drop(db);

    let frames = read_log(&path);
    let prefix: usize = frames[..3].iter().map(|f| f.to_bytes().len()).sum();

    // Three whole records plus a few bytes of the fourth
    let config = AofConfig {
        load_max_bytes: Some(prefix as u64 + 4),
        ..AofConfig::new(&path)
    };
    let report = quillkv::aof::load(&Database::new(), &path, config.load_max_bytes).unwrap();
    assert_eq!(report.applied, 3);
    assert_eq!(report.stop, LoadStop::ByteLimit);

    let bounded = Database::open(&config).unwrap();
    assert_eq!(bounded.len(), 3);
    assert!(value(&bounded, "k2").is_some());
    assert!(value(&bounded, "k3").is_none());
}

#[test]
fn replay_stops_at_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("appendonly.aof");

    let mut contents = Frame::from_parts(["SET", "before", "1"]).to_bytes();
    contents.extend_from_slice(b"*x\r\n");
    contents.extend(Frame::from_parts(["SET", "after", "2"]).to_bytes());
    std::fs::write(&path, contents).unwrap();

    let db = Database::open(&AofConfig::new(&path)).unwrap();
    assert_eq!(value(&db, "before"), Some(Bytes::from("1")));
    assert_eq!(value(&db, "after"), None);
}
