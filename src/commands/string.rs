//! String Commands
//!
//! - `GET key`
//! - `SET key value [NX|XX] [EX seconds|PX milliseconds]`
//! - `PEXPIREAT key epoch-ms`
//!
//! `SET` with a TTL is logged as a plain `SET` followed by a `PEXPIREAT` carrying
//! the absolute deadline, so replaying the log later reproduces the same expiry
//! instant instead of restarting the countdown.

use crate::commands::error::{CommandError, CommandResult};
use crate::db::{Database, Entity};
use crate::protocol::{Frame, RespValue};
use bytes::Bytes;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const SET: &[u8] = b"SET";
const PEXPIREAT: &[u8] = b"PEXPIREAT";

/// Which precondition a `SET` must meet before writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Policy {
    /// Write unconditionally
    #[default]
    Upsert,
    /// `NX`: only if the key is absent
    Insert,
    /// `XX`: only if the key exists
    Update,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct SetOptions {
    policy: Policy,
    ttl: Option<Duration>,
}

impl SetOptions {
    /// Scans the options after `key value`, left to right.
    fn parse(args: &[Bytes]) -> Result<Self, CommandError> {
        let mut options = SetOptions::default();
        let mut i = 0;

        while i < args.len() {
            let opt = args[i].to_ascii_uppercase();
            match opt.as_slice() {
                b"NX" => {
                    if options.policy == Policy::Update {
                        return Err(CommandError::Syntax);
                    }
                    options.policy = Policy::Insert;
                }
                b"XX" => {
                    if options.policy == Policy::Insert {
                        return Err(CommandError::Syntax);
                    }
                    options.policy = Policy::Update;
                }
                b"EX" | b"PX" => {
                    if options.ttl.is_some() {
                        return Err(CommandError::Syntax);
                    }
                    i += 1;
                    let amount = args
                        .get(i)
                        .and_then(|arg| parse_i64(arg))
                        .ok_or(CommandError::Syntax)?;
                    if amount <= 0 {
                        return Err(CommandError::InvalidExpire("set"));
                    }
                    let ttl = if opt.as_slice() == b"EX" {
                        (amount as u64)
                            .checked_mul(1000)
                            .map(Duration::from_millis)
                            .ok_or(CommandError::InvalidExpire("set"))?
                    } else {
                        Duration::from_millis(amount as u64)
                    };
                    options.ttl = Some(ttl);
                }
                _ => return Err(CommandError::Syntax),
            }
            i += 1;
        }

        Ok(options)
    }
}

/// GET key
pub fn get(db: &Database, args: &[Bytes]) -> CommandResult {
    if args.len() != 1 {
        return Err(CommandError::WrongArgCount("get"));
    }

    match db.get(&args[0]) {
        Some(entity) => entity
            .as_string()
            .cloned()
            .map(RespValue::bulk_string)
            .ok_or(CommandError::WrongType),
        None => Ok(RespValue::null()),
    }
}

/// SET key value [NX|XX] [EX seconds|PX milliseconds]
pub fn set(db: &Database, args: &[Bytes]) -> CommandResult {
    if args.len() < 2 {
        return Err(CommandError::WrongArgCount("set"));
    }

    let key = args[0].clone();
    let value = args[1].clone();
    let options = SetOptions::parse(&args[2..])?;

    let expires_at = match options.ttl {
        Some(ttl) => Some(
            SystemTime::now()
                .checked_add(ttl)
                .ok_or(CommandError::InvalidExpire("set"))?,
        ),
        None => None,
    };

    // Any previous TTL is dropped whether or not the write goes through
    db.persist(&key);

    let entity = Entity::String(value.clone());
    let changed = match options.policy {
        Policy::Upsert => db.put(key.clone(), entity),
        Policy::Insert => db.put_if_absent(key.clone(), entity),
        Policy::Update => db.put_if_exists(key.clone(), entity),
    };

    if changed == 0 {
        return Ok(RespValue::null());
    }

    match expires_at {
        Some(at) => {
            db.expire(key.clone(), at);
            db.add_to_log(Frame::new(vec![Bytes::from_static(SET), key.clone(), value]));
            db.add_to_log(pexpireat_frame(key, at));
        }
        None => {
            let mut frame = Vec::with_capacity(args.len() + 1);
            frame.push(Bytes::from_static(SET));
            frame.extend_from_slice(args);
            db.add_to_log(Frame::new(frame));
        }
    }

    Ok(RespValue::ok())
}

/// PEXPIREAT key epoch-ms
///
/// Sets an absolute expiry on an existing key. This is what the log records in
/// place of relative TTLs.
pub fn pexpireat(db: &Database, args: &[Bytes]) -> CommandResult {
    if args.len() != 2 {
        return Err(CommandError::WrongArgCount("pexpireat"));
    }

    let epoch_ms = parse_i64(&args[1]).ok_or(CommandError::NotAnInteger)?;
    if db.get(&args[0]).is_none() {
        return Ok(RespValue::integer(0));
    }

    let at = UNIX_EPOCH + Duration::from_millis(epoch_ms.max(0) as u64);
    db.expire(args[0].clone(), at);
    db.add_to_log(Frame::new(vec![
        Bytes::from_static(PEXPIREAT),
        args[0].clone(),
        args[1].clone(),
    ]));

    Ok(RespValue::integer(1))
}

/// Builds the `PEXPIREAT key <epoch-ms>` record for an absolute deadline.
fn pexpireat_frame(key: Bytes, at: SystemTime) -> Frame {
    let epoch_ms = at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    Frame::new(vec![
        Bytes::from_static(PEXPIREAT),
        key,
        Bytes::from(epoch_ms.to_string()),
    ])
}

fn parse_i64(arg: &[u8]) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}
