//! Server configuration, parsed from the command line.

use crate::aof::{AofConfig, DEFAULT_FILENAME, DEFAULT_QUEUE_SIZE};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

const AFTER_HELP: &str = r#"EXAMPLES:
    quillkv                            # Start on 127.0.0.1:6379
    quillkv --port 6380                # Start on port 6380
    quillkv --appendonly no            # Memory only, no AOF

CONNECTING:
    Use redis-cli or any Redis client to connect:
    $ redis-cli -p 6379
    127.0.0.1:6379> SET name "Ariz" EX 60
    OK
    127.0.0.1:6379> GET name
    "Ariz"
"#;

/// quillkv - an in-memory key-value server with an append-only log
#[derive(Debug, Clone, Parser)]
#[command(name = "quillkv", author, version, about, after_help = AFTER_HELP)]
pub struct Config {
    /// Host to bind to
    #[arg(long, default_value = crate::DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = crate::DEFAULT_PORT)]
    pub port: u16,

    /// Record mutating commands to the append-only file and replay it on start
    #[arg(
        long,
        default_value = "yes",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
    )]
    pub appendonly: bool,

    /// Append-only file location
    #[arg(long, default_value = DEFAULT_FILENAME)]
    pub appendfilename: PathBuf,

    /// Frames the AOF queue holds before writers block
    #[arg(long, default_value_t = DEFAULT_QUEUE_SIZE)]
    pub aof_queue_size: usize,

    /// Replay at most this many bytes of the AOF on start (0 = all)
    #[arg(long, default_value_t = 0)]
    pub aof_load_max_bytes: u64,

    /// How long closing a connection waits for its in-flight reply
    #[arg(long, default_value_t = 10_000)]
    pub close_timeout_ms: u64,

    /// How long shutdown waits for all connections to finish
    #[arg(long, default_value_t = 30_000)]
    pub shutdown_timeout_ms: u64,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The AOF settings, or `None` when the AOF is disabled.
    pub fn aof_config(&self) -> Option<AofConfig> {
        if !self.appendonly {
            return None;
        }
        Some(AofConfig {
            path: self.appendfilename.clone(),
            queue_size: self.aof_queue_size,
            load_max_bytes: (self.aof_load_max_bytes > 0).then_some(self.aof_load_max_bytes),
        })
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["quillkv"]).unwrap();
        assert_eq!(config.bind_address(), "127.0.0.1:6379");
        assert_eq!(config.close_timeout(), Duration::from_secs(10));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.aof_config(), Some(AofConfig::default()));
    }

    #[test]
    fn test_overrides() {
        let config = Config::try_parse_from([
            "quillkv",
            "--host",
            "0.0.0.0",
            "-p",
            "6380",
            "--appendfilename",
            "/tmp/data.aof",
            "--aof-queue-size",
            "128",
            "--aof-load-max-bytes",
            "4096",
        ])
        .unwrap();

        assert_eq!(config.bind_address(), "0.0.0.0:6380");
        assert_eq!(
            config.aof_config(),
            Some(AofConfig {
                path: PathBuf::from("/tmp/data.aof"),
                queue_size: 128,
                load_max_bytes: Some(4096),
            })
        );
    }

    #[test]
    fn test_appendonly_off() {
        for value in ["no", "false", "off", "0"] {
            let config = Config::try_parse_from(["quillkv", "--appendonly", value]).unwrap();
            assert!(!config.appendonly);
            assert_eq!(config.aof_config(), None);
        }
    }

    #[test]
    fn test_rejects_bad_port() {
        assert!(Config::try_parse_from(["quillkv", "--port", "seventy"]).is_err());
    }
}
