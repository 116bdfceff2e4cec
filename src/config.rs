//! Daemon configuration, read from the environment at startup.

use std::fmt;
use std::path::PathBuf;
use tracing::warn;
use zeroize::Zeroizing;

use crate::error::{MonitorError, MonitorResult};
use crate::scheduler::DUE_FLOOR_SECS;

pub const ENV_ENCRYPTION_KEY: &str = "APIWATCH_ENCRYPTION_KEY";
pub const ENV_DATA_DIR: &str = "APIWATCH_DATA_DIR";
pub const ENV_POLL_SECS: &str = "APIWATCH_POLL_SECS";

const DEFAULT_POLL_SECS: u64 = 30;

pub struct Config {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub socket_path: PathBuf,
    pub poll_secs: u64,
    /// Raw 32-byte vault key, wiped on drop.
    pub encryption_key: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("data_dir", &self.data_dir)
            .field("db_path", &self.db_path)
            .field("socket_path", &self.socket_path)
            .field("poll_secs", &self.poll_secs)
            .field("encryption_key", &"[REDACTED]")
            .finish()
    }
}

impl Config {
    pub fn from_env() -> MonitorResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Fails closed on a missing or
    /// malformed key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> MonitorResult<Self> {
        let key_hex = Zeroizing::new(lookup(ENV_ENCRYPTION_KEY).ok_or_else(|| {
            MonitorError::InvalidConfig(format!("{ENV_ENCRYPTION_KEY} is not set"))
        })?);
        let key_hex = key_hex.trim();
        if key_hex.len() != 64 {
            return Err(MonitorError::InvalidConfig(format!(
                "{ENV_ENCRYPTION_KEY} must be 64 hex characters, got {}",
                key_hex.len()
            )));
        }
        let encryption_key = Zeroizing::new(hex::decode(key_hex).map_err(|_| {
            MonitorError::InvalidConfig(format!("{ENV_ENCRYPTION_KEY} is not valid hex"))
        })?);

        let data_dir = match lookup(ENV_DATA_DIR).filter(|d| !d.trim().is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .ok_or_else(|| {
                    MonitorError::InvalidConfig(format!(
                        "cannot determine home directory; set {ENV_DATA_DIR}"
                    ))
                })?
                .join(".apiwatch"),
        };

        let poll_secs = match lookup(ENV_POLL_SECS) {
            None => DEFAULT_POLL_SECS,
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                MonitorError::InvalidConfig(format!("{ENV_POLL_SECS} must be a whole number of seconds"))
            })?,
        };
        let floor = DUE_FLOOR_SECS as u64;
        let poll_secs = if poll_secs < floor {
            warn!(requested = poll_secs, floor, "Poll interval below due floor, raising");
            floor
        } else {
            poll_secs
        };

        Ok(Self {
            db_path: data_dir.join("apiwatch.db"),
            socket_path: data_dir.join("apiwatch.sock"),
            data_dir,
            poll_secs,
            encryption_key,
        })
    }
}
