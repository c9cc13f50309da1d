// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmexec contributors
//
// Key/value configuration. The on-disk format is one `key: value` pair per
// line; blank lines and `#` comments are skipped, later duplicates win.
// Loaded once at startup, read-only thereafter.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use log::warn;

use crate::error::{Error, Result};

/// Parsed key/value lookup consumed read-only by the core.
#[derive(Debug, Default, Clone)]
pub struct Config {
    values: HashMap<String, String>,
}

impl Config {
    /// Parse `key: value` lines.
    pub fn parse(text: &str) -> Result<Self> {
        let mut values = HashMap::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once(':').ok_or_else(|| {
                Error::InvalidArgument(format!("config line {}: missing ':'", lineno + 1))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "config line {}: empty key",
                    lineno + 1
                )));
            }
            values.insert(key.to_string(), value.trim().to_string());
        }
        Ok(Self { values })
    }

    /// Load `path`, or an empty lookup when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!("config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(err) => Err(Error::InvalidArgument(format!(
                "cannot read {}: {err}",
                path.display()
            ))),
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(v) => v.parse::<i64>().map(Some).map_err(|_| {
                Error::InvalidArgument(format!("config key {key:?}: {v:?} is not an integer"))
            }),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.values.get(key).map(String::as_str) {
            None => Ok(None),
            Some("1") | Some("true") | Some("yes") => Ok(Some(true)),
            Some("0") | Some("false") | Some("no") => Ok(Some(false)),
            Some(v) => Err(Error::InvalidArgument(format!(
                "config key {key:?}: {v:?} is not a boolean"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Typed views
// ---------------------------------------------------------------------------

/// Server-side settings from `./conf/server.yml`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Admission ring capacity.
    pub slots: usize,
    /// Byte cap per response payload; negative means unlimited.
    pub response_limit: i64,
    /// Response send deadline in seconds; 0 means infinite.
    pub res_timeout: u64,
    /// Detach into the background at startup.
    pub daemon: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            slots: 4,
            response_limit: -1,
            res_timeout: 5,
            daemon: false,
        }
    }
}

impl ServerConfig {
    pub const PATH: &'static str = "./conf/server.yml";

    pub fn load(path: &Path) -> Result<Self> {
        let cfg = Config::load(path)?;
        let defaults = Self::default();
        let slots = match cfg.get_i64("slots")? {
            None => defaults.slots,
            Some(n) if n >= 1 => n as usize,
            Some(n) => {
                return Err(Error::InvalidArgument(format!(
                    "config key \"slots\": {n} is less than 1"
                )))
            }
        };
        let response_limit = cfg.get_i64("response_limit")?.unwrap_or(defaults.response_limit);
        let res_timeout = match cfg.get_i64("res_timeout")? {
            None => defaults.res_timeout,
            Some(n) if n >= 0 => n as u64,
            Some(n) => {
                return Err(Error::InvalidArgument(format!(
                    "config key \"res_timeout\": {n} is negative"
                )))
            }
        };
        let daemon = cfg.get_bool("daemon")?.unwrap_or(defaults.daemon);
        Ok(Self {
            slots,
            response_limit,
            res_timeout,
            daemon,
        })
    }

    /// Response deadline as a duration; `None` means wait forever.
    pub fn response_deadline(&self) -> Option<Duration> {
        (self.res_timeout > 0).then(|| Duration::from_secs(self.res_timeout))
    }
}

/// Client-side settings from `./conf/client.yml`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Request send deadline in seconds; 0 means infinite.
    pub req_timeout: u64,
    /// Response receive deadline in seconds; 0 means infinite.
    pub res_timeout: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            req_timeout: 5,
            res_timeout: 5,
        }
    }
}

impl ClientConfig {
    pub const PATH: &'static str = "./conf/client.yml";

    pub fn load(path: &Path) -> Result<Self> {
        let cfg = Config::load(path)?;
        let defaults = Self::default();
        let get = |key: &str, default: u64| -> Result<u64> {
            match cfg.get_i64(key)? {
                None => Ok(default),
                Some(n) if n >= 0 => Ok(n as u64),
                Some(n) => Err(Error::InvalidArgument(format!(
                    "config key {key:?}: {n} is negative"
                ))),
            }
        };
        Ok(Self {
            req_timeout: get("req_timeout", defaults.req_timeout)?,
            res_timeout: get("res_timeout", defaults.res_timeout)?,
        })
    }

    pub fn request_deadline(&self) -> Option<Duration> {
        (self.req_timeout > 0).then(|| Duration::from_secs(self.req_timeout))
    }

    pub fn response_deadline(&self) -> Option<Duration> {
        (self.res_timeout > 0).then(|| Duration::from_secs(self.res_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_basic_pairs() {
        let cfg = Config::parse("slots: 8\nresponse_limit: -1\n").unwrap();
        assert_eq!(cfg.get_i64("slots").unwrap(), Some(8));
        assert_eq!(cfg.get_i64("response_limit").unwrap(), Some(-1));
        assert_eq!(cfg.get_i64("missing").unwrap(), None);
    }

    #[test]
    fn parse_skips_blank_and_comments() {
        let cfg = Config::parse("# server settings\n\n  daemon: 1\n").unwrap();
        assert_eq!(cfg.get_bool("daemon").unwrap(), Some(true));
    }

    #[test]
    fn parse_last_duplicate_wins() {
        let cfg = Config::parse("slots: 2\nslots: 9\n").unwrap();
        assert_eq!(cfg.get_i64("slots").unwrap(), Some(9));
    }

    #[test]
    fn parse_rejects_line_without_colon() {
        assert!(Config::parse("slots 4\n").is_err());
    }

    #[test]
    fn bool_values() {
        let cfg = Config::parse("a: true\nb: no\nc: maybe\n").unwrap();
        assert_eq!(cfg.get_bool("a").unwrap(), Some(true));
        assert_eq!(cfg.get_bool("b").unwrap(), Some(false));
        assert!(cfg.get_bool("c").is_err());
    }

    #[test]
    fn value_with_spaces_is_trimmed() {
        let cfg = Config::parse("res_timeout:   5   \n").unwrap();
        assert_eq!(cfg.get_i64("res_timeout").unwrap(), Some(5));
    }
}
