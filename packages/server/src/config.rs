//! Configuration for the Waiter server.
//!
//! Raw settings live in a flat [`Properties`] store loaded from
//! `key=value` files; components read the keys they care about during
//! `setup()`. [`ServerConfig`] is the typed view used by the server
//! component.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors raised while loading or interpreting configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read properties file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid value '{value}' for '{key}'")]
    InvalidValue { key: String, value: String },
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

/// Flat string key/value settings.
///
/// The file format is the usual properties layout: one `key=value` (or
/// `key: value`) per line, `#` and `!` start comment lines, blank lines are
/// ignored. Keys and values are trimmed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

impl Properties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses properties from text. Lines without a separator are read as a
    /// key with an empty value.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut properties = Self::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = match line.find(['=', ':']) {
                Some(at) => (&line[..at], &line[at + 1..]),
                None => (line, ""),
            };
            properties.set(key.trim(), value.trim());
        }
        properties
    }

    /// Reads and parses a properties file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&text))
    }

    /// Copies every entry of `other` into `self`, overriding existing keys.
    pub fn merge(&mut self, other: Properties) {
        self.entries.extend(other.entries);
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Parses the value under `key`, or returns `default` if it is absent.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the value does not parse.
    pub fn parse_or<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.to_string(),
            }),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

pub const HOST_KEY: &str = "server.host";
pub const PORT_KEY: &str = "server.port";
pub const MAX_READ_SIZE_KEY: &str = "server.max-read-size.kb";
pub const MAX_INDIVIDUAL_READ_SIZE_KEY: &str = "server.max-individual-read-size.kb";
pub const WORKER_THREADS_KEY: &str = "server.worker-threads";
pub const DRAIN_TIMEOUT_KEY: &str = "server.drain-timeout.secs";

/// Typed settings of the server component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Bind address for the listener.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Largest accepted frame, in kilobytes.
    pub max_frame_kb: usize,
    /// Largest single socket read, in kilobytes.
    pub max_read_chunk_kb: usize,
    /// Worker pool size for async procedures.
    pub worker_threads: usize,
    /// How long `stop()` waits for open connections to finish.
    pub drain_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 6666,
            max_frame_kb: 1024,
            max_read_chunk_kb: 1,
            worker_threads: std::thread::available_parallelism()
                .map_or(1, std::num::NonZeroUsize::get),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Builds the config from properties, falling back to defaults per key.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for unparsable numbers and for
    /// zero sizes.
    pub fn from_properties(properties: &Properties) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            host: properties.get_or(HOST_KEY, &defaults.host).to_string(),
            port: properties.parse_or(PORT_KEY, defaults.port)?,
            max_frame_kb: non_zero(properties, MAX_READ_SIZE_KEY, defaults.max_frame_kb)?,
            max_read_chunk_kb: non_zero(
                properties,
                MAX_INDIVIDUAL_READ_SIZE_KEY,
                defaults.max_read_chunk_kb,
            )?,
            worker_threads: non_zero(properties, WORKER_THREADS_KEY, defaults.worker_threads)?,
            drain_timeout: Duration::from_secs(
                properties.parse_or(DRAIN_TIMEOUT_KEY, defaults.drain_timeout.as_secs())?,
            ),
        };
        Ok(config)
    }

    /// `host:port` string for binding.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_kb.saturating_mul(1024)
    }

    #[must_use]
    pub fn max_read_chunk_bytes(&self) -> usize {
        self.max_read_chunk_kb.saturating_mul(1024)
    }
}

fn non_zero(properties: &Properties, key: &str, default: usize) -> Result<usize, ConfigError> {
    match properties.parse_or(key, default)? {
        0 => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: "0".to_string(),
        }),
        n => Ok(n),
    }
}
