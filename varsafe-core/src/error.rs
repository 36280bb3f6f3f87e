use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::scope::ScopeParseError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
    #[error("unsupported config version {0} (expected 1)")]
    UnsupportedVersion(u32),
    #[error("invalid key pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
    #[error("invalid scope {value:?} in policy rule: {source}")]
    InvalidScope {
        value: String,
        source: ScopeParseError,
    },
    #[error("invalid mode {0:?}: expected off, warn or strict")]
    InvalidMode(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
