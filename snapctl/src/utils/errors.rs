//! Error types for snapctl setup code.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CtlError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid object key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },
}

pub type Result<T> = std::result::Result<T, CtlError>;
