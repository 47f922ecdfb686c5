//! Error handling - central error type for the session client

use std::time::Duration;
use thiserror::Error;

use crate::codec::{DecodeError, EncodeError};

pub type Result<T> = std::result::Result<T, Error>;

/// Fixline error hierarchy
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS setup or handshake errors
    #[error("TLS error: {0}")]
    Tls(String),

    /// Message encoding errors
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Wire decoding errors, when a caller treats them as fatal
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The counterparty closed the connection
    #[error("Connection closed by peer")]
    Disconnected,

    /// Logon was not acknowledged within the grace period
    #[error("Logon to {target} not acknowledged within {waited:?}")]
    LogonTimeout { target: String, waited: Duration },

    /// An operation requires a started session
    #[error("Session is not running")]
    NotRunning,

    /// Session lifecycle errors
    #[error("Session error: {0}")]
    Session(String),
}
