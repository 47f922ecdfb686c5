//! Core module - shared types, configuration, and error handling

pub mod config;
pub mod error;
pub mod types;

pub use self::config::{Config, Credentials, SessionConfig};
pub use self::error::{Error, Result};
pub use self::types::*;
