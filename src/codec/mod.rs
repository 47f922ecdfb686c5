//! FIX 4.4 wire codec - tag constants, message model, frame parser

pub mod field;
pub mod message;
pub mod parser;

pub use self::message::{EncodeError, FIX_4_4, FixMessage, MsgType, utc_timestamp};
pub use self::parser::{DecodeError, FixParser};
