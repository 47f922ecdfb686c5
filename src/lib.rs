//! Fixline - Core Library
//! FIX 4.4 session client for market data and order entry
//!
//! A session logs on with username/password credentials, subscribes to
//! full-book snapshots, places orders, and tracks execution reports.
//! Heartbeat/TestRequest exchange, resend requests, and automatic
//! reconnection are out of scope; counterparties that enforce heartbeats
//! will eventually time an idle session out.

// Public modules
pub mod book;
pub mod codec;
pub mod core;
pub mod orders;
pub mod session;
pub mod transport;

// Re-exports
pub use crate::book::{DepthLadder, MarketDataBook};
pub use crate::codec::{FixMessage, FixParser, MsgType};
pub use crate::core::types::{MdEntryType, PriceLevel, Side, Symbol, TimeInForce};
pub use crate::core::{Config, Credentials, Error, Result};
pub use crate::orders::{OrderKind, OrderRequest, OrderState, OrderTracker};
pub use crate::session::{FixSession, SessionState};
pub use crate::transport::{Connector, MemoryConnector, TlsConnector};
