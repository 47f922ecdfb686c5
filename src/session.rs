//! Session - FIX connection lifecycle, sequencing, and inbound dispatch.
//!
//! A [`FixSession`] owns one connection to one counterparty. `start` dials
//! the connector, sends the logon, and spawns a receive loop that feeds
//! every inbound message to the shared book and order tracker. Outbound
//! traffic goes through a single mutex-guarded writer so sequence number
//! assignment and the write itself cannot interleave between callers.

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::book::MarketDataBook;
use crate::codec::{FixMessage, FixParser, MsgType, field};
use crate::core::config::SessionConfig;
use crate::core::types::{MdEntryType, Side, Symbol};
use crate::core::{Error, Result};
use crate::orders::{OrderRequest, OrderTracker};
use crate::transport::{Connector, TransportWrite};

const LOGON_POLL: Duration = Duration::from_millis(500);

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    /// Logon sent, waiting for the counterparty to acknowledge.
    AwaitingLogon,
    LoggedOn,
    /// The counterparty sent a Logout; a close after this is clean.
    LoggedOut,
}

/// Writer half plus the next outbound MsgSeqNum, guarded together.
struct Outbound {
    writer: Box<dyn TransportWrite>,
    next_seq: u64,
}

/// One FIX session: connection, receive loop, and outbound sequencing.
pub struct FixSession {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    book: Arc<MarketDataBook>,
    orders: Arc<OrderTracker>,
    state: Arc<RwLock<SessionState>>,
    running: Arc<AtomicBool>,
    logged_on: Arc<AtomicBool>,
    outbound: Arc<tokio::sync::Mutex<Option<Outbound>>>,
    decode_errors: Arc<AtomicU64>,
    md_request_seq: AtomicU64,
    task: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl FixSession {
    pub fn new(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            book: Arc::new(MarketDataBook::new()),
            orders: Arc::new(OrderTracker::new()),
            state: Arc::new(RwLock::new(SessionState::Disconnected)),
            running: Arc::new(AtomicBool::new(false)),
            logged_on: Arc::new(AtomicBool::new(false)),
            outbound: Arc::new(tokio::sync::Mutex::new(None)),
            decode_errors: Arc::new(AtomicU64::new(0)),
            md_request_seq: AtomicU64::new(0),
            task: Mutex::new(None),
        }
    }

    /// Connect, log on, and spawn the receive loop.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::Session("session already started".to_string()));
        }
        let receive_loop = ReceiveLoop {
            config: self.config.clone(),
            connector: Arc::clone(&self.connector),
            book: Arc::clone(&self.book),
            orders: Arc::clone(&self.orders),
            state: Arc::clone(&self.state),
            running: Arc::clone(&self.running),
            logged_on: Arc::clone(&self.logged_on),
            outbound: Arc::clone(&self.outbound),
            decode_errors: Arc::clone(&self.decode_errors),
        };
        *self.task.lock() = Some(tokio::spawn(receive_loop.run()));
        Ok(())
    }

    /// Poll until the counterparty acknowledges the logon, up to `grace`.
    pub async fn wait_logged_on(&self, grace: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if self.logged_on.load(Ordering::SeqCst) {
                return Ok(());
            }
            if !self.running.load(Ordering::SeqCst) {
                return Err(Error::Session("session ended before logon".to_string()));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(Error::LogonTimeout {
                    target: self.config.target_comp_id.clone(),
                    waited: grace,
                });
            }
            tokio::time::sleep(LOGON_POLL.min(deadline - now)).await;
        }
    }

    /// Stop the receive loop, join it, and close the connection. Returns
    /// the loop's outcome, so a peer disconnect surfaces here.
    pub async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.task.lock().take();
        let result = match handle {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => Err(Error::Session(format!("receive loop panicked: {e}"))),
            },
            None => Ok(()),
        };
        if let Some(mut outbound) = self.outbound.lock().await.take() {
            let _ = outbound.writer.close().await;
        }
        info!("Session with {} stopped", self.config.target_comp_id);
        result
    }

    /// Subscribe to full-book snapshots for `symbols`. Returns the MDReqID
    /// so callers can correlate, though snapshots are keyed by symbol.
    pub async fn send_market_data_request(&self, symbols: &[Symbol]) -> Result<String> {
        let request_id = format!("MDID{}", self.md_request_seq.fetch_add(1, Ordering::Relaxed));
        send_message(&self.outbound, &self.config, MsgType::MarketDataRequest, |msg| {
            msg.push(field::MD_REQ_ID, &request_id);
            msg.push(field::SUBSCRIPTION_REQUEST_TYPE, "1");
            msg.push(field::MARKET_DEPTH, "0");
            msg.push(field::MD_UPDATE_TYPE, "0");
            msg.push(field::NO_MD_ENTRY_TYPES, "2");
            msg.push(field::MD_ENTRY_TYPE, MdEntryType::Bid.fix_code());
            msg.push(field::MD_ENTRY_TYPE, MdEntryType::Offer.fix_code());
            msg.push(field::NO_RELATED_SYM, symbols.len());
            for symbol in symbols {
                msg.push(field::SYMBOL, symbol.as_str());
            }
        })
        .await?;
        info!("Market data request {} sent for {} symbols", request_id, symbols.len());
        Ok(request_id)
    }

    /// Register and send an order. Returns the MsgSeqNum it went out with.
    pub async fn place_order(&self, request: OrderRequest) -> Result<u64> {
        self.orders.register(&request);
        let seq = send_message(&self.outbound, &self.config, MsgType::NewOrderSingle, |msg| {
            request.append_fields(msg);
        })
        .await?;
        info!(
            "Order {} sent: {} {} {}",
            request.clordid, request.side, request.quantity, request.symbol
        );
        Ok(seq)
    }

    pub async fn place_market(
        &self,
        clordid: impl Into<String>,
        symbol: Symbol,
        side: Side,
        quantity: Decimal,
    ) -> Result<u64> {
        self.place_order(OrderRequest::market(clordid, symbol, side, quantity))
            .await
    }

    pub async fn place_limit_fok(
        &self,
        clordid: impl Into<String>,
        symbol: Symbol,
        side: Side,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<u64> {
        self.place_order(OrderRequest::limit_fok(clordid, symbol, side, quantity, price))
            .await
    }

    pub fn book(&self) -> Arc<MarketDataBook> {
        Arc::clone(&self.book)
    }

    pub fn orders(&self) -> Arc<OrderTracker> {
        Arc::clone(&self.orders)
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_logged_on(&self) -> bool {
        self.logged_on.load(Ordering::SeqCst)
    }

    /// Frames dropped by the parser since the session started.
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    pub fn bid_for_quantity(&self, symbol: &Symbol, quantity: Decimal) -> Option<Decimal> {
        self.book.bid_for_quantity(symbol, quantity)
    }

    pub fn offer_for_quantity(&self, symbol: &Symbol, quantity: Decimal) -> Option<Decimal> {
        self.book.offer_for_quantity(symbol, quantity)
    }
}

/// Assign the next sequence number and write the message, atomically with
/// respect to other senders. The counter only advances after a successful
/// write.
async fn send_message(
    outbound: &tokio::sync::Mutex<Option<Outbound>>,
    config: &SessionConfig,
    msg_type: MsgType,
    body: impl FnOnce(&mut FixMessage),
) -> Result<u64> {
    let mut guard = outbound.lock().await;
    let out = guard.as_mut().ok_or(Error::NotRunning)?;

    let seq = out.next_seq;
    let mut msg = FixMessage::with_header(
        msg_type,
        &config.sender_comp_id,
        &config.target_comp_id,
        seq,
    );
    body(&mut msg);
    let bytes = msg.encode()?;
    out.writer.send_bytes(&bytes).await?;
    out.next_seq += 1;

    // Not the full message: a logon body carries the password.
    debug!("Sent {} seq={}", msg_type, seq);
    Ok(seq)
}

/// The spawned half of a session. Owns the read half and the parser, and
/// shares everything else with the [`FixSession`] that spawned it.
struct ReceiveLoop {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    book: Arc<MarketDataBook>,
    orders: Arc<OrderTracker>,
    state: Arc<RwLock<SessionState>>,
    running: Arc<AtomicBool>,
    logged_on: Arc<AtomicBool>,
    outbound: Arc<tokio::sync::Mutex<Option<Outbound>>>,
    decode_errors: Arc<AtomicU64>,
}

impl ReceiveLoop {
    async fn run(self) -> Result<()> {
        let result = self.session_loop().await;
        self.running.store(false, Ordering::SeqCst);
        self.logged_on.store(false, Ordering::SeqCst);
        {
            let mut state = self.state.write();
            if *state != SessionState::LoggedOut {
                *state = SessionState::Disconnected;
            }
        }
        if let Err(e) = &result {
            warn!("Session with {} ended: {}", self.config.target_comp_id, e);
        }
        result
    }

    async fn session_loop(&self) -> Result<()> {
        *self.state.write() = SessionState::Connecting;
        let (mut read, write) = self
            .connector
            .connect(&self.config.host, self.config.port)
            .await?;
        *self.outbound.lock().await = Some(Outbound { writer: write, next_seq: 1 });

        let config = &self.config;
        send_message(&self.outbound, config, MsgType::Logon, |msg| {
            msg.push(field::ENCRYPT_METHOD, "0");
            msg.push(field::HEART_BT_INT, config.heartbeat_secs);
            msg.push(field::RESET_SEQ_NUM_FLAG, "Y");
            msg.push(field::USERNAME, &config.credentials.username);
            msg.push(field::PASSWORD, config.credentials.password());
        })
        .await?;
        *self.state.write() = SessionState::AwaitingLogon;
        info!("Logon sent to {}, awaiting acknowledgement", config.target_comp_id);

        let mut parser = FixParser::new();
        while self.running.load(Ordering::SeqCst) {
            match read.recv_bytes(self.config.read_timeout).await {
                Ok(Some(bytes)) => {
                    parser.append_bytes(&bytes);
                    self.drain(&mut parser);
                }
                // Idle interval, nothing arrived.
                Ok(None) => continue,
                Err(Error::Disconnected) => {
                    let logged_out = *self.state.read() == SessionState::LoggedOut;
                    if logged_out || !self.running.load(Ordering::SeqCst) {
                        debug!("Connection closed after logout");
                        return Ok(());
                    }
                    return Err(Error::Disconnected);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Pull every complete frame out of the parser. A frame that fails to
    /// decode is counted and dropped; the connection stays up.
    fn drain(&self, parser: &mut FixParser) {
        loop {
            match parser.next_message() {
                Ok(Some(msg)) => self.dispatch(&msg),
                Ok(None) => break,
                Err(e) => {
                    self.decode_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("Dropping undecodable data: {}", e);
                }
            }
        }
    }

    fn dispatch(&self, msg: &FixMessage) {
        debug!("Received: {}", msg);
        match msg.msg_type() {
            Some(MsgType::Logon) => {
                self.logged_on.store(true, Ordering::SeqCst);
                *self.state.write() = SessionState::LoggedOn;
                info!("Logon acknowledged by {}", self.config.target_comp_id);
            }
            Some(MsgType::Logout) => {
                self.logged_on.store(false, Ordering::SeqCst);
                *self.state.write() = SessionState::LoggedOut;
                info!(
                    "Logout from {}: {}",
                    self.config.target_comp_id,
                    msg.get(field::TEXT).unwrap_or("no reason given")
                );
            }
            Some(MsgType::MarketDataSnapshot) => {
                self.book.apply_snapshot(msg);
            }
            Some(MsgType::ExecutionReport) => {
                self.orders.apply_execution(msg);
            }
            _ => {
                debug!("Ignoring message type {}", msg.raw_msg_type().unwrap_or("?"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Credentials;
    use crate::transport::MemoryConnector;

    fn test_config() -> SessionConfig {
        SessionConfig {
            host: "localhost".to_string(),
            port: 0,
            sender_comp_id: "CLIENT".to_string(),
            target_comp_id: "EXCH_MDATA".to_string(),
            credentials: Credentials::new("user", "pass"),
            heartbeat_secs: 60,
            read_timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn sending_before_start_is_not_running() {
        let (connector, _far_read, _far_write) = MemoryConnector::pair(1024);
        let session = FixSession::new(test_config(), Arc::new(connector));

        let result = session
            .send_market_data_request(&[Symbol::new("BTC-USD")])
            .await;
        assert!(matches!(result, Err(Error::NotRunning)));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn starting_twice_is_rejected() {
        let (connector, _far_read, _far_write) = MemoryConnector::pair(1024);
        let session = FixSession::new(test_config(), Arc::new(connector));

        session.start().unwrap();
        assert!(session.start().is_err());
        let _ = session.stop().await;
    }
}
