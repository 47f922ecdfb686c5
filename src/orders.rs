//! Order entry - NewOrderSingle construction and execution report tracking.

use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::codec::{FixMessage, field, utc_timestamp};
use crate::core::types::{Side, Symbol, TimeInForce};

/// Order type plus the fields that only exist for that type.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderKind {
    Market,
    Limit {
        price: Decimal,
        time_in_force: TimeInForce,
    },
}

impl OrderKind {
    /// OrdType (40) code.
    pub fn fix_code(&self) -> &'static str {
        match self {
            OrderKind::Market => "1",
            OrderKind::Limit { .. } => "2",
        }
    }
}

/// Everything needed to emit one NewOrderSingle (35=D).
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub clordid: String,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
    pub kind: OrderKind,
}

impl OrderRequest {
    pub fn market(
        clordid: impl Into<String>,
        symbol: Symbol,
        side: Side,
        quantity: Decimal,
    ) -> Self {
        Self {
            clordid: clordid.into(),
            symbol,
            side,
            quantity,
            kind: OrderKind::Market,
        }
    }

    pub fn limit_fok(
        clordid: impl Into<String>,
        symbol: Symbol,
        side: Side,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            clordid: clordid.into(),
            symbol,
            side,
            quantity,
            kind: OrderKind::Limit {
                price,
                time_in_force: TimeInForce::FillOrKill,
            },
        }
    }

    /// Append the order body fields in wire order. Price and TimeInForce
    /// only appear on limit orders.
    pub fn append_fields(&self, msg: &mut FixMessage) {
        msg.push(field::CL_ORD_ID, &self.clordid);
        msg.push(field::SYMBOL, self.symbol.as_str());
        msg.push(field::SIDE, self.side.fix_code());
        msg.push(field::TRANSACT_TIME, utc_timestamp());
        msg.push(field::ORDER_QTY, self.quantity);
        msg.push(field::ORD_TYPE, self.kind.fix_code());
        if let OrderKind::Limit { price, time_in_force } = &self.kind {
            msg.push(field::PRICE, price);
            msg.push(field::TIME_IN_FORCE, time_in_force.fix_code());
        }
    }
}

/// Last known state of an order, keyed by ClOrdID.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderState {
    /// Written to the wire, no execution report yet.
    Sent,
    /// Acknowledged by the counterparty (39=0).
    New,
    /// Fully filled (39=2).
    Filled { avg_px: Option<Decimal> },
    /// Rejected (39=8), with Text (58) when the counterparty sent one.
    Rejected { reason: Option<String> },
    /// Any OrdStatus code this client does not model, kept verbatim.
    Other(String),
}

/// Shared map from ClOrdID to the latest execution state.
#[derive(Debug, Default)]
pub struct OrderTracker {
    orders: RwLock<HashMap<String, OrderState>>,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an order as sent before it goes on the wire, so a fast
    /// execution report never races an absent entry.
    pub fn register(&self, request: &OrderRequest) {
        self.orders
            .write()
            .insert(request.clordid.clone(), OrderState::Sent);
    }

    /// Apply an ExecutionReport (35=8). Returns the ClOrdID it updated.
    ///
    /// Reports for a ClOrdID this tracker never registered are recorded
    /// anyway; the counterparty's view wins.
    pub fn apply_execution(&self, msg: &FixMessage) -> Option<String> {
        let Some(clordid) = msg.get(field::CL_ORD_ID) else {
            warn!("execution report without ClOrdID (11): {}", msg);
            return None;
        };
        let Some(status) = msg.get(field::ORD_STATUS) else {
            warn!("execution report without OrdStatus (39): {}", msg);
            return None;
        };

        let state = match status {
            "0" => OrderState::New,
            "2" => OrderState::Filled {
                avg_px: msg.get_decimal(field::AVG_PX),
            },
            "8" => OrderState::Rejected {
                reason: msg.get(field::TEXT).map(str::to_string),
            },
            other => OrderState::Other(other.to_string()),
        };

        let order_id = msg.get(field::ORDER_ID).unwrap_or("?");
        info!("execution report {} / {}: {:?}", clordid, order_id, state);

        let clordid = clordid.to_string();
        let mut orders = self.orders.write();
        if !orders.contains_key(&clordid) {
            warn!("execution report for unknown ClOrdID {}", clordid);
        }
        orders.insert(clordid.clone(), state);
        Some(clordid)
    }

    pub fn status(&self, clordid: &str) -> Option<OrderState> {
        self.orders.read().get(clordid).cloned()
    }

    /// All tracked orders, sorted by ClOrdID for stable output.
    pub fn all(&self) -> Vec<(String, OrderState)> {
        let mut orders: Vec<_> = self
            .orders
            .read()
            .iter()
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect();
        orders.sort_by(|a, b| a.0.cmp(&b.0));
        orders
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn tags(msg: &FixMessage) -> Vec<u32> {
        msg.fields().iter().map(|(tag, _)| *tag).collect()
    }

    #[test]
    fn market_order_body_layout() {
        let request = OrderRequest::market("C1", Symbol::new("BTC-USD"), Side::Buy, dec("0.001"));
        let mut msg = FixMessage::new();
        request.append_fields(&mut msg);

        assert_eq!(
            tags(&msg),
            vec![
                field::CL_ORD_ID,
                field::SYMBOL,
                field::SIDE,
                field::TRANSACT_TIME,
                field::ORDER_QTY,
                field::ORD_TYPE,
            ]
        );
        assert_eq!(msg.get(field::SIDE), Some("1"));
        assert_eq!(msg.get(field::ORD_TYPE), Some("1"));
        assert_eq!(msg.get(field::ORDER_QTY), Some("0.001"));
        assert_eq!(msg.get(field::PRICE), None);
        assert_eq!(msg.get(field::TIME_IN_FORCE), None);
    }

    #[test]
    fn limit_fok_order_body_layout() {
        let request = OrderRequest::limit_fok(
            "C2",
            Symbol::new("ETH-USD"),
            Side::Sell,
            dec("0.001"),
            dec("2500.5"),
        );
        let mut msg = FixMessage::new();
        request.append_fields(&mut msg);

        assert_eq!(
            tags(&msg),
            vec![
                field::CL_ORD_ID,
                field::SYMBOL,
                field::SIDE,
                field::TRANSACT_TIME,
                field::ORDER_QTY,
                field::ORD_TYPE,
                field::PRICE,
                field::TIME_IN_FORCE,
            ]
        );
        assert_eq!(msg.get(field::SIDE), Some("2"));
        assert_eq!(msg.get(field::ORD_TYPE), Some("2"));
        assert_eq!(msg.get(field::PRICE), Some("2500.5"));
        assert_eq!(msg.get(field::TIME_IN_FORCE), Some("4"));
    }

    #[test]
    fn filled_report_records_average_price() {
        let tracker = OrderTracker::new();
        tracker.register(&OrderRequest::market(
            "X",
            Symbol::new("BTC-USD"),
            Side::Buy,
            dec("0.001"),
        ));
        assert_eq!(tracker.status("X"), Some(OrderState::Sent));

        let mut report = FixMessage::new();
        report.push(field::CL_ORD_ID, "X");
        report.push(field::ORDER_ID, "EX-1");
        report.push(field::ORD_STATUS, "2");
        report.push(field::AVG_PX, "50000.0");

        assert_eq!(tracker.apply_execution(&report), Some("X".to_string()));
        assert_eq!(
            tracker.status("X"),
            Some(OrderState::Filled { avg_px: Some(dec("50000.0")) })
        );
    }

    #[test]
    fn rejected_report_retains_reason_text() {
        let tracker = OrderTracker::new();
        let mut report = FixMessage::new();
        report.push(field::CL_ORD_ID, "Y");
        report.push(field::ORD_STATUS, "8");
        report.push(field::TEXT, "Insufficient funds");

        tracker.apply_execution(&report);
        assert_eq!(
            tracker.status("Y"),
            Some(OrderState::Rejected { reason: Some("Insufficient funds".to_string()) })
        );
    }

    #[test]
    fn report_for_unknown_order_is_recorded() {
        let tracker = OrderTracker::new();
        let mut report = FixMessage::new();
        report.push(field::CL_ORD_ID, "NEVER-SENT");
        report.push(field::ORD_STATUS, "0");

        assert_eq!(tracker.apply_execution(&report), Some("NEVER-SENT".to_string()));
        assert_eq!(tracker.status("NEVER-SENT"), Some(OrderState::New));
    }

    #[test]
    fn unmodeled_status_code_is_kept_verbatim() {
        let tracker = OrderTracker::new();
        let mut report = FixMessage::new();
        report.push(field::CL_ORD_ID, "Z");
        report.push(field::ORD_STATUS, "1");

        tracker.apply_execution(&report);
        assert_eq!(tracker.status("Z"), Some(OrderState::Other("1".to_string())));
    }

    #[test]
    fn report_without_status_changes_nothing() {
        let tracker = OrderTracker::new();
        tracker.register(&OrderRequest::market(
            "W",
            Symbol::new("BTC-USD"),
            Side::Sell,
            dec("0.001"),
        ));

        let mut report = FixMessage::new();
        report.push(field::CL_ORD_ID, "W");

        assert_eq!(tracker.apply_execution(&report), None);
        assert_eq!(tracker.status("W"), Some(OrderState::Sent));
    }
}
