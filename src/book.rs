//! Market data book - per-symbol depth ladders built from snapshot messages.
//!
//! Each MarketDataSnapshotFullRefresh (35=W) replaces both sides of the
//! symbol's book wholesale; readers never observe entries of two snapshots
//! mixed. Quantities are cumulative, so an executable price for a target
//! quantity falls out of piecewise-linear interpolation over the ladder.

use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::codec::{FixMessage, field};
use crate::core::types::{MdEntryType, PriceLevel, Symbol};

/// One side of a symbol's book, in message order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DepthLadder {
    points: Vec<PriceLevel>,
}

impl DepthLadder {
    pub fn new(points: Vec<PriceLevel>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[PriceLevel] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Piecewise-linear price for a cumulative quantity.
    ///
    /// Below the first point the ladder extrapolates along its first
    /// segment. At or beyond the last point there is no visible depth left
    /// to price against, and the answer is `None` rather than a guess.
    pub fn price_for_quantity(&self, quantity: Decimal) -> Option<Decimal> {
        let first = self.points.first()?;
        let last = self.points.last()?;

        if quantity >= last.quantity {
            return None;
        }
        if quantity <= first.quantity {
            if quantity == first.quantity {
                return Some(first.price);
            }
            let Some(second) = self.points.get(1) else {
                return Some(first.price);
            };
            if second.quantity == first.quantity {
                return Some(first.price);
            }
            let slope = (second.price - first.price) / (second.quantity - first.quantity);
            return Some(first.price + slope * (quantity - first.quantity));
        }

        for pair in self.points.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if quantity < b.quantity {
                if b.quantity == a.quantity {
                    return Some(a.price);
                }
                let slope = (b.price - a.price) / (b.quantity - a.quantity);
                return Some(a.price + slope * (quantity - a.quantity));
            }
        }
        None
    }
}

#[derive(Debug, Default)]
struct SymbolBook {
    bids: DepthLadder,
    offers: DepthLadder,
}

/// All symbols' ladders, shared between the session receive loop and callers.
#[derive(Debug, Default)]
pub struct MarketDataBook {
    books: RwLock<HashMap<Symbol, SymbolBook>>,
    skipped_entries: AtomicU64,
}

impl MarketDataBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a full refresh snapshot. Returns the symbol it updated, or
    /// `None` when the message is missing the fields that identify one.
    ///
    /// NoMDEntries (268) declares exactly N group entries and all N are
    /// read, bounded by the entries physically present in the frame.
    /// Entries with an unknown side or unparsable numbers are skipped
    /// with a warning; they do not poison the rest of the snapshot.
    pub fn apply_snapshot(&self, msg: &FixMessage) -> Option<Symbol> {
        let Some(symbol) = msg.get(field::SYMBOL) else {
            warn!("snapshot without Symbol (55): {}", msg);
            return None;
        };
        let symbol = Symbol::new(symbol);
        let Some(declared) = msg.get_u64(field::NO_MD_ENTRIES) else {
            warn!("snapshot without NoMDEntries (268): {}", msg);
            return None;
        };
        // 268 is peer input; bound the walk by the entries actually present.
        let present = msg.count(field::MD_ENTRY_TYPE) as u64;
        if declared > present {
            warn!("{}: snapshot declares {} entries but carries {}", symbol, declared, present);
        }
        let count = declared.min(present);

        let mut bids = Vec::new();
        let mut offers = Vec::new();
        for i in 1..=count as usize {
            let side = msg
                .get_nth(field::MD_ENTRY_TYPE, i)
                .and_then(MdEntryType::from_fix);
            let quantity = msg
                .get_nth(field::MD_ENTRY_SIZE, i)
                .and_then(|v| v.parse::<Decimal>().ok());
            let price = msg
                .get_nth(field::MD_ENTRY_PX, i)
                .and_then(|v| v.parse::<Decimal>().ok());

            match (side, quantity, price) {
                (Some(MdEntryType::Bid), Some(quantity), Some(price)) => {
                    bids.push(PriceLevel { price, quantity });
                }
                (Some(MdEntryType::Offer), Some(quantity), Some(price)) => {
                    offers.push(PriceLevel { price, quantity });
                }
                _ => {
                    self.skipped_entries.fetch_add(1, Ordering::Relaxed);
                    warn!("{}: skipping snapshot entry {} with missing or unknown fields", symbol, i);
                }
            }
        }

        debug!("{}: snapshot applied, {} bids / {} offers", symbol, bids.len(), offers.len());
        self.replace(symbol.clone(), DepthLadder::new(bids), DepthLadder::new(offers));
        Some(symbol)
    }

    /// Swap in both ladders for a symbol under a single write lock.
    pub fn replace(&self, symbol: Symbol, bids: DepthLadder, offers: DepthLadder) {
        self.books
            .write()
            .insert(symbol, SymbolBook { bids, offers });
    }

    pub fn bid_for_quantity(&self, symbol: &Symbol, quantity: Decimal) -> Option<Decimal> {
        self.books
            .read()
            .get(symbol)?
            .bids
            .price_for_quantity(quantity)
    }

    pub fn offer_for_quantity(&self, symbol: &Symbol, quantity: Decimal) -> Option<Decimal> {
        self.books
            .read()
            .get(symbol)?
            .offers
            .price_for_quantity(quantity)
    }

    /// Cloned snapshot of one ladder, for diagnostics and tests.
    pub fn ladder(&self, symbol: &Symbol, side: MdEntryType) -> Option<DepthLadder> {
        let books = self.books.read();
        let book = books.get(symbol)?;
        Some(match side {
            MdEntryType::Bid => book.bids.clone(),
            MdEntryType::Offer => book.offers.clone(),
        })
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.books.read().keys().cloned().collect()
    }

    /// Snapshot entries dropped for an unknown side or unparsable numbers.
    pub fn skipped_entries(&self) -> u64 {
        self.skipped_entries.load(Ordering::Relaxed)
    }
}
