//! Core types - strong typing for the FIX value domains this client speaks

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Tradeable instrument (e.g. "BTC-USD")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order side, tag 54
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn fix_code(&self) -> &'static str {
        match self {
            Side::Buy => "1",
            Side::Sell => "2",
        }
    }

    pub fn from_fix(code: &str) -> Option<Self> {
        match code {
            "1" => Some(Side::Buy),
            "2" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Time in force, tag 59
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    Day,
    GoodTillCancel,
    ImmediateOrCancel,
    FillOrKill,
}

impl TimeInForce {
    pub fn fix_code(&self) -> &'static str {
        match self {
            TimeInForce::Day => "0",
            TimeInForce::GoodTillCancel => "1",
            TimeInForce::ImmediateOrCancel => "3",
            TimeInForce::FillOrKill => "4",
        }
    }

    pub fn from_fix(code: &str) -> Option<Self> {
        match code {
            "0" => Some(TimeInForce::Day),
            "1" => Some(TimeInForce::GoodTillCancel),
            "3" => Some(TimeInForce::ImmediateOrCancel),
            "4" => Some(TimeInForce::FillOrKill),
            _ => None,
        }
    }
}

/// Market data entry side, tag 269
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MdEntryType {
    Bid,
    Offer,
}

impl MdEntryType {
    pub fn fix_code(&self) -> &'static str {
        match self {
            MdEntryType::Bid => "0",
            MdEntryType::Offer => "1",
        }
    }

    pub fn from_fix(code: &str) -> Option<Self> {
        match code {
            "0" => Some(MdEntryType::Bid),
            "1" => Some(MdEntryType::Offer),
            _ => None,
        }
    }
}

/// One depth level. Quantities are cumulative from the top of the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}
