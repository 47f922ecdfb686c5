//! FIX message representation and encoding.
//!
//! A [`FixMessage`] is an ordered list of `(tag, value)` pairs. Tags may
//! repeat (repeating groups), and insertion order is what goes on the wire.
//! BodyLength (9) and CheckSum (10) are derived at encode time; any
//! occurrences already present are ignored.

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::codec::field::{self, SOH};

/// Protocol version sent as BeginString (8).
pub const FIX_4_4: &str = "FIX.4.4";

/// Message types this client produces or consumes, tag 35.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Logon,
    Logout,
    MarketDataRequest,
    MarketDataSnapshot,
    NewOrderSingle,
    ExecutionReport,
}

impl MsgType {
    pub fn fix_code(&self) -> &'static str {
        match self {
            MsgType::Logon => "A",
            MsgType::Logout => "5",
            MsgType::MarketDataRequest => "V",
            MsgType::MarketDataSnapshot => "W",
            MsgType::NewOrderSingle => "D",
            MsgType::ExecutionReport => "8",
        }
    }

    pub fn from_fix(code: &str) -> Option<Self> {
        match code {
            "A" => Some(MsgType::Logon),
            "5" => Some(MsgType::Logout),
            "V" => Some(MsgType::MarketDataRequest),
            "W" => Some(MsgType::MarketDataSnapshot),
            "D" => Some(MsgType::NewOrderSingle),
            "8" => Some(MsgType::ExecutionReport),
            _ => None,
        }
    }
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MsgType::Logon => write!(f, "Logon"),
            MsgType::Logout => write!(f, "Logout"),
            MsgType::MarketDataRequest => write!(f, "MarketDataRequest"),
            MsgType::MarketDataSnapshot => write!(f, "MarketDataSnapshot"),
            MsgType::NewOrderSingle => write!(f, "NewOrderSingle"),
            MsgType::ExecutionReport => write!(f, "ExecutionReport"),
        }
    }
}

/// Message encoding errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("first field must be BeginString (8)")]
    MissingBeginString,
}

/// An ordered FIX message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FixMessage {
    fields: Vec<(u32, String)>,
}

impl FixMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a message with the standard header, tags 8, 35, 49, 56, 34, 52
    /// in that order. Every outbound message goes through this path.
    pub fn with_header(
        msg_type: MsgType,
        sender_comp_id: &str,
        target_comp_id: &str,
        msg_seq_num: u64,
    ) -> Self {
        let mut msg = Self::new();
        msg.push(field::BEGIN_STRING, FIX_4_4);
        msg.push(field::MSG_TYPE, msg_type.fix_code());
        msg.push(field::SENDER_COMP_ID, sender_comp_id);
        msg.push(field::TARGET_COMP_ID, target_comp_id);
        msg.push(field::MSG_SEQ_NUM, msg_seq_num);
        msg.push(field::SENDING_TIME, utc_timestamp());
        msg
    }

    pub fn push(&mut self, tag: u32, value: impl ToString) {
        self.fields.push((tag, value.to_string()));
    }

    pub fn fields(&self) -> &[(u32, String)] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// First value of `tag`, if present.
    pub fn get(&self, tag: u32) -> Option<&str> {
        self.get_nth(tag, 1)
    }

    /// Nth occurrence of `tag`, 1-indexed: `get_nth(tag, 1)` is the first.
    pub fn get_nth(&self, tag: u32, n: usize) -> Option<&str> {
        if n == 0 {
            return None;
        }
        self.fields
            .iter()
            .filter(|(t, _)| *t == tag)
            .nth(n - 1)
            .map(|(_, v)| v.as_str())
    }

    /// Number of occurrences of `tag`.
    pub fn count(&self, tag: u32) -> usize {
        self.fields.iter().filter(|(t, _)| *t == tag).count()
    }

    pub fn get_decimal(&self, tag: u32) -> Option<Decimal> {
        self.get(tag)?.parse().ok()
    }

    pub fn get_u64(&self, tag: u32) -> Option<u64> {
        self.get(tag)?.parse().ok()
    }

    pub fn msg_type(&self) -> Option<MsgType> {
        self.get(field::MSG_TYPE).and_then(MsgType::from_fix)
    }

    /// Raw tag 35 value, for logging messages of unknown type.
    pub fn raw_msg_type(&self) -> Option<&str> {
        self.get(field::MSG_TYPE)
    }

    /// Serialize to wire bytes.
    ///
    /// BodyLength (9) counts the bytes between the SOH terminating the 9
    /// field and the start of the 10 field. CheckSum (10) is the modulo-256
    /// sum of every preceding byte, zero-padded to three digits.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let (first_tag, begin_string) =
            self.fields.first().ok_or(EncodeError::MissingBeginString)?;
        if *first_tag != field::BEGIN_STRING {
            return Err(EncodeError::MissingBeginString);
        }

        let mut body = Vec::new();
        for (tag, value) in &self.fields[1..] {
            if *tag == field::BODY_LENGTH || *tag == field::CHECK_SUM {
                continue;
            }
            append_field(&mut body, *tag, value);
        }

        let mut out = Vec::with_capacity(body.len() + 32);
        append_field(&mut out, field::BEGIN_STRING, begin_string);
        append_field(&mut out, field::BODY_LENGTH, &body.len().to_string());
        out.extend_from_slice(&body);

        let checksum = out.iter().map(|&b| u32::from(b)).sum::<u32>() % 256;
        append_field(&mut out, field::CHECK_SUM, &format!("{:03}", checksum));

        Ok(out)
    }
}

fn append_field(out: &mut Vec<u8>, tag: u32, value: &str) {
    out.extend_from_slice(tag.to_string().as_bytes());
    out.push(b'=');
    out.extend_from_slice(value.as_bytes());
    out.push(SOH);
}

// Pipe-delimited rendering for logs; SOH never reaches a terminal.
impl std::fmt::Display for FixMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (tag, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, "|")?;
            }
            write!(f, "{}={}", tag, value)?;
        }
        Ok(())
    }
}

/// Current UTC time in FIX timestamp format, millisecond precision.
/// Used for SendingTime (52) and TransactTime (60).
pub fn utc_timestamp() -> String {
    Utc::now().format("%Y%m%d-%H:%M:%S%.3f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_derives_length_and_checksum() {
        let mut msg = FixMessage::new();
        msg.push(field::BEGIN_STRING, FIX_4_4);
        msg.push(field::MSG_TYPE, "A");

        // Body is "35=A" + SOH = 5 bytes; checksum verified by hand.
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes, b"8=FIX.4.4\x019=5\x0135=A\x0110=180\x01");
    }

    #[test]
    fn encode_without_begin_string_fails() {
        let mut msg = FixMessage::new();
        msg.push(field::MSG_TYPE, "A");
        assert_eq!(msg.encode(), Err(EncodeError::MissingBeginString));
        assert_eq!(FixMessage::new().encode(), Err(EncodeError::MissingBeginString));
    }

    #[test]
    fn encode_ignores_preexisting_derived_fields() {
        let mut msg = FixMessage::new();
        msg.push(field::BEGIN_STRING, FIX_4_4);
        msg.push(field::BODY_LENGTH, "999");
        msg.push(field::MSG_TYPE, "A");
        msg.push(field::CHECK_SUM, "000");

        let bytes = msg.encode().unwrap();
        assert_eq!(bytes, b"8=FIX.4.4\x019=5\x0135=A\x0110=180\x01");
    }

    #[test]
    fn header_field_order() {
        let msg = FixMessage::with_header(MsgType::Logon, "CLIENT", "EXTP_MDATA", 7);

        let tags: Vec<u32> = msg.fields().iter().map(|(t, _)| *t).collect();
        assert_eq!(tags, vec![8, 35, 49, 56, 34, 52]);
        assert_eq!(msg.get(field::BEGIN_STRING), Some(FIX_4_4));
        assert_eq!(msg.get(field::MSG_TYPE), Some("A"));
        assert_eq!(msg.get(field::SENDER_COMP_ID), Some("CLIENT"));
        assert_eq!(msg.get(field::TARGET_COMP_ID), Some("EXTP_MDATA"));
        assert_eq!(msg.get(field::MSG_SEQ_NUM), Some("7"));
        assert!(!msg.get(field::SENDING_TIME).unwrap().is_empty());
    }

    #[test]
    fn get_nth_is_one_indexed() {
        let mut msg = FixMessage::new();
        msg.push(field::MD_ENTRY_TYPE, "0");
        msg.push(field::MD_ENTRY_TYPE, "1");

        assert_eq!(msg.get_nth(field::MD_ENTRY_TYPE, 0), None);
        assert_eq!(msg.get_nth(field::MD_ENTRY_TYPE, 1), Some("0"));
        assert_eq!(msg.get_nth(field::MD_ENTRY_TYPE, 2), Some("1"));
        assert_eq!(msg.get_nth(field::MD_ENTRY_TYPE, 3), None);
        assert_eq!(msg.get(field::MD_ENTRY_TYPE), Some("0"));
        assert_eq!(msg.count(field::MD_ENTRY_TYPE), 2);
    }

    #[test]
    fn typed_getters() {
        let mut msg = FixMessage::new();
        msg.push(field::AVG_PX, "50000.0");
        msg.push(field::NO_MD_ENTRIES, "3");
        msg.push(field::TEXT, "not a number");

        assert_eq!(msg.get_decimal(field::AVG_PX), Some("50000.0".parse().unwrap()));
        assert_eq!(msg.get_u64(field::NO_MD_ENTRIES), Some(3));
        assert_eq!(msg.get_decimal(field::TEXT), None);
        assert_eq!(msg.get_u64(field::SYMBOL), None);
    }

    #[test]
    fn msg_type_codes_round_trip() {
        let all = [
            MsgType::Logon,
            MsgType::Logout,
            MsgType::MarketDataRequest,
            MsgType::MarketDataSnapshot,
            MsgType::NewOrderSingle,
            MsgType::ExecutionReport,
        ];
        for msg_type in all {
            assert_eq!(MsgType::from_fix(msg_type.fix_code()), Some(msg_type));
        }
        assert_eq!(MsgType::from_fix("3"), None);
    }

    #[test]
    fn display_uses_pipes() {
        let mut msg = FixMessage::new();
        msg.push(field::BEGIN_STRING, FIX_4_4);
        msg.push(field::MSG_TYPE, "A");
        msg.push(field::MSG_SEQ_NUM, "1");

        assert_eq!(msg.to_string(), "8=FIX.4.4|35=A|34=1");
    }

    #[test]
    fn timestamp_shape() {
        let ts = utc_timestamp();
        // YYYYMMDD-HH:MM:SS.mmm
        assert_eq!(ts.len(), 21);
        assert_eq!(&ts[8..9], "-");
        assert_eq!(&ts[11..12], ":");
        assert_eq!(&ts[14..15], ":");
        assert_eq!(&ts[17..18], ".");
    }
}
