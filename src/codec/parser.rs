//! Incremental FIX frame parser.
//!
//! Owns a growing byte buffer. Callers append raw transport bytes and drain
//! complete messages in a loop. A partial frame returns `Ok(None)` without
//! consuming anything; a malformed frame is consumed together with its
//! error, so the caller can drop the frame and keep the session alive.

use thiserror::Error;

use crate::codec::field::{self, SOH};
use crate::codec::message::FixMessage;

/// Frames start with BeginString; anything before it is noise.
const FRAME_START: &[u8] = b"8=FIX";

/// "10=" plus three digits plus SOH.
const TRAILER_LEN: usize = 7;

/// Upper bound on a plausible BodyLength for this client's traffic.
const MAX_BODY_LENGTH: usize = 1 << 20;

/// Wire decoding errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("discarded {0} bytes before a frame start")]
    Desync(usize),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("BodyLength {declared} does not frame a CheckSum trailer")]
    BadBodyLength { declared: usize },

    #[error("CheckSum mismatch: computed {computed:03}, received {received}")]
    ChecksumMismatch { computed: u32, received: String },

    #[error("frame has no MsgType (35)")]
    MissingMsgType,
}

/// Incremental parser over a byte stream of FIX frames.
#[derive(Debug, Default)]
pub struct FixParser {
    buf: Vec<u8>,
}

impl FixParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Try to extract the next complete message.
    ///
    /// `Ok(None)` means the buffer holds no complete frame yet. Errors have
    /// already consumed the offending bytes, so calling again continues at
    /// the next frame.
    pub fn next_message(&mut self) -> Result<Option<FixMessage>, DecodeError> {
        let Some(start) = find(&self.buf, FRAME_START) else {
            return self.keep_possible_prefix();
        };
        if start > 0 {
            self.buf.drain(..start);
            return Err(DecodeError::Desync(start));
        }

        // BeginString field
        let Some(begin_end) = find_byte(&self.buf, SOH) else {
            if self.buf.len() > 32 {
                let n = self.buf.len();
                self.buf.clear();
                return Err(DecodeError::Malformed(format!(
                    "unterminated BeginString after {} bytes",
                    n
                )));
            }
            return Ok(None);
        };

        // BodyLength must be the second field
        let rest = &self.buf[begin_end + 1..];
        if !rest.starts_with(b"9=") {
            if rest.len() < 2 {
                return Ok(None);
            }
            self.buf.drain(..begin_end + 1);
            return Err(DecodeError::Malformed(
                "BodyLength (9) must follow BeginString".to_string(),
            ));
        }
        let Some(length_end) = find_byte(rest, SOH) else {
            if rest.len() > 32 {
                self.buf.drain(..begin_end + 1);
                return Err(DecodeError::Malformed(
                    "unterminated BodyLength".to_string(),
                ));
            }
            return Ok(None);
        };
        let declared: usize = match std::str::from_utf8(&rest[2..length_end])
            .ok()
            .and_then(|s| s.parse().ok())
        {
            Some(n) if n <= MAX_BODY_LENGTH => n,
            _ => {
                self.buf.drain(..begin_end + 1);
                return Err(DecodeError::Malformed(
                    "BodyLength is not a sane number".to_string(),
                ));
            }
        };

        let body_start = begin_end + 1 + length_end + 1;
        let body_end = body_start + declared;
        if self.buf.len() < body_end + TRAILER_LEN {
            return Ok(None);
        }

        // The declared length must land exactly on the trailer.
        let trailer = &self.buf[body_end..body_end + TRAILER_LEN];
        if !trailer.starts_with(b"10=") || trailer[TRAILER_LEN - 1] != SOH {
            self.buf.drain(..body_end);
            return Err(DecodeError::BadBodyLength { declared });
        }
        let received = String::from_utf8_lossy(&trailer[3..6]).into_owned();
        let Ok(declared_sum) = received.parse::<u32>() else {
            self.buf.drain(..body_end + TRAILER_LEN);
            return Err(DecodeError::Malformed(format!(
                "CheckSum is not numeric: {}",
                received
            )));
        };

        let computed = self.buf[..body_end]
            .iter()
            .map(|&b| u32::from(b))
            .sum::<u32>()
            % 256;
        if computed != declared_sum {
            self.buf.drain(..body_end + TRAILER_LEN);
            return Err(DecodeError::ChecksumMismatch { computed, received });
        }

        let frame: Vec<u8> = self.buf.drain(..body_end + TRAILER_LEN).collect();
        let msg = parse_fields(&frame)?;
        if msg.get(field::MSG_TYPE).is_none() {
            return Err(DecodeError::MissingMsgType);
        }
        Ok(Some(msg))
    }

    // No frame start anywhere: report the noise, keeping only the bytes that
    // could still turn out to be the start of the next frame.
    fn keep_possible_prefix(&mut self) -> Result<Option<FixMessage>, DecodeError> {
        let keep = FRAME_START.len() - 1;
        if self.buf.len() > keep {
            let discard = self.buf.len() - keep;
            self.buf.drain(..discard);
            return Err(DecodeError::Desync(discard));
        }
        Ok(None)
    }
}

fn parse_fields(frame: &[u8]) -> Result<FixMessage, DecodeError> {
    let mut msg = FixMessage::new();
    for part in frame.split(|&b| b == SOH) {
        if part.is_empty() {
            continue;
        }
        let Some(eq) = find_byte(part, b'=') else {
            return Err(DecodeError::Malformed(format!(
                "field without '=': {}",
                String::from_utf8_lossy(part)
            )));
        };
        let tag: u32 = match std::str::from_utf8(&part[..eq])
            .ok()
            .and_then(|s| s.parse().ok())
        {
            Some(tag) => tag,
            None => {
                return Err(DecodeError::Malformed(format!(
                    "non-numeric tag: {}",
                    String::from_utf8_lossy(&part[..eq])
                )));
            }
        };
        msg.push(tag, String::from_utf8_lossy(&part[eq + 1..]));
    }
    Ok(msg)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn find_byte(haystack: &[u8], byte: u8) -> Option<usize> {
    haystack.iter().position(|&b| b == byte)
}
