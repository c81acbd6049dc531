//! Fixed-width wire codec
//!
//! Messages travel as fixed-length ASCII records so the receiver can frame by
//! read size alone: zero-padded decimal fields glued with a separator
//! character, followed by the NUL-padded body. No record terminator exists;
//! a short read is end-of-stream, not an error the session escalates.

use crate::error::RumorError;
use crate::message::{Body, Message, BODY_LEN};
use crate::peer::PeerId;

/// Field separator between the decimal header fields and the body.
pub const SEPARATOR: u8 = b'_';

/// Width of the sender and recipient fields in digits.
pub const ID_WIDTH: usize = 4;

/// Width of the creation-timestamp field in digits.
pub const TIMESTAMP_WIDTH: usize = 10;

/// Total record length: 4 + 1 + 4 + 1 + 10 + 1 + 256.
pub const RECORD_LEN: usize = ID_WIDTH + 1 + ID_WIDTH + 1 + TIMESTAMP_WIDTH + 1 + BODY_LEN;

/// Serialize a message into its fixed-length wire record.
///
/// Deterministic and exactly [`RECORD_LEN`] bytes; transmission metadata is
/// not part of the record.
pub fn encode(message: &Message) -> [u8; RECORD_LEN] {
    // Widths are fixed for the ID universe (4-digit IDs) and for Unix
    // timestamps until the year 2286.
    let header = format!(
        "{:04}{}{:04}{}{:010}{}",
        message.sender.0,
        SEPARATOR as char,
        message.recipient.0,
        SEPARATOR as char,
        message.created_at,
        SEPARATOR as char,
    );

    let mut record = [0u8; RECORD_LEN];
    let body_start = RECORD_LEN - BODY_LEN;
    // IDs wider than their field would shift the layout; clamp rather than
    // panic and let the receiver reject the malformed header.
    let header = header.as_bytes();
    let n = header.len().min(body_start);
    record[..n].copy_from_slice(&header[..n]);
    record[body_start..].copy_from_slice(message.body.as_bytes());
    record
}

/// Reconstruct a message from a wire record.
///
/// Rejects input shorter than [`RECORD_LEN`]. The returned message carries no
/// transmission metadata regardless of what the sender had recorded.
pub fn decode(record: &[u8]) -> Result<Message, RumorError> {
    if record.len() < RECORD_LEN {
        return Err(RumorError::frame("record too short", record.len()));
    }

    let mut fields = record[..RECORD_LEN].splitn(4, |&b| b == SEPARATOR);
    let sender = parse_field(fields.next(), record.len())?;
    let recipient = parse_field(fields.next(), record.len())?;
    let created_at: u64 = parse_field(fields.next(), record.len())?;
    let body = fields
        .next()
        .ok_or_else(|| RumorError::frame("missing body field", record.len()))?;

    Ok(Message::new(
        PeerId(sender),
        PeerId(recipient),
        created_at,
        Body::from_bytes(body),
    ))
}

fn parse_field<T: std::str::FromStr>(
    field: Option<&[u8]>,
    record_len: usize,
) -> Result<T, RumorError> {
    let bytes = field.ok_or_else(|| RumorError::frame("missing header field", record_len))?;
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| RumorError::frame("non-decimal header field", record_len))
}
