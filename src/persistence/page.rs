//! Opaque page tokens
//!
//! A page token seals a single int64 offset (the last first-event-id or
//! node id handed out). Empty means "start" on input and "no more pages"
//! on output.

use crate::persistence::error::HistoryError;

/// Serialize an offset into an opaque token
pub fn serialize_page_token(offset: i64) -> Vec<u8> {
    offset.to_string().into_bytes()
}

/// Recover the offset sealed in a token
pub fn deserialize_page_token(token: &[u8]) -> Result<i64, HistoryError> {
    std::str::from_utf8(token)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or_else(|| HistoryError::InvalidRequest(format!("invalid page token {:?}", token)))
}
