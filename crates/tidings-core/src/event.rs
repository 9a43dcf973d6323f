//! Decoded event payloads.
//!
//! The channel does not interpret payloads. A frame is either a valid JSON
//! document, which becomes an [`Event`], or it is dropped.

use thiserror::Error;

/// A decoded event as delivered to listeners.
pub type Event = serde_json::Value;

/// Reasons a frame could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame carried no data.
    #[error("Empty frame")]
    Empty,

    /// The frame is not valid JSON.
    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode a raw frame (text or binary) into an event.
///
/// # Errors
///
/// Returns an error if the frame is blank or not a JSON document.
pub fn decode(raw: &[u8]) -> Result<Event, DecodeError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(DecodeError::Empty);
    }
    Ok(serde_json::from_slice(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_object() {
        let event = decode(br#"{"type":"approval.updated","id":7}"#).unwrap();
        assert_eq!(event, json!({"type": "approval.updated", "id": 7}));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode(b"{not json"), Err(DecodeError::Json(_))));
        assert!(matches!(decode(b"\xff\xfe"), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_decode_rejects_blank() {
        assert!(matches!(decode(b""), Err(DecodeError::Empty)));
        assert!(matches!(decode(b"  \n"), Err(DecodeError::Empty)));
    }
}
