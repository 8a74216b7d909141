//! Error types for nostr-sync wire handling.

use thiserror::Error;

/// Errors raised while decoding or encoding protocol data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON serialization or parsing failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame was valid JSON but not a well-formed protocol array
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Frame label is not one we understand
    #[error("unknown frame type: {0}")]
    UnknownFrame(String),

    /// Hex string could not be decoded
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// Decoded value had the wrong byte length
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Expected number of bytes.
        expected: usize,
        /// Actual number of bytes.
        actual: usize,
    },

    /// Event content did not have the shape its kind requires
    #[error("malformed content: {0}")]
    MalformedContent(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::UnknownFrame("AUTH".into());
        assert_eq!(err.to_string(), "unknown frame type: AUTH");

        let err = ProtocolError::InvalidLength {
            expected: 32,
            actual: 3,
        };
        assert_eq!(err.to_string(), "invalid length: expected 32 bytes, got 3");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProtocolError>();
    }
}
