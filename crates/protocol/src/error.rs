//! Protocol error types

use thiserror::Error;

/// Errors raised while decoding a command frame
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame is not exactly the expected size
    #[error("Invalid frame length: expected {expected} bytes, got {actual}")]
    FrameLength { expected: usize, actual: usize },

    /// The four leading bytes are not the message header
    #[error("Invalid message header: {0:02x?}")]
    InvalidHeader([u8; 4]),

    /// Opcode byte is not one this crate knows how to build
    #[error("Unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::FrameLength {
            expected: 9,
            actual: 4,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("expected 9"));
        assert!(msg.contains("got 4"));
    }

    #[test]
    fn test_unknown_opcode_display() {
        let msg = ProtocolError::UnknownOpcode(0xe5).to_string();
        assert!(msg.contains("0xe5"));
    }
}
