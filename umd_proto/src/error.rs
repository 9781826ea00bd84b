//! Codec errors.

use alloc::vec::Vec;

/// Errors raised while parsing received packets.
///
/// Every variant carries the bytes that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Fewer than 6 bytes were available for the message header.
    #[error("invalid header length: {bytes:02x?}")]
    HeaderLength { bytes: Vec<u8> },
    /// The packet byte count (`PBC`) exceeds the received data, or is too
    /// small to cover the rest of the header.
    #[error("invalid byte count, expected {expected}, got {actual}")]
    ByteCountMismatch {
        expected: usize,
        actual: usize,
        bytes: Vec<u8>,
    },
    /// Fewer than 4 bytes were available for a display's index and control word.
    #[error("invalid display header length: {bytes:02x?}")]
    DisplayHeaderLength { bytes: Vec<u8> },
    /// Fewer than 2 bytes were available for a display's text length field.
    #[error("invalid text length field: {bytes:02x?}")]
    TextLengthField { bytes: Vec<u8> },
    /// The display text is shorter than its length field says.
    #[error("invalid text bytes, expected {expected}, got {actual}")]
    TextBytesMismatch {
        expected: usize,
        actual: usize,
        bytes: Vec<u8>,
    },
    /// The display text is not valid UTF-8, or not valid UTF-16LE when the
    /// message's `UTF16` flag is set.
    #[error("undecodable text: {bytes:02x?}")]
    InvalidText { bytes: Vec<u8> },
    /// The control data length prefix is missing or exceeds the received data.
    #[error("unknown control data format: {bytes:02x?}")]
    ControlDataFormat { bytes: Vec<u8> },
}

impl ParseError {
    /// The bytes that could not be parsed.
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::HeaderLength { bytes }
            | Self::ByteCountMismatch { bytes, .. }
            | Self::DisplayHeaderLength { bytes }
            | Self::TextLengthField { bytes }
            | Self::TextBytesMismatch { bytes, .. }
            | Self::InvalidText { bytes }
            | Self::ControlDataFormat { bytes } => bytes,
        }
    }
}

/// Errors raised while constructing or encoding messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// The packet would exceed [`MAX_PACKET_LEN`](crate::MAX_PACKET_LEN) (or a
    /// length field would overflow), and it cannot be split any further.
    #[error("packet length {len} exceeds the maximum of {max} bytes", max = crate::MAX_PACKET_LEN)]
    PacketLength { len: usize },
    /// Both text and control data (or both displays and `SCONTROL` data) were given.
    #[error("text and control data are mutually exclusive")]
    MutualExclusion,
}
