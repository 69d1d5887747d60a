//! Error types for protocol encoding and validation.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding, decoding or validating protocol values.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The `iv:authTag:ciphertext` string could not be parsed.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// CBOR encoding failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// CBOR or JSON decoding failed.
    #[error("decode error: {0}")]
    Decode(String),

    /// Bundle checksum does not match its items.
    #[error("checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        /// Checksum recorded in the bundle.
        expected: String,
        /// Checksum computed over the bundle items.
        actual: String,
    },

    /// Bundle was written by an unknown format version.
    #[error("unsupported bundle format version {0}")]
    UnsupportedBundleVersion(u32),
}

impl ProtocolError {
    /// Creates a malformed payload error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedPayload(message.into())
    }
}
