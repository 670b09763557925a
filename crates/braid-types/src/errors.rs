//! Shared codec errors.

use thiserror::Error;

/// Errors raised while encoding or decoding chain objects.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A serialized value could not be decoded.
    #[error("decode failed: {0}")]
    Decode(#[from] bincode::Error),

    /// A receipt status field held bytes outside the two legal encodings.
    #[error("invalid receipt status bytes: {0}")]
    InvalidReceiptStatus(String),
}
