//! Errors raised by pure value logic (ids, carts, record decoding).

use thiserror::Error;

/// Result type used by the pure (non-IO) crates.
pub type DomainResult<T> = Result<T, DomainError>;

/// Deterministic failures only (validation, malformed ids, decode errors).
/// Storage and network failures belong to `forgepos-offline`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. zero quantity on a cart line).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A string did not parse as the expected identifier type.
    #[error("malformed identifier: {0}")]
    InvalidId(String),

    /// No line or record matched the given key.
    #[error("not found")]
    NotFound,

    /// A persisted document could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
