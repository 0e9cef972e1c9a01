//! `forgepos-core`: shared building blocks for the POS terminal.
//!
//! Identifiers and the domain error type. No IO lives here.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{RequestId, TableId, TransactionId};
