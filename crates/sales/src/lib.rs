//! Per-table cart state for restaurant mode.
//!
//! Pure domain logic (no IO). Persistence goes through [`cart::encode`] and
//! [`cart::decode`]; the offline runtime stores the encoded bytes.

pub mod cart;

pub use cart::{CartLine, TableCart, TableCarts, decode, encode};
