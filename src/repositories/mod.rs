//! Data access for the checkout core. Every function takes a generic
//! connection so it can run against the pool or inside a transaction.

pub mod cart;
pub mod catalog;
pub mod order_ledger;

pub use cart::{CartOwner, CartStore};
pub use catalog::{CatalogStore, StockRef};
pub use order_ledger::{OrderFilter, OrderLedger};
