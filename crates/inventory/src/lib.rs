//! Inventory domain module.
//!
//! Sellable units of a product and the status machine that guards who may
//! hold them. Pure domain logic (no IO, no storage).

pub mod item;

pub use item::{Item, ItemId, ItemStatus};
