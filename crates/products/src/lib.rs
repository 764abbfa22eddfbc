//! Product catalog domain module.
//!
//! The catalog is read-only from the lifecycle engine's point of view: it
//! supplies prices, names and subscription periods.

pub mod product;

pub use product::{Product, ProductId, ProductKind};
