//! Sales orders domain module.
//!
//! An order commits a customer to one reserved inventory item. This crate
//! holds the order record, its status machine and the list filters. Pure
//! domain logic (no IO, no storage).

pub mod order;

pub use order::{Order, OrderFilter, OrderId, OrderListRequest, OrderProduct, OrderStatus, OrderView};
