//! `storefront-core`: shared building blocks of the shop lifecycle engine.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the error taxonomy, the status-machine contract and the small
//! value objects and query types every lifecycle shares.

pub mod entity;
pub mod error;
pub mod id;
pub mod query;
pub mod status;
pub mod value_object;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{EntityId, UserId};
pub use query::{Pagination, SortOrder, TimeRange};
pub use status::{StatusMachine, Transition};
pub use value_object::{Currency, Price};
