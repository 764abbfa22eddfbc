//! Infrastructure layer: configuration, persistence, external collaborators,
//! lifecycle services and the reconciliation scheduler.

pub mod config;
pub mod db;
pub mod error;
pub mod external;
pub mod jobs;
pub mod lifecycle;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::ShopConfig;
pub use error::{LifecycleError, LifecycleResult, PublicError};
pub use lifecycle::{Backends, Services};
