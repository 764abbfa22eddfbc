//! Subscriptions domain module.

pub mod subscription;

pub use subscription::{Subscription, SubscriptionFilter, SubscriptionId, SubscriptionState};
