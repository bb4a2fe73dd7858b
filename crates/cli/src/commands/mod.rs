//! Operator commands over the persisted cache.

pub mod purge;
pub mod stats;
