//! Authoritative drone state.

pub mod store;

pub use store::{DroneStore, DroneUpdate, StoreError};
