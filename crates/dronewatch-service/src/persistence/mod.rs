//! Persistence layer for the drone service.
//!
//! Provides SQLite-backed storage for drone state, observation history and
//! no-fly zone reference data. The in-memory store stays the read path;
//! every accepted message is written through here first.

pub mod db;
pub mod drones;
pub mod zones;

pub use db::{init_database, Database};
