//! Background loops for continuous processing.

pub mod ingest_loop;
pub mod zone_refresh_loop;
