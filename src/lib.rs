//! DALOY canal monitoring service.
//!
//! Ingests upstream/downstream water levels from the canal sensor, classifies
//! each reading, emails the operator on status transitions, and keeps a
//! day-partitioned CSV journal plus a live snapshot for the dashboard.

pub mod alert;
pub mod config;
pub mod delivery;
pub mod ingest;
pub mod journal;
pub mod logging;
pub mod model;
pub mod monitor;
pub mod snapshot;
pub mod verify;
