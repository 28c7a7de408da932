//! Classification and alerting.
//!
//! Submodules:
//! - `thresholds` — maps a reading to a status tier under a policy.
//! - `coordinator` — per-recipient edge-triggered dispatch decisions.
//! - `stalenesses` — decides when the latest reading is too old to show as live.

pub mod coordinator;
pub mod stalenesses;
pub mod thresholds;

pub use coordinator::{AlertCoordinator, AlertState, compose};
pub use stalenesses::is_stale_at;
