//! Acquisition orchestrator.
//!
//! Ties one discovery stream and one preparation pool together behind the
//! calls a UI makes:
//! - **Search**: one stream at a time; a new query replaces the old one
//! - **Selection**: a single item or a batch becomes a `JobPool`
//! - **Commit**: one finalize call for the whole pool

mod config;
mod runner;
mod types;

pub use config::OrchestratorConfig;
pub use runner::AcquisitionOrchestrator;
pub use types::{
    JobView, Notification, OrchestratorError, OrchestratorSnapshot, PoolSnapshot, SearchStatus,
};
