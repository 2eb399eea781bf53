//! Preparation of selected items.
//!
//! A selected handle is first added to the download service in a paused,
//! metadata-only state. Once its name is known (or the pool gives up waiting),
//! the user can edit names and commit the whole batch in one call.

mod http;
mod job;
mod pool;
mod types;

pub use http::HttpPreparationClient;
pub use job::{fallback_name, JobError, JobState, PreparationJob};
pub use pool::{JobPool, PoolEffect, PoolError, PoolEvent, PoolPhase, ValidationError};
pub use types::*;
