//! Types for the acquisition orchestrator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::discovery::{DiscoveryEvent, ResultItem, SearchOutcome, SearchQuery};
use crate::preparation::{JobId, JobState, PoolError, PoolPhase, PreparationJob, ValidationError};

/// Errors returned by orchestrator commands.
///
/// Network failures are never returned here; they arrive as [`Notification`]s.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    /// Caught locally; nothing was sent.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("search query must not be empty")]
    EmptyQuery,

    #[error("no acquisition in progress")]
    NoActivePool,

    #[error("pool error: {0}")]
    Pool(PoolError),

    #[error("orchestrator has shut down")]
    Closed,
}

impl From<PoolError> for OrchestratorError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Validation(v) => OrchestratorError::Validation(v),
            other => OrchestratorError::Pool(other),
        }
    }
}

/// Pushed to the UI as things happen.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    SearchStarted {
        query: SearchQuery,
    },
    /// Transient per-mirror status; not accumulated.
    SearchProgress {
        query: SearchQuery,
        event: DiscoveryEvent,
    },
    SearchFinished {
        query: SearchQuery,
        outcome: SearchOutcome,
    },
    PreparationStarted {
        items: usize,
    },
    /// Every job is ready (or degraded); names can be edited.
    PoolReady {
        timed_out: bool,
    },
    /// Some selected items could not be prepared.
    SubmissionWarnings {
        errors: Vec<String>,
    },
    /// Nothing could be prepared; the dialog is closed.
    PreparationFailed {
        message: String,
    },
    /// The commit was rejected; the dialog stays open for retry.
    CommitFailed {
        message: String,
    },
    AcquisitionStarted {
        ids: Vec<JobId>,
    },
}

/// Status of the current search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Idle,
    Searching,
    Found,
    NoResults,
    ConnectionError,
}

impl From<&SearchOutcome> for SearchStatus {
    fn from(outcome: &SearchOutcome) -> Self {
        match outcome {
            SearchOutcome::Found(_) => SearchStatus::Found,
            SearchOutcome::NoResults { .. } => SearchStatus::NoResults,
            SearchOutcome::ConnectionError { .. } => SearchStatus::ConnectionError,
        }
    }
}

/// One job as shown in the acquisition dialog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    pub slot: usize,
    pub id: Option<JobId>,
    pub state: JobState,
    pub resolved_name: String,
    pub edited_name: String,
    pub metadata_progress: f64,
    /// The id may belong to a different selected item; check the name.
    pub ambiguous: bool,
}

impl From<&PreparationJob> for JobView {
    fn from(job: &PreparationJob) -> Self {
        Self {
            slot: job.slot(),
            id: job.id(),
            state: job.state(),
            resolved_name: job.resolved_name().to_string(),
            edited_name: job.edited_name().to_string(),
            metadata_progress: job.metadata_progress(),
            ambiguous: job.is_ambiguous(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolSnapshot {
    pub phase: PoolPhase,
    /// When the selection was submitted.
    pub started_at: DateTime<Utc>,
    pub committing: bool,
    pub jobs: Vec<JobView>,
}

/// Point-in-time view of the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorSnapshot {
    pub query: Option<SearchQuery>,
    pub search: SearchStatus,
    pub results: Vec<ResultItem>,
    pub pool: Option<PoolSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_lifted() {
        let err: OrchestratorError = PoolError::Validation(ValidationError::EmptyNames(vec![0])).into();
        assert_eq!(
            err,
            OrchestratorError::Validation(ValidationError::EmptyNames(vec![0]))
        );

        let err: OrchestratorError = PoolError::CommitInFlight.into();
        assert_eq!(err.to_string(), "pool error: A commit is already in flight");
    }

    #[test]
    fn test_search_status_from_outcome() {
        assert_eq!(
            SearchStatus::from(&SearchOutcome::NoResults {
                message: "Nothing".into()
            }),
            SearchStatus::NoResults
        );
        assert_eq!(
            SearchStatus::from(&SearchOutcome::ConnectionError {
                message: "refused".into()
            }),
            SearchStatus::ConnectionError
        );
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = OrchestratorSnapshot {
            query: SearchQuery::new("ubuntu"),
            search: SearchStatus::Searching,
            results: vec![],
            pool: Some(PoolSnapshot {
                phase: PoolPhase::Loading,
                started_at: Utc::now(),
                committing: false,
                jobs: vec![],
            }),
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["query"], "ubuntu");
        assert_eq!(json["search"], "searching");
        assert_eq!(json["pool"]["phase"], "loading");
    }
}
