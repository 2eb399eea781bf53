//! Lifecycle of one selected item, from submission to commit.

use serde::Serialize;
use thiserror::Error;

use crate::discovery::DownloadHandle;

use super::{FinalizeEntry, JobId, PrepareStatus, PreparedDescriptor};

/// State of a preparation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Handle sent to the service, no descriptor yet.
    Submitted,
    /// Id known, waiting for metadata.
    Polling,
    Ready,
    /// Forced ready by the pool timeout with a fallback name.
    TimedOut,
    /// Commit call in flight.
    Finalizing,
    Finalized,
    Canceled,
}

impl JobState {
    /// Ready or degraded-ready: eligible for editing and commit.
    pub fn is_ready(&self) -> bool {
        matches!(self, JobState::Ready | JobState::TimedOut)
    }

    /// States from which `cancel` is accepted.
    pub fn is_cancelable(&self) -> bool {
        matches!(self, JobState::Submitted | JobState::Polling)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Finalized | JobState::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Submitted => "submitted",
            JobState::Polling => "polling",
            JobState::Ready => "ready",
            JobState::TimedOut => "timed_out",
            JobState::Finalizing => "finalizing",
            JobState::Finalized => "finalized",
            JobState::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("Cannot {action} a job in state {from}")]
    InvalidTransition {
        from: JobState,
        action: &'static str,
    },

    #[error("Job already has id {0}")]
    AlreadyAssigned(JobId),

    #[error("Status for id {got} does not belong to job {expected}")]
    IdMismatch { expected: JobId, got: JobId },

    #[error("Name must not be empty")]
    EmptyName,
}

/// Name used when metadata never arrived.
pub fn fallback_name(id: JobId) -> String {
    format!("Torrent {}", id)
}

/// One item being resolved into an editable descriptor.
///
/// `slot` is the item's position in the original selection and identifies the
/// job before the service has assigned an id.
#[derive(Debug, Clone)]
pub struct PreparationJob {
    slot: usize,
    handle: DownloadHandle,
    id: Option<JobId>,
    state: JobState,
    resolved_name: String,
    edited_name: String,
    metadata_progress: f64,
    timed_out: bool,
    /// Descriptor came from a partial batch and may belong to another handle.
    ambiguous: bool,
}

impl PreparationJob {
    pub fn new(slot: usize, handle: DownloadHandle) -> Self {
        Self {
            slot,
            handle,
            id: None,
            state: JobState::Submitted,
            resolved_name: String::new(),
            edited_name: String::new(),
            metadata_progress: 0.0,
            timed_out: false,
            ambiguous: false,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn handle(&self) -> &DownloadHandle {
        &self.handle
    }

    pub fn id(&self) -> Option<JobId> {
        self.id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn resolved_name(&self) -> &str {
        &self.resolved_name
    }

    pub fn edited_name(&self) -> &str {
        &self.edited_name
    }

    pub fn metadata_progress(&self) -> f64 {
        self.metadata_progress
    }

    pub fn is_ambiguous(&self) -> bool {
        self.ambiguous
    }

    pub fn mark_ambiguous(&mut self) {
        self.ambiguous = true;
    }

    fn invalid(&self, action: &'static str) -> JobError {
        JobError::InvalidTransition {
            from: self.state,
            action,
        }
    }

    fn resolve(&mut self, name: &str, state: JobState) {
        let id = self.id.unwrap_or_default();
        self.resolved_name = if name.trim().is_empty() {
            fallback_name(id)
        } else {
            name.to_string()
        };
        self.edited_name = self.resolved_name.clone();
        self.state = state;
    }

    /// Apply the descriptor returned by the submission call.
    ///
    /// The id is taken exactly once. Returns the new state (Ready or Polling).
    pub fn assign(&mut self, descriptor: &PreparedDescriptor) -> Result<JobState, JobError> {
        if let Some(id) = self.id {
            return Err(JobError::AlreadyAssigned(id));
        }
        if self.state != JobState::Submitted {
            return Err(self.invalid("assign"));
        }

        self.id = Some(descriptor.id);
        if descriptor.ready {
            self.metadata_progress = 1.0;
            self.resolve(&descriptor.name, JobState::Ready);
        } else {
            self.state = JobState::Polling;
        }
        Ok(self.state)
    }

    /// Apply a status check. Returns true if the job just became Ready.
    pub fn apply_poll(&mut self, status: &PrepareStatus) -> Result<bool, JobError> {
        if self.state != JobState::Polling {
            return Err(self.invalid("poll"));
        }
        let expected = self.id.unwrap_or_default();
        if status.id != expected {
            return Err(JobError::IdMismatch {
                expected,
                got: status.id,
            });
        }

        self.metadata_progress = status.metadata_progress.clamp(0.0, 1.0);
        if !status.ready {
            return Ok(false);
        }
        self.metadata_progress = 1.0;
        self.resolve(&status.name, JobState::Ready);
        Ok(true)
    }

    /// Degrade a still-polling job to ready with the fallback name.
    ///
    /// Returns false if the job was not polling.
    pub fn force_timeout(&mut self) -> bool {
        if self.state != JobState::Polling {
            return false;
        }
        self.timed_out = true;
        self.resolve("", JobState::TimedOut);
        true
    }

    /// Cancel the job. Only accepted while Submitted or Polling; anything else
    /// is a no-op returning false.
    pub fn cancel(&mut self) -> bool {
        if !self.state.is_cancelable() {
            return false;
        }
        self.state = JobState::Canceled;
        true
    }

    pub fn set_edited_name(&mut self, name: impl Into<String>) -> Result<(), JobError> {
        if !self.state.is_ready() {
            return Err(self.invalid("rename"));
        }
        self.edited_name = name.into();
        Ok(())
    }

    pub fn has_valid_name(&self) -> bool {
        !self.edited_name.trim().is_empty()
    }

    /// Move to Finalizing and produce this job's commit entry.
    ///
    /// A rename is only included when the edited name differs from the
    /// resolved one.
    pub fn begin_finalize(&mut self) -> Result<FinalizeEntry, JobError> {
        if !self.state.is_ready() {
            return Err(self.invalid("finalize"));
        }
        if !self.has_valid_name() {
            return Err(JobError::EmptyName);
        }
        let id = self.id.ok_or_else(|| self.invalid("finalize"))?;

        let new_name = (self.edited_name != self.resolved_name).then(|| self.edited_name.clone());
        self.state = JobState::Finalizing;
        Ok(FinalizeEntry { id, new_name })
    }

    pub fn finalize_succeeded(&mut self) -> Result<(), JobError> {
        if self.state != JobState::Finalizing {
            return Err(self.invalid("complete finalize of"));
        }
        self.state = JobState::Finalized;
        Ok(())
    }

    /// Return to the ready state the job had before the commit attempt.
    pub fn finalize_failed(&mut self) -> Result<(), JobError> {
        if self.state != JobState::Finalizing {
            return Err(self.invalid("fail finalize of"));
        }
        self.state = if self.timed_out {
            JobState::TimedOut
        } else {
            JobState::Ready
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn magnet() -> DownloadHandle {
        DownloadHandle::Magnet("magnet:?xt=urn:btih:abc".to_string())
    }

    fn status(id: JobId, ready: bool, name: &str) -> PrepareStatus {
        PrepareStatus {
            id,
            name: name.to_string(),
            ready,
            metadata_progress: if ready { 1.0 } else { 0.3 },
        }
    }

    fn polling_job(id: JobId) -> PreparationJob {
        let mut job = PreparationJob::new(0, magnet());
        job.assign(&PreparedDescriptor::pending(id)).unwrap();
        job
    }

    #[test]
    fn test_ready_descriptor_skips_polling() {
        let mut job = PreparationJob::new(0, magnet());
        let state = job.assign(&PreparedDescriptor::ready(3, "Ubuntu ISO")).unwrap();

        assert_eq!(state, JobState::Ready);
        assert_eq!(job.id(), Some(3));
        assert_eq!(job.edited_name(), "Ubuntu ISO");
    }

    #[test]
    fn test_id_assigned_once() {
        let mut job = polling_job(7);
        let err = job.assign(&PreparedDescriptor::ready(8, "Other")).unwrap_err();
        assert_eq!(err, JobError::AlreadyAssigned(7));
        assert_eq!(job.id(), Some(7));
    }

    #[test]
    fn test_single_item_flow() {
        let mut job = polling_job(7);
        assert_eq!(job.state(), JobState::Polling);

        assert!(!job.apply_poll(&status(7, false, "")).unwrap());
        assert!(!job.apply_poll(&status(7, false, "")).unwrap());
        assert_eq!(job.state(), JobState::Polling);

        assert!(job.apply_poll(&status(7, true, "Foo")).unwrap());
        assert_eq!(job.state(), JobState::Ready);
        assert_eq!(job.edited_name(), "Foo");

        let entry = job.begin_finalize().unwrap();
        assert_eq!(entry, FinalizeEntry { id: 7, new_name: None });
        job.finalize_succeeded().unwrap();
        assert_eq!(job.state(), JobState::Finalized);
    }

    #[test]
    fn test_poll_for_other_id_rejected() {
        let mut job = polling_job(7);
        assert_eq!(
            job.apply_poll(&status(9, true, "Wrong")),
            Err(JobError::IdMismatch { expected: 7, got: 9 })
        );
        assert_eq!(job.state(), JobState::Polling);
    }

    #[test]
    fn test_timeout_uses_fallback_name() {
        let mut job = polling_job(42);
        assert!(job.force_timeout());
        assert_eq!(job.state(), JobState::TimedOut);
        assert_eq!(job.edited_name(), "Torrent 42");
        assert!(job.state().is_ready());

        // Already degraded; a second timeout changes nothing.
        assert!(!job.force_timeout());
    }

    #[test]
    fn test_cancel_only_from_submitted_or_polling() {
        let mut submitted = PreparationJob::new(0, magnet());
        assert!(submitted.cancel());
        assert_eq!(submitted.state(), JobState::Canceled);

        let mut polling = polling_job(1);
        assert!(polling.cancel());
        assert_eq!(polling.state(), JobState::Canceled);

        let mut ready = PreparationJob::new(0, magnet());
        ready.assign(&PreparedDescriptor::ready(2, "Done")).unwrap();
        assert!(!ready.cancel());
        assert_eq!(ready.state(), JobState::Ready);
        assert_eq!(ready.edited_name(), "Done");

        ready.begin_finalize().unwrap();
        ready.finalize_succeeded().unwrap();
        assert!(!ready.cancel());
        assert_eq!(ready.state(), JobState::Finalized);
    }

    #[test]
    fn test_blank_name_blocks_finalize() {
        let mut job = PreparationJob::new(0, magnet());
        job.assign(&PreparedDescriptor::ready(5, "Name")).unwrap();
        job.set_edited_name("   ").unwrap();

        assert_eq!(job.begin_finalize(), Err(JobError::EmptyName));
        assert_eq!(job.state(), JobState::Ready);
    }

    #[test]
    fn test_rename_only_sent_when_changed() {
        let mut job = PreparationJob::new(0, magnet());
        job.assign(&PreparedDescriptor::ready(5, "Original")).unwrap();
        job.set_edited_name("Renamed").unwrap();

        let entry = job.begin_finalize().unwrap();
        assert_eq!(entry.new_name.as_deref(), Some("Renamed"));
    }

    #[test]
    fn test_failed_finalize_returns_to_prior_ready_state() {
        let mut job = PreparationJob::new(0, magnet());
        job.assign(&PreparedDescriptor::ready(5, "Name")).unwrap();
        job.begin_finalize().unwrap();
        job.finalize_failed().unwrap();
        assert_eq!(job.state(), JobState::Ready);

        let mut degraded = polling_job(6);
        degraded.force_timeout();
        degraded.begin_finalize().unwrap();
        degraded.finalize_failed().unwrap();
        assert_eq!(degraded.state(), JobState::TimedOut);
    }

    #[test]
    fn test_rename_rejected_before_ready() {
        let mut job = polling_job(1);
        assert!(matches!(
            job.set_edited_name("Early"),
            Err(JobError::InvalidTransition { from: JobState::Polling, .. })
        ));
    }
}
