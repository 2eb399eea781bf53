//! Batch coordination over a set of preparation jobs.
//!
//! `JobPool` is a pure state machine: every transition returns the side
//! effects (network calls, timers) the owner must carry out. Results of those
//! effects are fed back through the `on_*` methods.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::discovery::DownloadHandle;

use super::job::{JobError, JobState, PreparationJob};
use super::{
    FinalizeReceipt, FinalizeRequest, JobId, MediaType, PrepareStatus, PreparationError,
    PreparedBatch,
};

/// Aggregate phase of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolPhase {
    /// At least one job is unresolved and the timeout has not fired.
    Loading,
    /// Every job is (possibly degraded) ready; names may be edited.
    Editing,
    Closed,
}

impl std::fmt::Display for PoolPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolPhase::Loading => write!(f, "loading"),
            PoolPhase::Editing => write!(f, "editing"),
            PoolPhase::Closed => write!(f, "closed"),
        }
    }
}

/// Something the pool's owner has to do.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEffect {
    /// Call the prepare endpoint for these handles; descriptors map to `slots` in order.
    Submit {
        slots: Vec<usize>,
        handles: Vec<DownloadHandle>,
    },
    StartPolling { slot: usize, id: JobId },
    StopPolling { slot: usize },
    /// Start the pool-wide deadline.
    ArmTimeout,
    DisarmTimeout,
    /// Best-effort release of server-side resources.
    Release { ids: Vec<JobId> },
    Commit(FinalizeRequest),
    Report(PoolEvent),
}

/// Outcome worth telling the user about.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    EnteredEditing { timed_out: bool },
    /// Some items could not be prepared; the rest continue.
    SubmissionWarnings { errors: Vec<String> },
    /// Nothing could be prepared; the pool is closed.
    SubmissionFailed { message: String },
    CommitFailed { message: String },
    Finalized { ids: Vec<JobId> },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("No items selected")]
    NoSelection,

    #[error("Name must not be empty (items {0:?})")]
    EmptyNames(Vec<usize>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Operation not allowed while the pool is {0}")]
    WrongPhase(PoolPhase),

    #[error("A commit is already in flight")]
    CommitInFlight,

    #[error("No job in slot {0}")]
    UnknownSlot(usize),

    #[error(transparent)]
    Job(#[from] JobError),
}

/// Coordinates the jobs of one acquisition dialog.
#[derive(Debug)]
pub struct JobPool {
    generation: u64,
    jobs: Vec<PreparationJob>,
    phase: PoolPhase,
    /// Submission calls issued but not yet answered.
    pending_submissions: usize,
    commit: Option<FinalizeRequest>,
}

impl JobPool {
    /// Create a pool with one job per handle (order kept, duplicates allowed)
    /// and return the effects that start it.
    ///
    /// Handles are submitted in one call per handle kind.
    pub fn start(
        generation: u64,
        handles: Vec<DownloadHandle>,
    ) -> Result<(Self, Vec<PoolEffect>), PoolError> {
        if handles.is_empty() {
            return Err(ValidationError::NoSelection.into());
        }

        let jobs: Vec<PreparationJob> = handles
            .into_iter()
            .enumerate()
            .map(|(slot, handle)| PreparationJob::new(slot, handle))
            .collect();

        let mut groups: Vec<(Vec<usize>, Vec<DownloadHandle>)> = Vec::new();
        for job in &jobs {
            let kind = job.handle().kind();
            match groups.iter_mut().find(|(_, h)| h[0].kind() == kind) {
                Some((slots, handles)) => {
                    slots.push(job.slot());
                    handles.push(job.handle().clone());
                }
                None => groups.push((vec![job.slot()], vec![job.handle().clone()])),
            }
        }

        let mut effects = vec![PoolEffect::ArmTimeout];
        let pending_submissions = groups.len();
        effects.extend(
            groups
                .into_iter()
                .map(|(slots, handles)| PoolEffect::Submit { slots, handles }),
        );

        info!(generation, jobs = jobs.len(), "Preparation pool started");
        Ok((
            Self {
                generation,
                jobs,
                phase: PoolPhase::Loading,
                pending_submissions,
                commit: None,
            },
            effects,
        ))
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> PoolPhase {
        self.phase
    }

    pub fn jobs(&self) -> &[PreparationJob] {
        &self.jobs
    }

    pub fn job(&self, slot: usize) -> Option<&PreparationJob> {
        self.jobs.iter().find(|j| j.slot() == slot)
    }

    fn job_mut(&mut self, slot: usize) -> Option<&mut PreparationJob> {
        self.jobs.iter_mut().find(|j| j.slot() == slot)
    }

    pub fn is_committing(&self) -> bool {
        self.commit.is_some()
    }

    /// Apply the answer to one `Submit` effect.
    pub fn on_submitted(
        &mut self,
        slots: &[usize],
        result: Result<PreparedBatch, PreparationError>,
    ) -> Vec<PoolEffect> {
        let mut effects = Vec::new();

        if self.phase != PoolPhase::Loading {
            // Those jobs were canceled while still Submitted; release what the
            // service created for them anyway.
            if let Ok(batch) = result {
                let ids: Vec<JobId> = batch.prepared.iter().map(|d| d.id).collect();
                if !ids.is_empty() {
                    effects.push(PoolEffect::Release { ids });
                }
            }
            return effects;
        }
        self.pending_submissions = self.pending_submissions.saturating_sub(1);

        let mut warnings = Vec::new();
        let mut dropped: Vec<usize> = Vec::new();
        match result {
            Ok(batch) => {
                // The service answers in request order but skips failed
                // items, so a short answer cannot be matched reliably.
                let ambiguous = slots.len() > 1 && batch.prepared.len() != slots.len();
                if ambiguous {
                    warn!(
                        generation = self.generation,
                        requested = slots.len(),
                        prepared = batch.prepared.len(),
                        "Partial batch; descriptors assigned by position"
                    );
                }
                let mut descriptors = batch.prepared.into_iter();
                for &slot in slots {
                    let Some(descriptor) = descriptors.next() else {
                        dropped.push(slot);
                        continue;
                    };
                    let Some(job) = self.job_mut(slot) else {
                        continue;
                    };
                    if ambiguous {
                        job.mark_ambiguous();
                    }
                    match job.assign(&descriptor) {
                        Ok(JobState::Polling) => effects.push(PoolEffect::StartPolling {
                            slot,
                            id: descriptor.id,
                        }),
                        Ok(_) => {}
                        Err(e) => warn!(slot, error = %e, "Descriptor could not be applied"),
                    }
                }

                let surplus: Vec<JobId> = descriptors.map(|d| d.id).collect();
                if !surplus.is_empty() {
                    warn!(ids = ?surplus, "Service prepared more items than requested");
                    effects.push(PoolEffect::Release { ids: surplus });
                }

                warnings.extend(batch.errors);
                if !dropped.is_empty() && warnings.is_empty() {
                    warnings.push(format!(
                        "{} of {} items could not be prepared",
                        dropped.len(),
                        slots.len()
                    ));
                }
            }
            Err(e) => {
                warn!(generation = self.generation, error = %e, "Submission failed");
                dropped.extend_from_slice(slots);
                warnings.push(e.to_string());
            }
        }

        self.jobs.retain(|j| !dropped.contains(&j.slot()));

        if self.jobs.is_empty() && self.pending_submissions == 0 {
            self.phase = PoolPhase::Closed;
            effects.push(PoolEffect::DisarmTimeout);
            effects.push(PoolEffect::Report(PoolEvent::SubmissionFailed {
                message: warnings.join("; "),
            }));
            return effects;
        }

        if !warnings.is_empty() {
            effects.push(PoolEffect::Report(PoolEvent::SubmissionWarnings {
                errors: warnings,
            }));
        }
        self.evaluate(&mut effects);
        effects
    }

    /// Apply one status check. Errors count as not-ready.
    pub fn on_poll(
        &mut self,
        slot: usize,
        result: Result<PrepareStatus, PreparationError>,
    ) -> Vec<PoolEffect> {
        let mut effects = Vec::new();
        if self.phase != PoolPhase::Loading {
            return effects;
        }
        let generation = self.generation;
        let Some(job) = self.job_mut(slot) else {
            return effects;
        };
        if job.state() != JobState::Polling {
            return effects;
        }

        match result {
            Ok(status) => match job.apply_poll(&status) {
                Ok(true) => {
                    debug!(generation, slot, job_id = status.id, "Job ready");
                    effects.push(PoolEffect::StopPolling { slot });
                    self.evaluate(&mut effects);
                }
                Ok(false) => {}
                Err(e) => warn!(generation, slot, error = %e, "Ignoring status check"),
            },
            Err(e) => {
                debug!(generation, slot, error = %e, "Status check failed, treating as not ready");
            }
        }
        effects
    }

    /// The pool-wide deadline elapsed.
    ///
    /// Jobs whose submission is still unanswered are dropped; the pool only
    /// closes if that leaves nothing the service has prepared.
    pub fn on_timeout(&mut self) -> Vec<PoolEffect> {
        let mut effects = Vec::new();
        if self.phase != PoolPhase::Loading {
            return effects;
        }

        if self.pending_submissions > 0 {
            if !self.jobs.iter().any(|j| j.id().is_some()) {
                warn!(generation = self.generation, "Pool timed out before the submission was answered");
                effects.extend(self.close());
                effects.push(PoolEffect::Report(PoolEvent::SubmissionFailed {
                    message: "Timed out waiting for the download service".to_string(),
                }));
                return effects;
            }

            let total = self.jobs.len();
            let mut unanswered = Vec::new();
            for job in &mut self.jobs {
                if job.state() == JobState::Submitted && job.cancel() {
                    unanswered.push(job.slot());
                }
            }
            self.jobs.retain(|j| j.state() != JobState::Canceled);
            // The pool leaves Loading below, so late answers are released.
            self.pending_submissions = 0;
            warn!(
                generation = self.generation,
                slots = ?unanswered,
                "Dropping items whose submission was not answered in time"
            );
            effects.push(PoolEffect::Report(PoolEvent::SubmissionWarnings {
                errors: vec![format!(
                    "{} of {} items were not prepared in time",
                    unanswered.len(),
                    total
                )],
            }));
        }

        for job in &mut self.jobs {
            if job.force_timeout() {
                info!(
                    generation = self.generation,
                    slot = job.slot(),
                    job_id = ?job.id(),
                    "Metadata not received in time, using fallback name"
                );
                effects.push(PoolEffect::StopPolling { slot: job.slot() });
            }
        }
        self.evaluate(&mut effects);
        effects
    }

    /// Loading -> Editing once every job is ready and no submission is outstanding.
    fn evaluate(&mut self, effects: &mut Vec<PoolEffect>) {
        if self.phase != PoolPhase::Loading || self.pending_submissions > 0 {
            return;
        }
        if !self.jobs.iter().all(|j| j.state().is_ready()) {
            return;
        }

        let timed_out = self.jobs.iter().any(|j| j.state() == JobState::TimedOut);
        self.phase = PoolPhase::Editing;
        info!(generation = self.generation, jobs = self.jobs.len(), timed_out, "Pool ready for editing");
        effects.push(PoolEffect::DisarmTimeout);
        effects.push(PoolEffect::Report(PoolEvent::EnteredEditing { timed_out }));
    }

    fn require_editing(&self) -> Result<(), PoolError> {
        if self.phase != PoolPhase::Editing {
            return Err(PoolError::WrongPhase(self.phase));
        }
        if self.commit.is_some() {
            return Err(PoolError::CommitInFlight);
        }
        Ok(())
    }

    pub fn set_name(&mut self, slot: usize, name: impl Into<String>) -> Result<(), PoolError> {
        self.require_editing()?;
        let job = self.job_mut(slot).ok_or(PoolError::UnknownSlot(slot))?;
        job.set_edited_name(name)?;
        Ok(())
    }

    /// Validate every name, then issue one commit for the whole pool.
    ///
    /// Nothing is sent, and no job changes, if any name is blank.
    pub fn finalize_all(&mut self, media_type: MediaType) -> Result<Vec<PoolEffect>, PoolError> {
        self.require_editing()?;
        if self.jobs.is_empty() {
            return Err(ValidationError::NoSelection.into());
        }

        let blank: Vec<usize> = self
            .jobs
            .iter()
            .filter(|j| !j.has_valid_name())
            .map(|j| j.slot())
            .collect();
        if !blank.is_empty() {
            return Err(ValidationError::EmptyNames(blank).into());
        }

        let mut torrents = Vec::with_capacity(self.jobs.len());
        for job in &mut self.jobs {
            torrents.push(job.begin_finalize()?);
        }
        let request = FinalizeRequest {
            torrents,
            content_type: media_type,
        };

        info!(generation = self.generation, ids = ?request.ids(), media_type = media_type.as_str(), "Committing pool");
        self.commit = Some(request.clone());
        Ok(vec![PoolEffect::Commit(request)])
    }

    /// Apply the answer to the commit call.
    pub fn on_committed(
        &mut self,
        result: Result<FinalizeReceipt, PreparationError>,
    ) -> Vec<PoolEffect> {
        let Some(request) = self.commit.take() else {
            return Vec::new();
        };

        match result {
            Ok(_) => {
                for job in &mut self.jobs {
                    if let Err(e) = job.finalize_succeeded() {
                        warn!(slot = job.slot(), error = %e, "Unexpected job state after commit");
                    }
                }
                self.phase = PoolPhase::Closed;
                vec![PoolEffect::Report(PoolEvent::Finalized {
                    ids: request.ids(),
                })]
            }
            Err(e) => {
                for job in &mut self.jobs {
                    if let Err(err) = job.finalize_failed() {
                        warn!(slot = job.slot(), error = %err, "Unexpected job state after failed commit");
                    }
                }
                warn!(generation = self.generation, error = %e, "Commit failed");
                vec![PoolEffect::Report(PoolEvent::CommitFailed {
                    message: e.to_string(),
                })]
            }
        }
    }

    /// Discard the pool: cancel unresolved jobs, drop ready ones silently.
    pub fn abandon(&mut self) -> Result<Vec<PoolEffect>, PoolError> {
        if self.phase == PoolPhase::Closed {
            return Err(PoolError::WrongPhase(self.phase));
        }
        info!(generation = self.generation, phase = %self.phase, "Abandoning pool");
        Ok(self.close())
    }

    fn close(&mut self) -> Vec<PoolEffect> {
        let mut effects = Vec::new();
        let mut ids = Vec::new();
        for job in &mut self.jobs {
            let was_polling = job.state() == JobState::Polling;
            if job.cancel() {
                if was_polling {
                    effects.push(PoolEffect::StopPolling { slot: job.slot() });
                }
                ids.extend(job.id());
            }
        }
        if !ids.is_empty() {
            effects.push(PoolEffect::Release { ids });
        }
        effects.push(PoolEffect::DisarmTimeout);
        self.commit = None;
        self.phase = PoolPhase::Closed;
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preparation::PreparedDescriptor;

    fn magnet(n: u32) -> DownloadHandle {
        DownloadHandle::Magnet(format!("magnet:?xt=urn:btih:{:040}", n))
    }

    fn url(n: u32) -> DownloadHandle {
        DownloadHandle::TorrentUrl(format!("https://tracker.example/dl/{}", n))
    }

    fn batch(descriptors: Vec<PreparedDescriptor>) -> Result<PreparedBatch, PreparationError> {
        Ok(PreparedBatch {
            prepared: descriptors,
            errors: Vec::new(),
        })
    }

    fn reports(effects: &[PoolEffect]) -> Vec<&PoolEvent> {
        effects
            .iter()
            .filter_map(|e| match e {
                PoolEffect::Report(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    fn ready_pool(names: &[&str]) -> JobPool {
        let handles = (0..names.len() as u32).map(magnet).collect();
        let (mut pool, _) = JobPool::start(1, handles).unwrap();
        let descriptors = names
            .iter()
            .enumerate()
            .map(|(i, n)| PreparedDescriptor::ready(i as JobId + 1, *n))
            .collect();
        let slots: Vec<usize> = (0..names.len()).collect();
        pool.on_submitted(&slots, batch(descriptors));
        assert_eq!(pool.phase(), PoolPhase::Editing);
        pool
    }

    #[test]
    fn test_start_requires_selection() {
        assert_eq!(
            JobPool::start(1, vec![]).unwrap_err(),
            PoolError::Validation(ValidationError::NoSelection)
        );
    }

    #[test]
    fn test_start_submits_per_kind_and_arms_timer() {
        let (pool, effects) = JobPool::start(1, vec![magnet(1), url(2), magnet(1)]).unwrap();
        assert_eq!(pool.phase(), PoolPhase::Loading);
        assert_eq!(pool.jobs().len(), 3);
        assert_eq!(
            effects,
            vec![
                PoolEffect::ArmTimeout,
                PoolEffect::Submit {
                    slots: vec![0, 2],
                    handles: vec![magnet(1), magnet(1)],
                },
                PoolEffect::Submit {
                    slots: vec![1],
                    handles: vec![url(2)],
                },
            ]
        );
    }

    #[test]
    fn test_all_ready_enters_editing_without_polling() {
        let (mut pool, _) = JobPool::start(1, vec![magnet(1), magnet(2)]).unwrap();
        let effects = pool.on_submitted(
            &[0, 1],
            batch(vec![
                PreparedDescriptor::ready(10, "A"),
                PreparedDescriptor::ready(11, "B"),
            ]),
        );

        assert_eq!(pool.phase(), PoolPhase::Editing);
        assert!(!effects
            .iter()
            .any(|e| matches!(e, PoolEffect::StartPolling { .. })));
        assert_eq!(
            reports(&effects),
            vec![&PoolEvent::EnteredEditing { timed_out: false }]
        );
    }

    #[test]
    fn test_timeout_degrades_unresolved_jobs() {
        let (mut pool, _) = JobPool::start(1, vec![magnet(1), magnet(2), magnet(3)]).unwrap();
        let effects = pool.on_submitted(
            &[0, 1, 2],
            batch(vec![
                PreparedDescriptor::ready(1, "One"),
                PreparedDescriptor::ready(2, "Two"),
                PreparedDescriptor::pending(3),
            ]),
        );
        assert!(effects.contains(&PoolEffect::StartPolling { slot: 2, id: 3 }));
        assert_eq!(pool.phase(), PoolPhase::Loading);

        let effects = pool.on_timeout();
        assert!(effects.contains(&PoolEffect::StopPolling { slot: 2 }));
        assert_eq!(pool.phase(), PoolPhase::Editing);
        assert_eq!(
            reports(&effects),
            vec![&PoolEvent::EnteredEditing { timed_out: true }]
        );
        let job = pool.job(2).unwrap();
        assert_eq!(job.state(), JobState::TimedOut);
        assert_eq!(job.edited_name(), "Torrent 3");
    }

    #[test]
    fn test_poll_ready_completes_pool() {
        let (mut pool, _) = JobPool::start(1, vec![magnet(1)]).unwrap();
        pool.on_submitted(&[0], batch(vec![PreparedDescriptor::pending(7)]));

        let not_ready = PrepareStatus {
            id: 7,
            name: String::new(),
            ready: false,
            metadata_progress: 0.5,
        };
        assert!(pool.on_poll(0, Ok(not_ready)).is_empty());
        assert!(pool
            .on_poll(0, Err(PreparationError::Timeout))
            .is_empty());

        let ready = PrepareStatus {
            id: 7,
            name: "Foo".to_string(),
            ready: true,
            metadata_progress: 1.0,
        };
        let effects = pool.on_poll(0, Ok(ready));
        assert_eq!(effects[0], PoolEffect::StopPolling { slot: 0 });
        assert_eq!(pool.phase(), PoolPhase::Editing);
        assert_eq!(pool.job(0).unwrap().edited_name(), "Foo");
    }

    #[test]
    fn test_failed_submission_closes_pool() {
        let (mut pool, _) = JobPool::start(1, vec![magnet(1), magnet(2)]).unwrap();
        let effects = pool.on_submitted(
            &[0, 1],
            Err(PreparationError::Rejected("Invalid magnet link".into())),
        );

        assert_eq!(pool.phase(), PoolPhase::Closed);
        assert!(effects.contains(&PoolEffect::DisarmTimeout));
        assert!(matches!(
            reports(&effects)[..],
            [PoolEvent::SubmissionFailed { .. }]
        ));
    }

    #[test]
    fn test_partial_batch_drops_unprepared_jobs() {
        let (mut pool, _) = JobPool::start(1, vec![magnet(1), magnet(2), magnet(3)]).unwrap();
        let effects = pool.on_submitted(
            &[0, 1, 2],
            Ok(PreparedBatch {
                prepared: vec![
                    PreparedDescriptor::ready(1, "One"),
                    PreparedDescriptor::ready(2, "Two"),
                ],
                errors: vec!["Failed to add torrent".to_string()],
            }),
        );

        assert_eq!(pool.jobs().len(), 2);
        assert_eq!(pool.phase(), PoolPhase::Editing);
        assert_eq!(
            reports(&effects)[0],
            &PoolEvent::SubmissionWarnings {
                errors: vec!["Failed to add torrent".to_string()]
            }
        );
        // Which item failed is unknown, so every survivor is flagged.
        assert!(pool.jobs().iter().all(|j| j.is_ambiguous()));
    }

    #[test]
    fn test_complete_batch_is_not_ambiguous() {
        let pool = ready_pool(&["A", "B", "C"]);
        assert!(pool.jobs().iter().all(|j| !j.is_ambiguous()));

        let (mut single, _) = JobPool::start(1, vec![magnet(1)]).unwrap();
        single.on_submitted(&[0], batch(vec![PreparedDescriptor::ready(5, "Only")]));
        assert!(!single.job(0).unwrap().is_ambiguous());
    }

    #[test]
    fn test_finalize_rejected_on_blank_name() {
        let mut pool = ready_pool(&["A", "B"]);
        pool.set_name(1, "  ").unwrap();

        for _ in 0..2 {
            assert_eq!(
                pool.finalize_all(MediaType::Movies).unwrap_err(),
                PoolError::Validation(ValidationError::EmptyNames(vec![1]))
            );
            assert_eq!(pool.phase(), PoolPhase::Editing);
            assert!(!pool.is_committing());
            assert!(pool.jobs().iter().all(|j| j.state() == JobState::Ready));
        }
    }

    #[test]
    fn test_commit_success_closes_pool() {
        let mut pool = ready_pool(&["A", "B"]);
        pool.set_name(0, "A (2024)").unwrap();

        let effects = pool.finalize_all(MediaType::Series).unwrap();
        let PoolEffect::Commit(request) = &effects[0] else {
            panic!("expected commit effect");
        };
        assert_eq!(request.torrents[0].new_name.as_deref(), Some("A (2024)"));
        assert_eq!(request.torrents[1].new_name, None);
        assert_eq!(
            pool.finalize_all(MediaType::Series).unwrap_err(),
            PoolError::CommitInFlight
        );

        let effects = pool.on_committed(Ok(FinalizeReceipt::default()));
        assert_eq!(pool.phase(), PoolPhase::Closed);
        assert_eq!(
            reports(&effects),
            vec![&PoolEvent::Finalized { ids: vec![1, 2] }]
        );
        assert!(pool
            .jobs()
            .iter()
            .all(|j| j.state() == JobState::Finalized));
    }

    #[test]
    fn test_commit_failure_keeps_editing() {
        let mut pool = ready_pool(&["A"]);
        pool.set_name(0, "Edited").unwrap();
        pool.finalize_all(MediaType::Music).unwrap();

        let effects = pool.on_committed(Err(PreparationError::Rejected("disk full".into())));
        assert_eq!(pool.phase(), PoolPhase::Editing);
        assert!(matches!(
            reports(&effects)[..],
            [PoolEvent::CommitFailed { .. }]
        ));
        assert_eq!(pool.job(0).unwrap().edited_name(), "Edited");
        assert!(pool.finalize_all(MediaType::Music).is_ok());
    }

    #[test]
    fn test_abandon_releases_only_unresolved_jobs() {
        let (mut pool, _) = JobPool::start(1, vec![magnet(1), magnet(2)]).unwrap();
        pool.on_submitted(
            &[0, 1],
            batch(vec![
                PreparedDescriptor::ready(1, "One"),
                PreparedDescriptor::pending(2),
            ]),
        );

        let effects = pool.abandon().unwrap();
        assert_eq!(pool.phase(), PoolPhase::Closed);
        assert!(effects.contains(&PoolEffect::StopPolling { slot: 1 }));
        assert!(effects.contains(&PoolEffect::Release { ids: vec![2] }));
        assert_eq!(pool.job(0).unwrap().state(), JobState::Ready);
        assert_eq!(pool.abandon().unwrap_err(), PoolError::WrongPhase(PoolPhase::Closed));
    }

    #[test]
    fn test_late_submission_after_abandon_is_released() {
        let (mut pool, _) = JobPool::start(1, vec![magnet(1)]).unwrap();
        pool.abandon().unwrap();

        let effects = pool.on_submitted(&[0], batch(vec![PreparedDescriptor::pending(9)]));
        assert_eq!(effects, vec![PoolEffect::Release { ids: vec![9] }]);
        assert_eq!(pool.job(0).unwrap().state(), JobState::Canceled);
    }

    #[test]
    fn test_timeout_with_unanswered_group_keeps_prepared_jobs() {
        let (mut pool, _) = JobPool::start(1, vec![magnet(1), url(2), magnet(3)]).unwrap();
        pool.on_submitted(
            &[0, 2],
            batch(vec![
                PreparedDescriptor::ready(11, "A"),
                PreparedDescriptor::pending(13),
            ]),
        );
        assert_eq!(pool.phase(), PoolPhase::Loading);

        let effects = pool.on_timeout();
        assert_eq!(pool.phase(), PoolPhase::Editing);
        assert!(effects.contains(&PoolEffect::StopPolling { slot: 2 }));
        assert_eq!(
            reports(&effects),
            vec![
                &PoolEvent::SubmissionWarnings {
                    errors: vec!["1 of 3 items were not prepared in time".to_string()]
                },
                &PoolEvent::EnteredEditing { timed_out: true },
            ]
        );
        let slots: Vec<usize> = pool.jobs().iter().map(|j| j.slot()).collect();
        assert_eq!(slots, vec![0, 2]);
        assert_eq!(pool.job(0).unwrap().state(), JobState::Ready);
        assert_eq!(pool.job(2).unwrap().edited_name(), "Torrent 13");

        // The late answer for the dropped group is released, not assigned.
        let effects = pool.on_submitted(&[1], batch(vec![PreparedDescriptor::ready(12, "B")]));
        assert_eq!(effects, vec![PoolEffect::Release { ids: vec![12] }]);
        assert!(pool.job(1).is_none());

        let effects = pool.finalize_all(MediaType::Movies).unwrap();
        let PoolEffect::Commit(request) = &effects[0] else {
            panic!("expected commit effect");
        };
        assert_eq!(request.ids(), vec![11, 13]);
    }

    #[test]
    fn test_timeout_during_submission_closes_pool() {
        let (mut pool, _) = JobPool::start(1, vec![magnet(1)]).unwrap();
        let effects = pool.on_timeout();

        assert_eq!(pool.phase(), PoolPhase::Closed);
        assert!(matches!(
            reports(&effects)[..],
            [PoolEvent::SubmissionFailed { .. }]
        ));
    }
}
