//! Mock preparation service for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::discovery::{DownloadHandle, HandleKind};
use crate::preparation::{
    FinalizeReceipt, FinalizeRequest, JobId, PrepareStatus, PreparationError, PreparationService,
    PreparedBatch, PreparedDescriptor,
};

/// Mock implementation of the PreparationService trait.
///
/// Provides controllable behavior for testing:
/// - Queue the batches returned by `prepare` (otherwise every handle comes
///   back ready with a generated id and name)
/// - Script status answers per id (ids without a script never become ready)
/// - Simulate failures and delays
/// - Record every call for assertions
///
/// # Example
///
/// ```rust,ignore
/// let preparation = MockPreparationService::new();
/// preparation.push_prepared(vec![PreparedDescriptor::pending(7)]).await;
/// preparation.script_ready_after(7, 2, "Foo").await;
///
/// // ... drive the orchestrator ...
///
/// assert_eq!(preparation.status_calls(7).await, 3);
/// ```
#[derive(Debug)]
pub struct MockPreparationService {
    /// Batches returned by successive `prepare` calls.
    batches: Arc<RwLock<VecDeque<PreparedBatch>>>,
    /// Status answers per id; the last one repeats.
    statuses: Arc<RwLock<HashMap<JobId, VecDeque<PrepareStatus>>>>,
    next_prepare_error: Arc<RwLock<Option<PreparationError>>>,
    next_finalize_error: Arc<RwLock<Option<PreparationError>>>,
    /// If set, every cancel fails with this error.
    cancel_error: Arc<RwLock<Option<PreparationError>>>,
    prepare_delay: Arc<RwLock<Duration>>,
    /// Overrides `prepare_delay` for calls carrying this kind of handle.
    kind_delays: Arc<RwLock<HashMap<HandleKind, Duration>>>,
    finalize_delay: Arc<RwLock<Duration>>,
    /// Counter for generated ids.
    id_counter: Arc<RwLock<JobId>>,

    prepare_calls: Arc<RwLock<Vec<Vec<DownloadHandle>>>>,
    status_calls: Arc<RwLock<HashMap<JobId, usize>>>,
    cancel_calls: Arc<RwLock<Vec<Vec<JobId>>>>,
    finalize_calls: Arc<RwLock<Vec<FinalizeRequest>>>,
}

impl Default for MockPreparationService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPreparationService {
    pub fn new() -> Self {
        Self {
            batches: Arc::new(RwLock::new(VecDeque::new())),
            statuses: Arc::new(RwLock::new(HashMap::new())),
            next_prepare_error: Arc::new(RwLock::new(None)),
            next_finalize_error: Arc::new(RwLock::new(None)),
            cancel_error: Arc::new(RwLock::new(None)),
            prepare_delay: Arc::new(RwLock::new(Duration::ZERO)),
            kind_delays: Arc::new(RwLock::new(HashMap::new())),
            finalize_delay: Arc::new(RwLock::new(Duration::ZERO)),
            id_counter: Arc::new(RwLock::new(1000)),
            prepare_calls: Arc::new(RwLock::new(Vec::new())),
            status_calls: Arc::new(RwLock::new(HashMap::new())),
            cancel_calls: Arc::new(RwLock::new(Vec::new())),
            finalize_calls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Queue the descriptors returned by the next `prepare` call.
    pub async fn push_prepared(&self, descriptors: Vec<PreparedDescriptor>) {
        self.push_batch(PreparedBatch {
            prepared: descriptors,
            errors: Vec::new(),
        })
        .await;
    }

    /// Queue a full batch answer, per-item errors included.
    pub async fn push_batch(&self, batch: PreparedBatch) {
        self.batches.write().await.push_back(batch);
    }

    /// Set the answers for status checks of `id`. The last answer repeats.
    pub async fn set_statuses(&self, id: JobId, statuses: Vec<PrepareStatus>) {
        self.statuses.write().await.insert(id, statuses.into());
    }

    /// Answer `not_ready` status checks with not-ready, then ready with `name`.
    pub async fn script_ready_after(&self, id: JobId, not_ready: usize, name: &str) {
        let mut statuses: Vec<PrepareStatus> = (0..not_ready)
            .map(|i| PrepareStatus {
                id,
                name: String::new(),
                ready: false,
                metadata_progress: i as f64 / (not_ready + 1) as f64,
            })
            .collect();
        statuses.push(PrepareStatus {
            id,
            name: name.to_string(),
            ready: true,
            metadata_progress: 1.0,
        });
        self.set_statuses(id, statuses).await;
    }

    pub async fn fail_next_prepare(&self, error: PreparationError) {
        *self.next_prepare_error.write().await = Some(error);
    }

    pub async fn fail_next_finalize(&self, error: PreparationError) {
        *self.next_finalize_error.write().await = Some(error);
    }

    pub async fn fail_cancels(&self, error: PreparationError) {
        *self.cancel_error.write().await = Some(error);
    }

    pub async fn set_prepare_delay(&self, delay: Duration) {
        *self.prepare_delay.write().await = delay;
    }

    /// Delay only the `prepare` calls for handles of `kind`.
    pub async fn set_prepare_delay_for(&self, kind: HandleKind, delay: Duration) {
        self.kind_delays.write().await.insert(kind, delay);
    }

    pub async fn set_finalize_delay(&self, delay: Duration) {
        *self.finalize_delay.write().await = delay;
    }

    pub async fn prepare_calls(&self) -> Vec<Vec<DownloadHandle>> {
        self.prepare_calls.read().await.clone()
    }

    /// Number of status checks made for `id`.
    pub async fn status_calls(&self, id: JobId) -> usize {
        self.status_calls.read().await.get(&id).copied().unwrap_or(0)
    }

    /// Total status checks across all ids.
    pub async fn total_status_calls(&self) -> usize {
        self.status_calls.read().await.values().sum()
    }

    pub async fn cancel_calls(&self) -> Vec<Vec<JobId>> {
        self.cancel_calls.read().await.clone()
    }

    pub async fn finalize_calls(&self) -> Vec<FinalizeRequest> {
        self.finalize_calls.read().await.clone()
    }

    async fn generated_batch(&self, handles: &[DownloadHandle]) -> PreparedBatch {
        let mut counter = self.id_counter.write().await;
        let prepared = handles
            .iter()
            .map(|_| {
                *counter += 1;
                PreparedDescriptor::ready(*counter, format!("Item {}", *counter))
            })
            .collect();
        PreparedBatch {
            prepared,
            errors: Vec::new(),
        }
    }
}

#[async_trait]
impl PreparationService for MockPreparationService {
    fn name(&self) -> &str {
        "mock"
    }

    async fn prepare(&self, handles: &[DownloadHandle]) -> Result<PreparedBatch, PreparationError> {
        self.prepare_calls.write().await.push(handles.to_vec());

        let kind_delay = match handles.first() {
            Some(handle) => self.kind_delays.read().await.get(&handle.kind()).copied(),
            None => None,
        };
        let delay = match kind_delay {
            Some(delay) => delay,
            None => *self.prepare_delay.read().await,
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.next_prepare_error.write().await.take() {
            return Err(error);
        }

        let queued = self.batches.write().await.pop_front();
        match queued {
            Some(batch) => Ok(batch),
            None => Ok(self.generated_batch(handles).await),
        }
    }

    async fn status(&self, id: JobId) -> Result<PrepareStatus, PreparationError> {
        *self.status_calls.write().await.entry(id).or_insert(0) += 1;

        let mut statuses = self.statuses.write().await;
        let Some(script) = statuses.get_mut(&id) else {
            return Ok(PrepareStatus {
                id,
                name: String::new(),
                ready: false,
                metadata_progress: 0.0,
            });
        };

        let status = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        status.ok_or(PreparationError::NotFound(id))
    }

    async fn cancel(&self, ids: &[JobId]) -> Result<(), PreparationError> {
        self.cancel_calls.write().await.push(ids.to_vec());
        match self.cancel_error.read().await.as_ref() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn finalize(&self, request: &FinalizeRequest) -> Result<FinalizeReceipt, PreparationError> {
        self.finalize_calls.write().await.push(request.clone());

        let delay = *self.finalize_delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.next_finalize_error.write().await.take() {
            return Err(error);
        }

        Ok(FinalizeReceipt {
            message: "Torrents started".to_string(),
            started_ids: request.ids(),
            errors: Vec::new(),
        })
    }
}
