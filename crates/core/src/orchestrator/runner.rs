//! Acquisition orchestrator implementation.
//!
//! A single task owns the discovery reader and the active job pool. UI calls
//! arrive as commands; network calls, poll loops and the pool timer run as
//! separate tasks that post their results back to the same task, so every
//! state transition is applied one at a time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::discovery::{
    DiscoveryService, DiscoveryStreamReader, ReaderUpdate, ResultItem,
    SearchQuery, StreamDelivery,
};
use crate::metrics::{
    CANCELLATIONS, COMMITS, COMMIT_DURATION, JOBS_SUBMITTED, POLL_CHECKS, POOL_TIMEOUTS,
    SEARCHES, SEARCH_RESULTS,
};
use crate::preparation::{
    FinalizeReceipt, FinalizeRequest, JobId, JobPool, MediaType, PoolEffect, PoolEvent, PoolPhase,
    PrepareStatus, PreparationError, PreparationService, PreparedBatch, ValidationError,
};

use super::config::OrchestratorConfig;
use super::types::{
    JobView, Notification, OrchestratorError, OrchestratorSnapshot, PoolSnapshot, SearchStatus,
};

type Reply<T> = oneshot::Sender<Result<T, OrchestratorError>>;

enum Command {
    Search {
        query: String,
        reply: Reply<SearchQuery>,
    },
    Select {
        items: Vec<ResultItem>,
        reply: Reply<()>,
    },
    ClearSearch {
        reply: Reply<()>,
    },
    Rename {
        slot: usize,
        name: String,
        reply: Reply<()>,
    },
    Finalize {
        media_type: MediaType,
        reply: Reply<()>,
    },
    Abandon {
        reply: Reply<()>,
    },
    Snapshot {
        reply: Reply<OrchestratorSnapshot>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Results of pool side effects, tagged with the pool generation.
enum PoolMessage {
    Submitted {
        generation: u64,
        slots: Vec<usize>,
        result: Result<PreparedBatch, PreparationError>,
    },
    Polled {
        generation: u64,
        slot: usize,
        result: Result<PrepareStatus, PreparationError>,
    },
    TimedOut {
        generation: u64,
    },
    Committed {
        generation: u64,
        started: Instant,
        result: Result<FinalizeReceipt, PreparationError>,
    },
}

impl PoolMessage {
    fn generation(&self) -> u64 {
        match self {
            PoolMessage::Submitted { generation, .. }
            | PoolMessage::Polled { generation, .. }
            | PoolMessage::TimedOut { generation }
            | PoolMessage::Committed { generation, .. } => *generation,
        }
    }
}

/// Handle to a running acquisition orchestrator.
///
/// Cheap to clone. Dropping every handle stops the orchestrator the same way
/// [`shutdown`](Self::shutdown) does.
#[derive(Clone)]
pub struct AcquisitionOrchestrator {
    tx: mpsc::UnboundedSender<Command>,
}

impl AcquisitionOrchestrator {
    /// Start an orchestrator searching the source named in `config`.
    ///
    /// Returns the handle and the receiver for user-facing notifications.
    pub fn spawn(
        config: OrchestratorConfig,
        discovery: Arc<dyn DiscoveryService>,
        preparation: Arc<dyn PreparationService>,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, commands) = mpsc::unbounded_channel();
        let (notify_tx, notifications) = mpsc::unbounded_channel();
        let (stream_tx, stream_rx) = mpsc::unbounded_channel();
        let (pool_tx, pool_rx) = mpsc::unbounded_channel();

        let source = config.source;
        let actor = Actor {
            config,
            reader: DiscoveryStreamReader::new(discovery, source, stream_tx),
            preparation,
            notify: notify_tx,
            pool_tx,
            query: None,
            search: SearchStatus::Idle,
            results: Vec::new(),
            pool: None,
            generation: 0,
        };
        tokio::spawn(actor.run(commands, stream_rx, pool_rx));

        (Self { tx }, notifications)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, OrchestratorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| OrchestratorError::Closed)?;
        rx.await.map_err(|_| OrchestratorError::Closed)?
    }

    /// Start a search, replacing any search in progress.
    ///
    /// Also abandons an open acquisition.
    pub async fn search(&self, query: &str) -> Result<SearchQuery, OrchestratorError> {
        let query = query.to_string();
        self.request(|reply| Command::Search { query, reply }).await
    }

    pub async fn select_for_single(&self, item: ResultItem) -> Result<(), OrchestratorError> {
        self.select_for_batch(vec![item]).await
    }

    /// Start preparing `items`, abandoning any previous acquisition.
    pub async fn select_for_batch(&self, items: Vec<ResultItem>) -> Result<(), OrchestratorError> {
        self.request(|reply| Command::Select { items, reply }).await
    }

    /// Close the stream, drop the results and abandon any acquisition.
    pub async fn clear_search(&self) -> Result<(), OrchestratorError> {
        self.request(|reply| Command::ClearSearch { reply }).await
    }

    pub async fn rename(&self, slot: usize, name: &str) -> Result<(), OrchestratorError> {
        let name = name.to_string();
        self.request(|reply| Command::Rename { slot, name, reply })
            .await
    }

    /// Commit the acquisition. The outcome arrives as a notification.
    pub async fn finalize(&self, media_type: MediaType) -> Result<(), OrchestratorError> {
        self.request(|reply| Command::Finalize { media_type, reply })
            .await
    }

    /// Close the acquisition dialog without committing.
    pub async fn abandon(&self) -> Result<(), OrchestratorError> {
        self.request(|reply| Command::Abandon { reply }).await
    }

    pub async fn snapshot(&self) -> Result<OrchestratorSnapshot, OrchestratorError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Stop the orchestrator, releasing every stream, timer and poll loop.
    pub async fn shutdown(&self) -> Result<(), OrchestratorError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

/// The pool plus the timers driving it. Dropping it stops them all.
struct ActivePool {
    pool: JobPool,
    started_at: DateTime<Utc>,
    pollers: HashMap<usize, JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
}

impl ActivePool {
    fn new(pool: JobPool) -> Self {
        Self {
            pool,
            started_at: Utc::now(),
            pollers: HashMap::new(),
            timer: None,
        }
    }
}

impl Drop for ActivePool {
    fn drop(&mut self) {
        for (_, poller) in self.pollers.drain() {
            poller.abort();
        }
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct Actor {
    config: OrchestratorConfig,
    reader: DiscoveryStreamReader,
    preparation: Arc<dyn PreparationService>,
    notify: mpsc::UnboundedSender<Notification>,
    pool_tx: mpsc::UnboundedSender<PoolMessage>,
    query: Option<SearchQuery>,
    search: SearchStatus,
    results: Vec<ResultItem>,
    pool: Option<ActivePool>,
    generation: u64,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut stream_rx: mpsc::UnboundedReceiver<StreamDelivery>,
        mut pool_rx: mpsc::UnboundedReceiver<PoolMessage>,
    ) {
        info!(source = self.reader.source().slug(), "Acquisition orchestrator started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.teardown();
                        let _ = reply.send(Ok(()));
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.teardown();
                        break;
                    }
                },
                Some(delivery) = stream_rx.recv() => self.on_stream(delivery),
                Some(message) = pool_rx.recv() => self.on_pool_message(message),
            }
        }
        info!("Acquisition orchestrator stopped");
    }

    fn emit(&self, notification: Notification) {
        if self.notify.send(notification).is_err() {
            debug!("Notification receiver dropped");
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Search { query, reply } => {
                let _ = reply.send(self.search(&query));
            }
            Command::Select { items, reply } => {
                let _ = reply.send(self.select(items));
            }
            Command::ClearSearch { reply } => {
                self.clear_search();
                let _ = reply.send(Ok(()));
            }
            Command::Rename { slot, name, reply } => {
                let result = match self.pool.as_mut() {
                    Some(active) => active.pool.set_name(slot, name).map_err(Into::into),
                    None => Err(OrchestratorError::NoActivePool),
                };
                let _ = reply.send(result);
            }
            Command::Finalize { media_type, reply } => {
                let _ = reply.send(self.finalize(media_type));
            }
            Command::Abandon { reply } => {
                let result = if self.pool.is_some() {
                    self.abandon_pool();
                    Ok(())
                } else {
                    Err(OrchestratorError::NoActivePool)
                };
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(Ok(self.snapshot()));
            }
            // Handled by the run loop.
            Command::Shutdown { reply } => {
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn search(&mut self, raw: &str) -> Result<SearchQuery, OrchestratorError> {
        let query = SearchQuery::new(raw).ok_or(OrchestratorError::EmptyQuery)?;

        if self.pool.is_some() {
            self.abandon_pool();
        }
        self.reader.open(query.clone());
        self.query = Some(query.clone());
        self.search = SearchStatus::Searching;
        self.results.clear();

        self.emit(Notification::SearchStarted {
            query: query.clone(),
        });
        Ok(query)
    }

    fn clear_search(&mut self) {
        self.reader.close();
        self.query = None;
        self.search = SearchStatus::Idle;
        self.results.clear();
        if self.pool.is_some() {
            self.abandon_pool();
        }
    }

    fn on_stream(&mut self, delivery: StreamDelivery) {
        let Some(update) = self.reader.accept(delivery) else {
            return;
        };
        let Some(query) = self.query.clone() else {
            return;
        };

        match update {
            ReaderUpdate::Progress(event) => {
                self.emit(Notification::SearchProgress { query, event });
            }
            ReaderUpdate::Finished(outcome) => {
                SEARCHES.with_label_values(&[outcome.as_str()]).inc();
                SEARCH_RESULTS
                    .with_label_values(&[])
                    .observe(outcome.results().len() as f64);

                self.search = SearchStatus::from(&outcome);
                self.results = outcome.results().to_vec();
                self.emit(Notification::SearchFinished { query, outcome });
            }
        }
    }

    fn select(&mut self, items: Vec<ResultItem>) -> Result<(), OrchestratorError> {
        if items.is_empty() {
            return Err(ValidationError::NoSelection.into());
        }
        if self.pool.is_some() {
            self.abandon_pool();
        }

        self.generation += 1;
        let count = items.len();
        let handles = items.into_iter().map(|item| item.handle).collect();
        let (pool, effects) = JobPool::start(self.generation, handles)?;

        self.pool = Some(ActivePool::new(pool));
        self.emit(Notification::PreparationStarted { items: count });
        self.apply_effects(self.generation, effects);
        Ok(())
    }

    fn finalize(&mut self, media_type: MediaType) -> Result<(), OrchestratorError> {
        let active = self.pool.as_mut().ok_or(OrchestratorError::NoActivePool)?;
        let generation = active.pool.generation();
        let effects = active.pool.finalize_all(media_type)?;
        self.apply_effects(generation, effects);
        Ok(())
    }

    fn abandon_pool(&mut self) {
        let Some(active) = self.pool.as_mut() else {
            return;
        };
        let generation = active.pool.generation();
        match active.pool.abandon() {
            Ok(effects) => self.apply_effects(generation, effects),
            Err(e) => debug!(generation, error = %e, "Pool already closed"),
        }
        self.pool = None;
    }

    fn teardown(&mut self) {
        self.reader.close();
        if self.pool.is_some() {
            self.abandon_pool();
        }
    }

    fn on_pool_message(&mut self, message: PoolMessage) {
        let generation = message.generation();
        let current = self
            .pool
            .as_ref()
            .is_some_and(|active| active.pool.generation() == generation);
        if !current {
            self.discard_stale(message);
            return;
        }
        let Some(active) = self.pool.as_mut() else {
            return;
        };

        let effects = match message {
            PoolMessage::Submitted { slots, result, .. } => active.pool.on_submitted(&slots, result),
            PoolMessage::Polled { slot, result, .. } => {
                let label = match &result {
                    Ok(status) if status.ready => "ready",
                    Ok(_) => "not_ready",
                    Err(_) => "error",
                };
                POLL_CHECKS.with_label_values(&[label]).inc();
                active.pool.on_poll(slot, result)
            }
            PoolMessage::TimedOut { .. } => {
                // The timer has fired; nothing left to abort.
                active.timer = None;
                if active.pool.phase() == PoolPhase::Loading {
                    POOL_TIMEOUTS.inc();
                }
                active.pool.on_timeout()
            }
            PoolMessage::Committed {
                started, result, ..
            } => {
                COMMITS
                    .with_label_values(&[if result.is_ok() { "success" } else { "failed" }])
                    .inc();
                COMMIT_DURATION
                    .with_label_values(&[])
                    .observe(started.elapsed().as_secs_f64());
                active.pool.on_committed(result)
            }
        };
        self.apply_effects(generation, effects);
    }

    /// Late result of a pool that was abandoned or replaced.
    fn discard_stale(&mut self, message: PoolMessage) {
        match message {
            PoolMessage::Submitted {
                generation,
                result: Ok(batch),
                ..
            } => {
                let ids: Vec<JobId> = batch.prepared.iter().map(|d| d.id).collect();
                debug!(generation, ids = ?ids, "Releasing items prepared for a discarded pool");
                self.release(ids);
            }
            PoolMessage::Committed {
                generation, result, ..
            } => {
                warn!(generation, ok = result.is_ok(), "Commit answered after its pool was discarded");
            }
            other => {
                debug!(generation = other.generation(), "Dropping stale pool message");
            }
        }
    }

    fn apply_effects(&mut self, generation: u64, effects: Vec<PoolEffect>) {
        for effect in effects {
            match effect {
                PoolEffect::Submit { slots, handles } => {
                    JOBS_SUBMITTED.inc_by(handles.len() as u64);
                    let preparation = Arc::clone(&self.preparation);
                    let tx = self.pool_tx.clone();
                    tokio::spawn(async move {
                        let result = preparation.prepare(&handles).await;
                        let _ = tx.send(PoolMessage::Submitted {
                            generation,
                            slots,
                            result,
                        });
                    });
                }
                PoolEffect::StartPolling { slot, id } => {
                    let poller = self.spawn_poller(generation, slot, id);
                    match self.pool.as_mut() {
                        Some(active) => {
                            if let Some(previous) = active.pollers.insert(slot, poller) {
                                previous.abort();
                            }
                        }
                        None => poller.abort(),
                    }
                }
                PoolEffect::StopPolling { slot } => {
                    if let Some(poller) = self
                        .pool
                        .as_mut()
                        .and_then(|active| active.pollers.remove(&slot))
                    {
                        poller.abort();
                    }
                }
                PoolEffect::ArmTimeout => {
                    let timeout = self.config.pool_timeout();
                    let tx = self.pool_tx.clone();
                    let timer = tokio::spawn(async move {
                        tokio::time::sleep(timeout).await;
                        let _ = tx.send(PoolMessage::TimedOut { generation });
                    });
                    match self.pool.as_mut() {
                        Some(active) => {
                            if let Some(previous) = active.timer.replace(timer) {
                                previous.abort();
                            }
                        }
                        None => timer.abort(),
                    }
                }
                PoolEffect::DisarmTimeout => {
                    if let Some(timer) = self.pool.as_mut().and_then(|active| active.timer.take()) {
                        timer.abort();
                    }
                }
                PoolEffect::Release { ids } => self.release(ids),
                PoolEffect::Commit(request) => self.spawn_commit(generation, request),
                PoolEffect::Report(event) => self.report(event),
            }
        }

        if self
            .pool
            .as_ref()
            .is_some_and(|active| active.pool.phase() == PoolPhase::Closed)
        {
            self.pool = None;
        }
    }

    fn spawn_poller(&self, generation: u64, slot: usize, id: JobId) -> JoinHandle<()> {
        let preparation = Arc::clone(&self.preparation);
        let tx = self.pool_tx.clone();
        let interval = self.config.poll_interval();
        debug!(generation, slot, job_id = id, "Polling for metadata");

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let result = preparation.status(id).await;
                if tx
                    .send(PoolMessage::Polled {
                        generation,
                        slot,
                        result,
                    })
                    .is_err()
                {
                    break;
                }
            }
        })
    }

    fn spawn_commit(&self, generation: u64, request: FinalizeRequest) {
        let preparation = Arc::clone(&self.preparation);
        let tx = self.pool_tx.clone();
        let started = Instant::now();
        tokio::spawn(async move {
            let result = preparation.finalize(&request).await;
            let _ = tx.send(PoolMessage::Committed {
                generation,
                started,
                result,
            });
        });
    }

    /// Best-effort cancel; failures are only logged.
    fn release(&self, ids: Vec<JobId>) {
        if ids.is_empty() {
            return;
        }
        CANCELLATIONS.inc_by(ids.len() as u64);
        let preparation = Arc::clone(&self.preparation);
        tokio::spawn(async move {
            if let Err(e) = preparation.cancel(&ids).await {
                warn!(ids = ?ids, error = %e, "Failed to release prepared items");
            }
        });
    }

    fn report(&mut self, event: PoolEvent) {
        let notification = match event {
            PoolEvent::EnteredEditing { timed_out } => Notification::PoolReady { timed_out },
            PoolEvent::SubmissionWarnings { errors } => Notification::SubmissionWarnings { errors },
            PoolEvent::SubmissionFailed { message } => {
                Notification::PreparationFailed { message }
            }
            PoolEvent::CommitFailed { message } => Notification::CommitFailed { message },
            PoolEvent::Finalized { ids } => {
                info!(ids = ?ids, "Acquisition started");
                // The selection came from these results; start over.
                self.query = None;
                self.search = SearchStatus::Idle;
                self.results.clear();
                Notification::AcquisitionStarted { ids }
            }
        };
        self.emit(notification);
    }

    fn snapshot(&self) -> OrchestratorSnapshot {
        OrchestratorSnapshot {
            query: self.query.clone(),
            search: self.search,
            results: self.results.clone(),
            pool: self.pool.as_ref().map(|active| PoolSnapshot {
                phase: active.pool.phase(),
                started_at: active.started_at,
                committing: active.pool.is_committing(),
                jobs: active.pool.jobs().iter().map(JobView::from).collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DiscoverySource;
    use crate::preparation::PreparedDescriptor;
    use crate::testing::{fixtures, MockDiscoveryService, MockPreparationService};
    use std::time::Duration;

    fn orchestrator(
        discovery: &Arc<MockDiscoveryService>,
        preparation: &Arc<MockPreparationService>,
    ) -> (AcquisitionOrchestrator, mpsc::UnboundedReceiver<Notification>) {
        AcquisitionOrchestrator::spawn(
            OrchestratorConfig::default(),
            Arc::clone(discovery) as Arc<dyn DiscoveryService>,
            Arc::clone(preparation) as Arc<dyn PreparationService>,
        )
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Notification {
        rx.recv().await.expect("orchestrator stopped")
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let discovery = Arc::new(MockDiscoveryService::new());
        let preparation = Arc::new(MockPreparationService::new());
        let (orchestrator, _rx) = orchestrator(&discovery, &preparation);

        assert_eq!(
            orchestrator.search("   ").await.unwrap_err(),
            OrchestratorError::EmptyQuery
        );
        assert!(discovery.opened_queries().await.is_empty());
    }

    #[tokio::test]
    async fn test_searches_configured_source() {
        let discovery = Arc::new(MockDiscoveryService::new());
        let preparation = Arc::new(MockPreparationService::new());
        let config = OrchestratorConfig {
            source: DiscoverySource::RuTracker,
            ..OrchestratorConfig::default()
        };
        let (orchestrator, mut rx) = AcquisitionOrchestrator::spawn(
            config,
            Arc::clone(&discovery) as Arc<dyn DiscoveryService>,
            Arc::clone(&preparation) as Arc<dyn PreparationService>,
        );

        orchestrator.search("flac").await.unwrap();
        while !matches!(next(&mut rx).await, Notification::SearchFinished { .. }) {}

        let opened = discovery.opened_queries().await;
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].source, DiscoverySource::RuTracker);
        assert_eq!(opened[0].query, "flac");
    }

    #[tokio::test]
    async fn test_empty_selection_rejected_without_network() {
        let discovery = Arc::new(MockDiscoveryService::new());
        let preparation = Arc::new(MockPreparationService::new());
        let (orchestrator, _rx) = orchestrator(&discovery, &preparation);

        assert_eq!(
            orchestrator.select_for_batch(vec![]).await.unwrap_err(),
            OrchestratorError::Validation(ValidationError::NoSelection)
        );
        assert!(preparation.prepare_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_commands_without_pool() {
        let discovery = Arc::new(MockDiscoveryService::new());
        let preparation = Arc::new(MockPreparationService::new());
        let (orchestrator, _rx) = orchestrator(&discovery, &preparation);

        assert_eq!(
            orchestrator.finalize(MediaType::Movies).await.unwrap_err(),
            OrchestratorError::NoActivePool
        );
        assert_eq!(
            orchestrator.rename(0, "x").await.unwrap_err(),
            OrchestratorError::NoActivePool
        );
        assert_eq!(
            orchestrator.abandon().await.unwrap_err(),
            OrchestratorError::NoActivePool
        );
    }

    #[tokio::test]
    async fn test_shutdown_closes_handle() {
        let discovery = Arc::new(MockDiscoveryService::new());
        let preparation = Arc::new(MockPreparationService::new());
        let (orchestrator, _rx) = orchestrator(&discovery, &preparation);

        orchestrator.shutdown().await.unwrap();
        assert_eq!(
            orchestrator.snapshot().await.unwrap_err(),
            OrchestratorError::Closed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_submission_is_released_after_abandon() {
        let discovery = Arc::new(MockDiscoveryService::new());
        let preparation = Arc::new(MockPreparationService::new());
        preparation.set_prepare_delay(Duration::from_secs(5)).await;
        preparation
            .push_prepared(vec![PreparedDescriptor::pending(21)])
            .await;
        let (orchestrator, mut rx) = orchestrator(&discovery, &preparation);

        orchestrator
            .select_for_single(fixtures::magnet_item("1", "Slow"))
            .await
            .unwrap();
        assert_eq!(next(&mut rx).await, Notification::PreparationStarted { items: 1 });
        orchestrator.abandon().await.unwrap();
        assert!(orchestrator.snapshot().await.unwrap().pool.is_none());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(preparation.cancel_calls().await, vec![vec![21]]);
        assert_eq!(preparation.status_calls(21).await, 0);
    }
}
