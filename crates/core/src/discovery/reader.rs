//! Consumes one discovery stream at a time and turns it into progress updates
//! and a final [`SearchOutcome`].

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{DiscoveryError, DiscoveryEvent, DiscoveryService, DiscoverySource, SearchOutcome, SearchQuery};

/// Raw message pushed by the stream task, tagged with the stream generation.
#[derive(Debug, Clone)]
pub struct StreamDelivery {
    pub generation: u64,
    pub message: StreamMessage,
}

#[derive(Debug, Clone)]
pub enum StreamMessage {
    Event(DiscoveryEvent),
    Failed(DiscoveryError),
}

/// What the caller should surface after accepting a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderUpdate {
    /// Transient status (trying / success / error for one mirror).
    Progress(DiscoveryEvent),
    /// The stream is over; replaces any prior result set.
    Finished(SearchOutcome),
}

/// Identifies one opened stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHandle {
    pub generation: u64,
    pub query: SearchQuery,
}

enum ReaderState {
    Idle,
    Open {
        handle: StreamHandle,
        task: JoinHandle<()>,
    },
}

/// Reads one discovery stream at a time.
///
/// Deliveries travel through the `observer` channel and must be passed back to
/// [`accept`](Self::accept), which drops anything belonging to a closed or
/// superseded stream.
pub struct DiscoveryStreamReader {
    service: Arc<dyn DiscoveryService>,
    source: DiscoverySource,
    observer: mpsc::UnboundedSender<StreamDelivery>,
    generation: u64,
    state: ReaderState,
}

impl DiscoveryStreamReader {
    pub fn new(
        service: Arc<dyn DiscoveryService>,
        source: DiscoverySource,
        observer: mpsc::UnboundedSender<StreamDelivery>,
    ) -> Self {
        Self {
            service,
            source,
            observer,
            generation: 0,
            state: ReaderState::Idle,
        }
    }

    pub fn source(&self) -> DiscoverySource {
        self.source
    }

    /// Open a stream for `query`, closing any previous one first.
    pub fn open(&mut self, query: SearchQuery) -> StreamHandle {
        self.close();

        self.generation += 1;
        let handle = StreamHandle {
            generation: self.generation,
            query: query.clone(),
        };

        let service = Arc::clone(&self.service);
        let source = self.source;
        let tx = self.observer.clone();
        let generation = self.generation;

        let task = tokio::spawn(async move {
            let send = |message: StreamMessage| {
                tx.send(StreamDelivery {
                    generation,
                    message,
                })
                .is_ok()
            };

            let mut stream = match service.open_stream(source, &query).await {
                Ok(stream) => stream,
                Err(e) => {
                    send(StreamMessage::Failed(e));
                    return;
                }
            };

            while let Some(item) = stream.next().await {
                match item {
                    Ok(event) => {
                        let terminal = event.is_terminal();
                        if !send(StreamMessage::Event(event)) || terminal {
                            return;
                        }
                    }
                    Err(e) => {
                        send(StreamMessage::Failed(e));
                        return;
                    }
                }
            }

            send(StreamMessage::Failed(DiscoveryError::StreamEnded));
        });

        info!(generation, source = source.slug(), query = %handle.query, "Discovery stream opened");
        self.state = ReaderState::Open {
            handle: handle.clone(),
            task,
        };
        handle
    }

    /// Release the transport and suppress further deliveries. Idempotent.
    ///
    /// Returns true if a stream was actually open.
    pub fn close(&mut self) -> bool {
        match std::mem::replace(&mut self.state, ReaderState::Idle) {
            ReaderState::Open { handle, task } => {
                task.abort();
                debug!(generation = handle.generation, query = %handle.query, "Discovery stream closed");
                true
            }
            ReaderState::Idle => false,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, ReaderState::Open { .. })
    }

    /// The currently open stream, if any.
    pub fn current(&self) -> Option<&StreamHandle> {
        match &self.state {
            ReaderState::Open { handle, .. } => Some(handle),
            ReaderState::Idle => None,
        }
    }

    /// Apply a delivery. Returns `None` for deliveries of closed or superseded streams.
    pub fn accept(&mut self, delivery: StreamDelivery) -> Option<ReaderUpdate> {
        let current = match &self.state {
            ReaderState::Open { handle, .. } if handle.generation == delivery.generation => {
                handle.generation
            }
            _ => {
                debug!(generation = delivery.generation, "Dropping stale discovery delivery");
                return None;
            }
        };

        match delivery.message {
            StreamMessage::Event(DiscoveryEvent::Completed { message, results }) => {
                self.close();
                info!(generation = current, results = results.len(), "Discovery stream completed");
                Some(ReaderUpdate::Finished(SearchOutcome::from_completion(
                    message, results,
                )))
            }
            StreamMessage::Event(event) => Some(ReaderUpdate::Progress(event)),
            StreamMessage::Failed(e) => {
                self.close();
                warn!(generation = current, error = %e, "Discovery stream failed");
                Some(ReaderUpdate::Finished(SearchOutcome::ConnectionError {
                    message: e.to_string(),
                }))
            }
        }
    }
}

impl Drop for DiscoveryStreamReader {
    fn drop(&mut self) {
        self.close();
    }
}
