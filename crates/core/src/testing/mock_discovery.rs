//! Mock discovery service for testing.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::discovery::{
    DiscoveryError, DiscoveryEvent, DiscoveryService, DiscoverySource, DiscoveryStream,
    SearchQuery,
};

type Script = Vec<Result<DiscoveryEvent, DiscoveryError>>;

/// A recorded stream opening for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedOpen {
    pub source: DiscoverySource,
    pub query: String,
}

/// Mock implementation of the DiscoveryService trait.
///
/// Each query plays back a scripted event sequence. A script that does not
/// end in `Completed` or an error simply ends, like a dropped connection.
/// Queries without a script complete immediately with no results.
///
/// # Example
///
/// ```rust,ignore
/// let discovery = MockDiscoveryService::new();
/// discovery.set_script("ubuntu", vec![
///     Ok(fixtures::attempting("Main Site")),
///     Ok(fixtures::completed(vec![fixtures::magnet_item("1", "Ubuntu")])),
/// ]).await;
/// ```
#[derive(Debug, Default)]
pub struct MockDiscoveryService {
    scripts: Arc<RwLock<HashMap<String, Script>>>,
    open_errors: Arc<RwLock<HashMap<String, DiscoveryError>>>,
    opened: Arc<RwLock<Vec<RecordedOpen>>>,
    /// Delay before each event is yielded.
    event_delay: Arc<RwLock<Duration>>,
}

impl MockDiscoveryService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the events streamed for `query`.
    pub async fn set_script(&self, query: &str, events: Script) {
        self.scripts.write().await.insert(query.to_string(), events);
    }

    /// Make opening a stream for `query` fail.
    pub async fn set_open_error(&self, query: &str, error: DiscoveryError) {
        self.open_errors
            .write()
            .await
            .insert(query.to_string(), error);
    }

    pub async fn set_event_delay(&self, delay: Duration) {
        *self.event_delay.write().await = delay;
    }

    /// Queries for which a stream was opened, in order.
    pub async fn opened_queries(&self) -> Vec<RecordedOpen> {
        self.opened.read().await.clone()
    }
}

#[async_trait]
impl DiscoveryService for MockDiscoveryService {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open_stream(
        &self,
        source: DiscoverySource,
        query: &SearchQuery,
    ) -> Result<DiscoveryStream, DiscoveryError> {
        self.opened.write().await.push(RecordedOpen {
            source,
            query: query.as_str().to_string(),
        });

        if let Some(error) = self.open_errors.read().await.get(query.as_str()) {
            return Err(error.clone());
        }

        let script = self
            .scripts
            .read()
            .await
            .get(query.as_str())
            .cloned()
            .unwrap_or_else(|| {
                vec![Ok(DiscoveryEvent::Completed {
                    message: "No results found".to_string(),
                    results: Vec::new(),
                })]
            });
        let delay = *self.event_delay.read().await;

        Ok(stream::iter(script)
            .then(move |event| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                event
            })
            .boxed())
    }
}
