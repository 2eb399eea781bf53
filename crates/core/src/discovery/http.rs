//! HTTP discovery backend: consumes the scraping service's event stream.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use tracing::debug;

use crate::config::ServiceConfig;

use super::sse::{parse_event, SseDecoder};
use super::{DiscoveryError, DiscoveryService, DiscoverySource, DiscoveryStream, SearchQuery};

/// Discovery client for the scraping service's `text/event-stream` endpoints.
pub struct HttpDiscoveryClient {
    client: Client,
    config: ServiceConfig,
}

impl HttpDiscoveryClient {
    /// Create a new discovery client.
    ///
    /// No overall request timeout is set: a stream stays open for as long as the
    /// service keeps trying mirrors. Only connection establishment is bounded.
    pub fn new(config: ServiceConfig) -> Result<Self, DiscoveryError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| DiscoveryError::ConnectionFailed(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn stream_url(&self, source: DiscoverySource, query: &SearchQuery) -> String {
        format!(
            "{}/scrape/{}/stream/{}",
            self.base_url(),
            source.slug(),
            query.path_encoded()
        )
    }
}

fn map_reqwest_error(e: reqwest::Error) -> DiscoveryError {
    if e.is_timeout() {
        DiscoveryError::Timeout
    } else if e.is_connect() {
        DiscoveryError::ConnectionFailed(e.to_string())
    } else {
        DiscoveryError::ApiError(e.to_string())
    }
}

/// State threaded through the unfolded event stream.
struct StreamState<S> {
    body: S,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    source: DiscoverySource,
    done: bool,
}

#[async_trait]
impl DiscoveryService for HttpDiscoveryClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn open_stream(
        &self,
        source: DiscoverySource,
        query: &SearchQuery,
    ) -> Result<DiscoveryStream, DiscoveryError> {
        let url = self.stream_url(source, query);
        debug!(source = source.slug(), query = %query, "Opening discovery stream");

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DiscoveryError::ApiError(format!(
                "HTTP {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let state = StreamState {
            body: Box::pin(response.bytes_stream()),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            source,
            done: false,
        };

        let events = stream::unfold(state, |mut state| async move {
            loop {
                if state.done {
                    return None;
                }
                if let Some(payload) = state.pending.pop_front() {
                    let event = parse_event(&payload, state.source);
                    // Completed and errors end the stream.
                    state.done = event.as_ref().map(|e| e.is_terminal()).unwrap_or(true);
                    return Some((event, state));
                }
                match state.body.next().await {
                    Some(Ok(chunk)) => match state.decoder.push(&chunk) {
                        Ok(payloads) => state.pending.extend(payloads),
                        Err(e) => {
                            state.done = true;
                            return Some((Err(e), state));
                        }
                    },
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((Err(map_reqwest_error(e)), state));
                    }
                    None => {
                        state.done = true;
                        return Some((Err(DiscoveryError::StreamEnded), state));
                    }
                }
            }
        });

        Ok(events.boxed())
    }
}
