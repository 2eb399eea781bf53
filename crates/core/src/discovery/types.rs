//! Types for the discovery (indexer search) stream.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A validated search query: trimmed and never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SearchQuery(String);

impl SearchQuery {
    /// Trim the raw input; returns `None` if nothing is left.
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Percent-encoded form for use as a path segment.
    pub fn path_encoded(&self) -> String {
        urlencoding::encode(&self.0).into_owned()
    }
}

impl std::fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of download handle an indexer hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleKind {
    Magnet,
    TorrentUrl,
}

/// Indexers the scraping service can stream results from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    #[default]
    ThePirateBay,
    RuTracker,
}

impl DiscoverySource {
    /// Path segment used by the scraping service.
    pub fn slug(&self) -> &'static str {
        match self {
            DiscoverySource::ThePirateBay => "piratebay",
            DiscoverySource::RuTracker => "rutracker",
        }
    }

    /// Which item field carries the download handle for this source.
    pub fn handle_kind(&self) -> HandleKind {
        match self {
            DiscoverySource::ThePirateBay => HandleKind::Magnet,
            DiscoverySource::RuTracker => HandleKind::TorrentUrl,
        }
    }
}

/// Where an item can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DownloadHandle {
    /// Magnet URI.
    Magnet(String),
    /// Remote `.torrent` file URL (requires the service to log in and fetch it).
    TorrentUrl(String),
}

impl DownloadHandle {
    pub fn kind(&self) -> HandleKind {
        match self {
            DownloadHandle::Magnet(_) => HandleKind::Magnet,
            DownloadHandle::TorrentUrl(_) => HandleKind::TorrentUrl,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DownloadHandle::Magnet(uri) => uri,
            DownloadHandle::TorrentUrl(url) => url,
        }
    }
}

/// One discovered entry. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultItem {
    /// Identifier, unique within one search response.
    pub id: String,
    pub title: String,
    pub category: String,
    pub uploader: String,
    /// Human readable size as reported by the indexer (e.g. "1.4 GiB").
    pub size: String,
    pub upload_date: String,
    pub seeders: u32,
    pub leechers: u32,
    /// Torrent page on the indexer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_url: Option<String>,
    pub handle: DownloadHandle,
}

/// Indexer mirror an event refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLabel {
    pub host: String,
    pub label: String,
}

/// A server-pushed progress or result event, delivered in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Attempting {
        source: SourceLabel,
        message: String,
    },
    SourceSucceeded {
        source: SourceLabel,
        message: String,
    },
    SourceFailed {
        source: SourceLabel,
        message: String,
    },
    /// Always the last event of a stream.
    Completed {
        message: String,
        results: Vec<ResultItem>,
    },
}

impl DiscoveryEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DiscoveryEvent::Completed { .. })
    }

    /// Wire name of the event type.
    pub fn kind(&self) -> &'static str {
        match self {
            DiscoveryEvent::Attempting { .. } => "trying",
            DiscoveryEvent::SourceSucceeded { .. } => "success",
            DiscoveryEvent::SourceFailed { .. } => "error",
            DiscoveryEvent::Completed { .. } => "complete",
        }
    }
}

/// Final outcome of one search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// At least one item was found.
    Found(Vec<ResultItem>),
    /// The search completed but nothing matched.
    NoResults { message: String },
    /// The search could not be performed.
    ConnectionError { message: String },
}

impl SearchOutcome {
    /// Outcome for a `complete` event.
    pub fn from_completion(message: String, results: Vec<ResultItem>) -> Self {
        if results.is_empty() {
            SearchOutcome::NoResults { message }
        } else {
            SearchOutcome::Found(results)
        }
    }

    pub fn results(&self) -> &[ResultItem] {
        match self {
            SearchOutcome::Found(items) => items,
            _ => &[],
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SearchOutcome::ConnectionError { .. })
    }

    /// Label for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchOutcome::Found(_) => "found",
            SearchOutcome::NoResults { .. } => "no_results",
            SearchOutcome::ConnectionError { .. } => "connection_error",
        }
    }
}

/// Errors that can occur while consuming a discovery stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("Discovery service connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Discovery service API error: {0}")]
    ApiError(String),

    #[error("Malformed discovery event: {0}")]
    MalformedEvent(String),

    #[error("Discovery stream ended before completion")]
    StreamEnded,

    #[error("Request timeout")]
    Timeout,
}

/// Stream of discovery events for one query.
pub type DiscoveryStream = BoxStream<'static, Result<DiscoveryEvent, DiscoveryError>>;

/// Trait for discovery backends.
#[async_trait]
pub trait DiscoveryService: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Open a long-lived event stream for `query` against `source`.
    async fn open_stream(
        &self,
        source: DiscoverySource,
        query: &SearchQuery,
    ) -> Result<DiscoveryStream, DiscoveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_query_trims() {
        let query = SearchQuery::new("  ubuntu 24.04 ").unwrap();
        assert_eq!(query.as_str(), "ubuntu 24.04");
        assert_eq!(query.path_encoded(), "ubuntu%2024.04");
    }

    #[test]
    fn test_search_query_rejects_blank() {
        assert!(SearchQuery::new("").is_none());
        assert!(SearchQuery::new(" \t\n").is_none());
    }

    #[test]
    fn test_source_slugs_and_handle_kinds() {
        assert_eq!(DiscoverySource::ThePirateBay.slug(), "piratebay");
        assert_eq!(DiscoverySource::RuTracker.slug(), "rutracker");
        assert_eq!(DiscoverySource::ThePirateBay.handle_kind(), HandleKind::Magnet);
        assert_eq!(DiscoverySource::RuTracker.handle_kind(), HandleKind::TorrentUrl);
    }

    #[test]
    fn test_outcome_from_empty_completion_is_no_results() {
        let outcome = SearchOutcome::from_completion("All sources failed".into(), vec![]);
        assert_eq!(
            outcome,
            SearchOutcome::NoResults {
                message: "All sources failed".into()
            }
        );
        assert!(!outcome.is_error());
        assert!(outcome.results().is_empty());
    }

    #[test]
    fn test_download_handle_serialization() {
        let handle = DownloadHandle::Magnet("magnet:?xt=urn:btih:abc".to_string());
        let json = serde_json::to_string(&handle).unwrap();
        assert_eq!(json, r#"{"kind":"magnet","value":"magnet:?xt=urn:btih:abc"}"#);
        assert_eq!(handle.kind(), HandleKind::Magnet);
    }
}
