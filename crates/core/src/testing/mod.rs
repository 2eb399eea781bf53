//! Testing utilities and mock implementations for lifecycle tests.
//!
//! This module provides mock implementations of the discovery and
//! preparation service traits, allowing the orchestrator to be driven end to
//! end without a scraping service or download backend.
//!
//! # Example
//!
//! ```rust,ignore
//! use scout_core::testing::{fixtures, MockDiscoveryService, MockPreparationService};
//!
//! let discovery = MockDiscoveryService::new();
//! let preparation = MockPreparationService::new();
//!
//! // Configure mock responses
//! discovery.set_script("ubuntu", vec![Ok(fixtures::completed(vec![]))]).await;
//! preparation.push_prepared(vec![PreparedDescriptor::pending(7)]).await;
//! ```

mod mock_discovery;
mod mock_preparation;

pub use mock_discovery::{MockDiscoveryService, RecordedOpen};
pub use mock_preparation::MockPreparationService;

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::discovery::{DiscoveryEvent, DownloadHandle, ResultItem, SourceLabel};

    fn item(id: &str, title: &str, handle: DownloadHandle) -> ResultItem {
        ResultItem {
            id: id.to_string(),
            title: title.to_string(),
            category: "Applications".to_string(),
            uploader: "mock-uploader".to_string(),
            size: "4.7 GiB".to_string(),
            upload_date: "2024-04-25".to_string(),
            seeders: 120,
            leechers: 8,
            description_url: None,
            handle,
        }
    }

    /// A result carrying a magnet link, as The Pirate Bay returns them.
    pub fn magnet_item(id: &str, title: &str) -> ResultItem {
        item(
            id,
            title,
            DownloadHandle::Magnet(format!("magnet:?xt=urn:btih:{:0>40}&dn={}", id, urlencoding::encode(title))),
        )
    }

    /// A result carrying a `.torrent` URL, as RuTracker returns them.
    pub fn url_item(id: &str, title: &str) -> ResultItem {
        let mut item = item(
            id,
            title,
            DownloadHandle::TorrentUrl(format!("https://rutracker.example/forum/dl.php?t={}", id)),
        );
        item.description_url = Some(format!("https://rutracker.example/forum/viewtopic.php?t={}", id));
        item
    }

    fn label(name: &str) -> SourceLabel {
        SourceLabel {
            host: format!("{}.example", name.to_lowercase().replace(' ', "-")),
            label: name.to_string(),
        }
    }

    pub fn attempting(source: &str) -> DiscoveryEvent {
        DiscoveryEvent::Attempting {
            source: label(source),
            message: format!("Trying {}...", source),
        }
    }

    pub fn source_failed(source: &str) -> DiscoveryEvent {
        DiscoveryEvent::SourceFailed {
            source: label(source),
            message: format!("{} failed", source),
        }
    }

    pub fn completed(results: Vec<ResultItem>) -> DiscoveryEvent {
        let message = if results.is_empty() {
            "No results found".to_string()
        } else {
            format!("Found {} results", results.len())
        };
        DiscoveryEvent::Completed { message, results }
    }
}
