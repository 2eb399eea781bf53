//! Indexer discovery.
//!
//! This module provides a `DiscoveryService` trait for opening progressive,
//! multi-source search streams, an HTTP implementation speaking the scraping
//! service's event stream, and the `DiscoveryStreamReader` that consumes one
//! stream at a time.

mod http;
mod reader;
pub mod sse;
mod types;

pub use http::HttpDiscoveryClient;
pub use reader::{DiscoveryStreamReader, ReaderUpdate, StreamDelivery, StreamHandle, StreamMessage};
pub use types::*;
