//! Server-Sent-Events framing and wire event mapping for the scraping service.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::{DiscoveryError, DiscoveryEvent, DiscoverySource, DownloadHandle, HandleKind, ResultItem, SourceLabel};

/// Largest frame accepted before the stream is treated as malformed.
/// A `complete` frame carries the whole result array, so this is generous.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Incremental decoder for `text/event-stream` bodies.
///
/// Bytes may arrive split anywhere (including inside a UTF-8 sequence); a frame
/// is only decoded once its terminating blank line has been received.
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already searched for a separator.
    scanned: usize,
    max_frame: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_frame(MAX_FRAME_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_frame,
        }
    }

    /// Feed a chunk and return the `data` payloads of every completed frame.
    ///
    /// Fails once more than the frame limit is buffered without a separator.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, DiscoveryError> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        // A separator may straddle the previous chunk boundary.
        let mut from = self.scanned.saturating_sub(3);
        while let Some((end, sep_len)) = find_frame_end(&self.buffer, from) {
            let frame: Vec<u8> = self.buffer.drain(..end + sep_len).take(end).collect();
            let frame = String::from_utf8(frame)
                .map_err(|e| DiscoveryError::MalformedEvent(format!("invalid UTF-8: {}", e)))?;
            if let Some(data) = frame_data(&frame) {
                payloads.push(data);
            }
            from = 0;
        }
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.max_frame {
            let len = self.buffer.len();
            self.buffer.clear();
            self.scanned = 0;
            return Err(DiscoveryError::MalformedEvent(format!(
                "event frame exceeds {} bytes ({} buffered)",
                self.max_frame, len
            )));
        }
        Ok(payloads)
    }

    /// Whether undecoded bytes are still buffered.
    pub fn has_pending(&self) -> bool {
        self.buffer.iter().any(|b| !b.is_ascii_whitespace())
    }
}

/// Locate the first blank-line separator at or after `from`, returning
/// (frame length, separator length).
fn find_frame_end(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let tail = buf.get(from..)?;
    let lf = tail.windows(2).position(|w| w == b"\n\n").map(|i| (from + i, 2));
    let crlf = tail
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| (from + i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Join the `data:` lines of a frame. Comment-only frames yield `None`.
fn frame_data(frame: &str) -> Option<String> {
    let lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Event as emitted by the scraping service.
#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    host: String,
    #[serde(default)]
    label: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Item as emitted by either indexer scraper.
#[derive(Debug, Deserialize)]
struct WireItem {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    uploader: String,
    #[serde(default)]
    size: String,
    #[serde(default)]
    upload_date: String,
    #[serde(default, deserialize_with = "lenient_count")]
    se: u32,
    #[serde(default, deserialize_with = "lenient_count")]
    le: u32,
    #[serde(default)]
    description_url: Option<String>,
    #[serde(default)]
    magnet: Option<String>,
    #[serde(default)]
    download_url: Option<String>,
}

/// Seeder/leecher counts arrive as numbers from one scraper and strings from the other.
fn lenient_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64().map(|n| n.min(u32::MAX as u64) as u32).unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

impl WireItem {
    fn into_result_item(self, source: DiscoverySource) -> Result<ResultItem, DiscoveryError> {
        let handle = match source.handle_kind() {
            HandleKind::Magnet => self.magnet.filter(|m| !m.is_empty()).map(DownloadHandle::Magnet),
            HandleKind::TorrentUrl => self
                .download_url
                .filter(|u| !u.is_empty())
                .map(DownloadHandle::TorrentUrl),
        };
        let handle = handle.ok_or_else(|| {
            DiscoveryError::MalformedEvent(format!("item '{}' has no download handle", self.id))
        })?;

        Ok(ResultItem {
            id: self.id,
            title: self.title,
            category: self.category,
            uploader: self.uploader,
            size: self.size,
            upload_date: self.upload_date,
            seeders: self.se,
            leechers: self.le,
            description_url: self.description_url.filter(|u| !u.is_empty()),
            handle,
        })
    }
}

/// Decode one `data` payload into a [`DiscoveryEvent`].
pub fn parse_event(payload: &str, source: DiscoverySource) -> Result<DiscoveryEvent, DiscoveryError> {
    let wire: WireEvent = serde_json::from_str(payload)
        .map_err(|e| DiscoveryError::MalformedEvent(format!("invalid event JSON: {}", e)))?;

    let label = || SourceLabel {
        host: wire.host.clone(),
        label: wire.label.clone(),
    };

    match wire.kind.as_str() {
        "trying" => Ok(DiscoveryEvent::Attempting {
            source: label(),
            message: wire.message.clone(),
        }),
        "success" => Ok(DiscoveryEvent::SourceSucceeded {
            source: label(),
            message: wire.message.clone(),
        }),
        "error" => Ok(DiscoveryEvent::SourceFailed {
            source: label(),
            message: wire.message.clone(),
        }),
        "complete" => {
            let items: Vec<WireItem> = match wire.data {
                None | Some(Value::Null) => Vec::new(),
                Some(data) => serde_json::from_value(data).map_err(|e| {
                    DiscoveryError::MalformedEvent(format!("invalid result array: {}", e))
                })?,
            };
            let results = items
                .into_iter()
                .map(|item| item.into_result_item(source))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(DiscoveryEvent::Completed {
                message: wire.message,
                results,
            })
        }
        other => Err(DiscoveryError::MalformedEvent(format!(
            "unknown event type '{}'",
            other
        ))),
    }
}
