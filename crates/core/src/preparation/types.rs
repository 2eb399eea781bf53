//! Types for the preparation service (paused add, metadata polling, commit).

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::discovery::DownloadHandle;

/// Identifier the download service assigns to a prepared item.
pub type JobId = i64;

/// Errors that can occur while talking to the preparation service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PreparationError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Request timeout")]
    Timeout,
}

impl PreparationError {
    /// Whether this is a transport failure rather than a server verdict.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            PreparationError::ConnectionFailed(_) | PreparationError::Timeout
        )
    }
}

/// Treat a JSON `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Descriptor returned when a handle is added (paused) to the download service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedDescriptor {
    pub id: JobId,
    /// Resolved name; empty or a placeholder while metadata is unknown.
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    pub ready: bool,
}

impl PreparedDescriptor {
    pub fn ready(id: JobId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ready: true,
        }
    }

    pub fn pending(id: JobId) -> Self {
        Self {
            id,
            name: String::new(),
            ready: false,
        }
    }
}

/// Result of a (possibly batched) prepare call.
///
/// The service may prepare fewer items than requested; per-item failures are
/// reported as free-form strings in `errors`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedBatch {
    #[serde(rename = "torrents", default, deserialize_with = "null_as_default")]
    pub prepared: Vec<PreparedDescriptor>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub errors: Vec<String>,
}

/// Metadata readiness reported by the per-id status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepareStatus {
    pub id: JobId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    pub ready: bool,
    /// Metadata progress in 0.0 - 1.0.
    #[serde(rename = "metadataPercentComplete", default)]
    pub metadata_progress: f64,
}

/// Classification shared by every item of one commit; selects the target library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    Movies,
    Series,
    Music,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movies => "Movies",
            MediaType::Series => "Series",
            MediaType::Music => "Music",
        }
    }
}

impl std::str::FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Movies" => Ok(MediaType::Movies),
            "Series" => Ok(MediaType::Series),
            "Music" => Ok(MediaType::Music),
            other => Err(format!("invalid content type: {}", other)),
        }
    }
}

/// One item of a commit call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeEntry {
    pub id: JobId,
    /// Only set when the user changed the resolved name.
    #[serde(rename = "newName", default, skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,
}

/// Commit request: the whole batch is started atomically from the caller's view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub torrents: Vec<FinalizeEntry>,
    #[serde(rename = "contentType")]
    pub content_type: MediaType,
}

impl FinalizeRequest {
    pub fn ids(&self) -> Vec<JobId> {
        self.torrents.iter().map(|t| t.id).collect()
    }
}

/// Successful commit response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeReceipt {
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(rename = "torrentIds", default, deserialize_with = "null_as_default")]
    pub started_ids: Vec<JobId>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub errors: Vec<String>,
}

/// Trait for preparation backends.
#[async_trait]
pub trait PreparationService: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Add handles paused and report what the service knows about each.
    async fn prepare(&self, handles: &[DownloadHandle]) -> Result<PreparedBatch, PreparationError>;

    /// Check metadata readiness of a prepared item.
    async fn status(&self, id: JobId) -> Result<PrepareStatus, PreparationError>;

    /// Release prepared items that will not be committed. Best-effort.
    async fn cancel(&self, ids: &[JobId]) -> Result<(), PreparationError>;

    /// Rename (optionally) and start every item of the request.
    async fn finalize(&self, request: &FinalizeRequest) -> Result<FinalizeReceipt, PreparationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepared_batch_tolerates_nulls() {
        let batch: PreparedBatch =
            serde_json::from_str(r#"{"torrents":null,"errors":["Failed to add torrent"]}"#).unwrap();
        assert!(batch.prepared.is_empty());
        assert_eq!(batch.errors, vec!["Failed to add torrent".to_string()]);

        let batch: PreparedBatch =
            serde_json::from_str(r#"{"torrents":[{"id":3,"name":"","ready":false}]}"#).unwrap();
        assert_eq!(batch.prepared, vec![PreparedDescriptor::pending(3)]);
        assert!(batch.errors.is_empty());
    }

    #[test]
    fn test_status_deserialization() {
        let status: PrepareStatus = serde_json::from_str(
            r#"{"id":7,"name":"Foo","ready":true,"metadataPercentComplete":1.0}"#,
        )
        .unwrap();
        assert_eq!(status.id, 7);
        assert!(status.ready);
        assert!((status.metadata_progress - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_finalize_request_wire_format() {
        let request = FinalizeRequest {
            torrents: vec![
                FinalizeEntry {
                    id: 1,
                    new_name: None,
                },
                FinalizeEntry {
                    id: 2,
                    new_name: Some("Renamed".to_string()),
                },
            ],
            content_type: MediaType::Series,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "torrents": [{"id": 1}, {"id": 2, "newName": "Renamed"}],
                "contentType": "Series"
            })
        );
        assert_eq!(request.ids(), vec![1, 2]);
    }

    #[test]
    fn test_media_type_parse() {
        assert_eq!("Music".parse::<MediaType>(), Ok(MediaType::Music));
        assert!("../etc".parse::<MediaType>().is_err());
        assert_eq!(MediaType::Movies.as_str(), "Movies");
    }

    #[test]
    fn test_receipt_with_null_errors() {
        let receipt: FinalizeReceipt = serde_json::from_str(
            r#"{"message":"Torrents started","torrentIds":[4,5],"errors":null}"#,
        )
        .unwrap();
        assert_eq!(receipt.started_ids, vec![4, 5]);
        assert!(receipt.errors.is_empty());
    }
}
