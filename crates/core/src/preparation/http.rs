//! HTTP preparation backend.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ServiceConfig;
use crate::discovery::{DownloadHandle, HandleKind};
use crate::metrics::{EXTERNAL_SERVICE_DURATION, EXTERNAL_SERVICE_REQUESTS};

use super::{
    FinalizeReceipt, FinalizeRequest, JobId, PrepareStatus, PreparationError, PreparationService,
    PreparedBatch, PreparedDescriptor,
};

/// Preparation client for the download service's REST endpoints.
pub struct HttpPreparationClient {
    client: Client,
    config: ServiceConfig,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct BatchMagnetRequest<'a> {
    #[serde(rename = "magnetLinks")]
    magnet_links: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct BatchUrlRequest<'a> {
    urls: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct CancelRequest<'a> {
    ids: &'a [JobId],
}

fn map_reqwest_error(e: reqwest::Error) -> PreparationError {
    if e.is_timeout() {
        PreparationError::Timeout
    } else if e.is_connect() {
        PreparationError::ConnectionFailed(e.to_string())
    } else {
        PreparationError::ApiError(e.to_string())
    }
}

fn record_call(endpoint: &str, started: Instant, success: bool) {
    EXTERNAL_SERVICE_DURATION
        .with_label_values(&["preparation", endpoint])
        .observe(started.elapsed().as_secs_f64());
    EXTERNAL_SERVICE_REQUESTS
        .with_label_values(&["preparation", endpoint, if success { "success" } else { "error" }])
        .inc();
}

impl HttpPreparationClient {
    /// Create a new preparation client.
    pub fn new(config: ServiceConfig) -> Result<Self, PreparationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| PreparationError::ConnectionFailed(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url(), endpoint)
    }

    /// Decode a JSON body, turning non-2xx responses into `Rejected` with the
    /// server's `error` message when it provides one.
    async fn decode<T: DeserializeOwned>(
        endpoint: &'static str,
        started: Instant,
        response: Response,
    ) -> Result<T, PreparationError> {
        let status = response.status();
        record_call(endpoint, started, status.is_success());

        let body = response.text().await.map_err(map_reqwest_error)?;

        if status.as_u16() == 404 {
            return Err(PreparationError::InvalidResponse(format!(
                "HTTP 404 from {}",
                endpoint
            )));
        }

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or_else(|_| {
                    format!(
                        "HTTP {}: {}",
                        status,
                        body.chars().take(200).collect::<String>()
                    )
                });
            return Err(PreparationError::Rejected(message));
        }

        serde_json::from_str(&body).map_err(|e| {
            PreparationError::InvalidResponse(format!("Failed to parse response: {}", e))
        })
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        params: &[(&str, &str)],
    ) -> Result<T, PreparationError> {
        let started = Instant::now();
        let response = self
            .client
            .post(self.url(endpoint))
            .form(params)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Self::decode(endpoint, started, response).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        body: &B,
    ) -> Result<T, PreparationError> {
        let started = Instant::now();
        let response = self
            .client
            .post(self.url(endpoint))
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Self::decode(endpoint, started, response).await
    }

    /// Prepare a single handle through the single-item endpoints.
    async fn prepare_one(&self, handle: &DownloadHandle) -> Result<PreparedBatch, PreparationError> {
        let descriptor: PreparedDescriptor = match handle {
            DownloadHandle::Magnet(uri) => {
                self.post_form("/download/prepare", &[("magnetLink", uri.as_str())])
                    .await?
            }
            DownloadHandle::TorrentUrl(url) => {
                self.post_form("/download/file/prepare", &[("url", url.as_str())])
                    .await?
            }
        };
        Ok(PreparedBatch {
            prepared: vec![descriptor],
            errors: Vec::new(),
        })
    }

    /// Prepare handles of one kind through the batch endpoint.
    async fn prepare_group(
        &self,
        kind: HandleKind,
        handles: &[&DownloadHandle],
    ) -> Result<PreparedBatch, PreparationError> {
        let values: Vec<&str> = handles.iter().map(|h| h.as_str()).collect();
        match kind {
            HandleKind::Magnet => {
                self.post_json(
                    "/download/prepare/batch",
                    &BatchMagnetRequest {
                        magnet_links: values,
                    },
                )
                .await
            }
            HandleKind::TorrentUrl => {
                self.post_json("/download/file/prepare/batch", &BatchUrlRequest { urls: values })
                    .await
            }
        }
    }
}

#[async_trait]
impl PreparationService for HttpPreparationClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn prepare(&self, handles: &[DownloadHandle]) -> Result<PreparedBatch, PreparationError> {
        if let [handle] = handles {
            return self.prepare_one(handle).await;
        }

        // Mixed batches are split per handle kind; order is kept within each kind.
        let mut combined = PreparedBatch::default();
        for kind in [HandleKind::Magnet, HandleKind::TorrentUrl] {
            let group: Vec<&DownloadHandle> = handles.iter().filter(|h| h.kind() == kind).collect();
            if group.is_empty() {
                continue;
            }
            debug!(kind = ?kind, count = group.len(), "Preparing batch");
            let batch = self.prepare_group(kind, &group).await?;
            combined.prepared.extend(batch.prepared);
            combined.errors.extend(batch.errors);
        }
        Ok(combined)
    }

    async fn status(&self, id: JobId) -> Result<PrepareStatus, PreparationError> {
        let endpoint = "/download/prepare/status";
        let started = Instant::now();
        let response = self
            .client
            .get(self.url(&format!("{}/{}", endpoint, id)))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if response.status().as_u16() == 404 {
            return Err(PreparationError::NotFound(id));
        }
        Self::decode(endpoint, started, response).await
    }

    async fn cancel(&self, ids: &[JobId]) -> Result<(), PreparationError> {
        if ids.is_empty() {
            return Ok(());
        }
        let endpoint = "/download/cancel";
        let started = Instant::now();
        let response = self
            .client
            .post(self.url(endpoint))
            .json(&CancelRequest { ids })
            .send()
            .await
            .map_err(map_reqwest_error)?;

        // The body of a successful cancel carries nothing we need.
        let status = response.status();
        if status.is_success() {
            record_call(endpoint, started, true);
            return Ok(());
        }
        Self::decode::<serde_json::Value>(endpoint, started, response)
            .await
            .map(|_| ())
    }

    async fn finalize(&self, request: &FinalizeRequest) -> Result<FinalizeReceipt, PreparationError> {
        let receipt: FinalizeReceipt = self.post_json("/download/finalize", request).await?;
        if !receipt.errors.is_empty() {
            warn!(
                errors = ?receipt.errors,
                started = ?receipt.started_ids,
                "Download service reported errors while starting a committed batch"
            );
        }
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(url: &str) -> HttpPreparationClient {
        HttpPreparationClient::new(ServiceConfig {
            url: url.to_string(),
            timeout_secs: 1,
        })
        .unwrap()
    }

    #[test]
    fn test_url_building() {
        let client = client("http://backend:8080/");
        assert_eq!(
            client.url("/download/prepare"),
            "http://backend:8080/download/prepare"
        );
    }

    #[test]
    fn test_batch_request_wire_format() {
        let magnets = BatchMagnetRequest {
            magnet_links: vec!["magnet:?a", "magnet:?b"],
        };
        assert_eq!(
            serde_json::to_value(&magnets).unwrap(),
            serde_json::json!({"magnetLinks": ["magnet:?a", "magnet:?b"]})
        );

        let ids = [1, 2];
        assert_eq!(
            serde_json::to_value(CancelRequest { ids: &ids }).unwrap(),
            serde_json::json!({"ids": [1, 2]})
        );
    }

    #[tokio::test]
    async fn test_cancel_without_ids_makes_no_request() {
        // Nothing listens on this port; an actual request would fail.
        let client = client("http://127.0.0.1:1");
        assert!(client.cancel(&[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transport_error() {
        let client = client("http://127.0.0.1:1");
        let err = client.status(7).await.unwrap_err();
        assert!(err.is_transport());
    }
}
