//! HTTP transport and beacon for the collection endpoint

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

use crate::error::{Error, Result};

use super::{Beacon, Transport};

/// Largest payload the beacon accepts, matching browser beacon limits
pub const BEACON_MAX_PAYLOAD: usize = 64 * 1024;

/// Normal delivery over HTTP POST
///
/// No request timeout is set; a hung request only delays the next send
/// cycle.
#[derive(Clone)]
pub struct HttpTransport {
    http_client: reqwest::Client,
    endpoint: reqwest::Url,
}

impl HttpTransport {
    /// Create a transport for `endpoint`
    ///
    /// Returns an error if the endpoint is not a valid URL.
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = reqwest::Url::parse(endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint {}: {}", endpoint, e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint,
        })
    }

    /// A beacon sharing this transport's client and endpoint
    pub fn beacon(&self) -> HttpBeacon {
        HttpBeacon {
            http_client: self.http_client.clone(),
            endpoint: self.endpoint.clone(),
            max_payload: BEACON_MAX_PAYLOAD,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, body: Vec<u8>) -> Result<()> {
        let response = self
            .http_client
            .post(self.endpoint.clone())
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            Ok(())
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Delivery(format!(
                "API error ({}): {}",
                status, error_text
            )))
        }
    }
}

/// Emergency delivery: detaches the POST onto the current runtime
///
/// Rejects oversized payloads and calls made outside a tokio runtime.
#[derive(Clone)]
pub struct HttpBeacon {
    http_client: reqwest::Client,
    endpoint: reqwest::Url,
    max_payload: usize,
}

impl HttpBeacon {
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }
}

impl Beacon for HttpBeacon {
    fn send(&self, body: Vec<u8>) -> bool {
        if body.len() > self.max_payload {
            tracing::debug!(
                size = body.len(),
                limit = self.max_payload,
                "Beacon payload too large"
            );
            return false;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No runtime available for beacon");
            return false;
        };

        let request = self.http_client.post(self.endpoint.clone()).body(body);
        handle.spawn(async move {
            if let Err(e) = request.send().await {
                tracing::debug!(error = %e, "Beacon request failed");
            }
        });
        true
    }
}
