//! HTTP client for the discovery commit endpoint.
//!
//! This module provides trace commits with:
//! - Connection pooling and a request timeout
//! - Automatic retry with exponential backoff on 429 and transport errors
//! - Basic auth from an API key
//!
//! Network failures here are transient-level retries; batch-level retry
//! and carryover is owned by the engine, which treats an error from this
//! client as one failed commit attempt.

use std::time::Duration;

use base64::Engine as _;
use log::{debug, warn};
use reqwest::Client;

use crate::engine::CommitBackend;
use crate::error::{Result, TraceError};
use crate::{TraceCommitRequest, VisiblePointSet};

/// Transient retries per commit before the attempt is reported failed.
const MAX_TRANSIENT_RETRIES: u32 = 3;

/// Default request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the discovery backend.
pub struct DiscoveryClient {
    client: Client,
    commit_url: String,
    auth_header: String,
}

impl DiscoveryClient {
    /// Create a client for the given commit endpoint URL and API key.
    pub fn new(commit_url: impl Into<String>, api_key: &str) -> Result<Self> {
        let auth = base64::engine::general_purpose::STANDARD.encode(format!("API_KEY:{}", api_key));

        let client = Client::builder()
            .pool_max_idle_per_host(4)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TraceError::HttpError {
                message: format!("Failed to create HTTP client: {}", e),
                status_code: None,
            })?;

        Ok(Self {
            client,
            commit_url: commit_url.into(),
            auth_header: format!("Basic {}", auth),
        })
    }

    async fn commit_with_retries(&self, request: &TraceCommitRequest) -> Result<VisiblePointSet> {
        let mut retries = 0u32;

        loop {
            let response = self
                .client
                .post(&self.commit_url)
                .header("Authorization", &self.auth_header)
                .json(request)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        retries += 1;
                        if retries > MAX_TRANSIENT_RETRIES {
                            return Err(TraceError::HttpError {
                                message: "Max retries exceeded (429)".to_string(),
                                status_code: Some(429),
                            });
                        }
                        // Exponential backoff: 1s, 2s, 4s...
                        let backoff = Duration::from_millis(1000 * (1 << retries.min(4)));
                        warn!(
                            "[Discovery] 429 from commit endpoint, retry {} after {:?}",
                            retries, backoff
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    if !status.is_success() {
                        return Err(TraceError::HttpError {
                            message: format!("Commit rejected: HTTP {}", status),
                            status_code: Some(status.as_u16()),
                        });
                    }

                    return resp.json::<VisiblePointSet>().await.map_err(|e| {
                        TraceError::HttpError {
                            message: format!("Parse error: {}", e),
                            status_code: None,
                        }
                    });
                }
                Err(e) => {
                    retries += 1;
                    if retries > MAX_TRANSIENT_RETRIES {
                        return Err(TraceError::HttpError {
                            message: format!("Request error: {}", e),
                            status_code: e.status().map(|s| s.as_u16()),
                        });
                    }

                    let backoff = Duration::from_millis(500 * (1 << retries));
                    warn!(
                        "[Discovery] Commit error: {}, retry {} after {:?}",
                        e, retries, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

impl CommitBackend for DiscoveryClient {
    fn commit(
        &self,
        request: &TraceCommitRequest,
    ) -> impl std::future::Future<Output = Result<VisiblePointSet>> {
        debug!(
            "[Discovery] Committing trace to {} (zone {:?})",
            self.commit_url, request.zone_key
        );
        self.commit_with_retries(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Fix, TracePayload};

    #[test]
    fn test_client_creation() {
        let client = DiscoveryClient::new("https://example.com/api/v1/commit", "secret");
        assert!(client.is_ok());
        assert!(client.unwrap().auth_header.starts_with("Basic "));
    }

    #[test]
    fn test_request_serialization_shape() {
        let request = TraceCommitRequest {
            device_id: Some("device-1".to_string()),
            user_id: None,
            zone_key: Some("u09tvw".to_string()),
            trace: TracePayload::Fixes(vec![Fix::new(48.8566, 2.3522, 1_000)]),
            bbox: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["deviceId"], "device-1");
        assert_eq!(json["zoneKey"], "u09tvw");
        assert!(json.get("userId").is_none());
        assert!(json["trace"].is_array());
    }

    #[tokio::test]
    async fn test_commit_unreachable_host_fails() {
        let client =
            DiscoveryClient::new("http://127.0.0.1:1/commit", "secret").unwrap();
        let request = TraceCommitRequest {
            device_id: None,
            user_id: None,
            zone_key: None,
            trace: TracePayload::GeohashSet {
                geohash_set: vec!["u09tvw".to_string()],
            },
            bbox: None,
        };
        let result = client.commit(&request).await;
        assert!(matches!(result, Err(TraceError::HttpError { .. })));
    }
}
