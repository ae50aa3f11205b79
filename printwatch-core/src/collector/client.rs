//! HTTP client for the print collector API
//!
//! Implements verify-then-send for a single [`PrintEvent`]. Each call is
//! bounded by a timeout so a hung collector delays a tick instead of
//! stalling the agent.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::{Config, DeliveryConfig};
use crate::error::{Error, Result};
use crate::types::{DeliveryOutcome, PrintEvent};

use super::Deliver;

const VERIFY_PATH: &str = "/central/verifyimpression";
const INGEST_PATH: &str = "/central/receptprintreq";

/// Response from POST /central/verifyimpression
///
/// `status` is a string; only the exact value `"true"` means the event exists.
#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    status: String,
}

/// HTTP client for the collector's verify and ingest endpoints
pub struct DeliveryClient {
    http_client: reqwest::Client,
    base_url: String,
    verify_timeout: Duration,
}

impl DeliveryClient {
    /// Create a client for `base_url`
    pub fn new(base_url: &str, config: &DeliveryConfig) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Config("api_base_url is required".to_string()));
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
            verify_timeout: Duration::from_secs(config.verify_timeout_secs),
        })
    }

    /// Create a client from the agent configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.api_base_url, &config.delivery)
    }

    /// Base URL endpoints are resolved against
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask the collector whether `event` is already stored.
    ///
    /// Transport errors and non-success statuses are errors. A body that is
    /// not the expected JSON is treated as "not stored" so the send proceeds.
    pub async fn verify(&self, event: &PrintEvent) -> Result<bool> {
        let url = format!("{}{}", self.base_url, VERIFY_PATH);

        let response = self
            .http_client
            .post(&url)
            .timeout(self.verify_timeout)
            .json(event)
            .send()
            .await
            .map_err(|e| Error::Collector(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(Error::Collector(format!(
                "verify API error ({}): {}",
                status,
                error_text.trim()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Collector(format!("failed to read verify response: {}", e)))?;

        tracing::debug!(
            body = %String::from_utf8_lossy(&body),
            "Verification API raw response"
        );

        match serde_json::from_slice::<VerifyResponse>(&body) {
            Ok(parsed) => Ok(parsed.status == "true"),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Could not parse verification response, assuming event does not exist"
                );
                Ok(false)
            }
        }
    }

    /// Store `event` on the collector. Success is 200 or 201.
    pub async fn send(&self, event: &PrintEvent) -> Result<()> {
        let url = format!("{}{}", self.base_url, INGEST_PATH);

        let response = self
            .http_client
            .post(&url)
            .json(event)
            .send()
            .await
            .map_err(|e| Error::Collector(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status == StatusCode::OK || status == StatusCode::CREATED {
            tracing::debug!(status = %status, "Ingest API accepted event");
            Ok(())
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Collector(format!(
                "ingest API error ({}): {}",
                status,
                error_text.trim()
            )))
        }
    }
}

impl Deliver for DeliveryClient {
    async fn deliver(&self, event: &PrintEvent) -> DeliveryOutcome {
        match self.verify(event).await {
            Err(e) => {
                tracing::warn!(user = %event.user, error = %e, "Verify call failed");
                return DeliveryOutcome::Failed(e.to_string());
            }
            Ok(true) => {
                tracing::info!(user = %event.user, "Event already exists on collector, skipping");
                return DeliveryOutcome::AlreadyExists;
            }
            Ok(false) => {}
        }

        match self.send(event).await {
            Ok(()) => {
                tracing::info!(
                    user = %event.user,
                    document = %event.document_name,
                    "Sent print event"
                );
                DeliveryOutcome::Delivered
            }
            Err(e) => {
                tracing::warn!(user = %event.user, error = %e, "Send call failed");
                DeliveryOutcome::Failed(e.to_string())
            }
        }
    }
}
