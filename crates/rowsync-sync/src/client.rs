//! HTTP client for delivering records to the downstream service.
//!
//! Each delivery is one POST of the record's JSON form to a fixed endpoint.
//! The reply body carries its own result `code`; HTTP status is logged but
//! does not decide the outcome.

use std::time::Duration;

use rowsync_core::models::Record;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info_span, Instrument};

use crate::error::DeliveryError;

/// Content type sent with every delivery.
pub const CONTENT_TYPE: &str = "application/json;charset=utf-8";

/// Downstream code meaning the record was accepted.
pub const SUCCESS_CODE: i64 = 1;

/// Configuration for the delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Downstream endpoint receiving every record.
    pub endpoint: String,
    /// Request timeout. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8081/multiGo/customer/save".to_string(),
            timeout: None,
            user_agent: concat!("rowsync/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Structured reply from the downstream service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownstreamReply {
    /// Result code, [`SUCCESS_CODE`] on acceptance.
    pub code: i64,
    /// Human-readable message. Absent or `null` reads as empty.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub message: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl DownstreamReply {
    /// Returns true when the downstream service accepted the record.
    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }

    /// Turns a non-success reply into a rejection.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Rejected` carrying the downstream code and
    /// message when `code` is not [`SUCCESS_CODE`].
    pub fn into_result(self) -> Result<Self, DeliveryError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(DeliveryError::rejected(self.code, self.message))
        }
    }
}

/// HTTP client bound to the downstream endpoint.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built or the endpoint is not an http(s) URL.
    pub fn new(config: ClientConfig) -> Result<Self, DeliveryError> {
        let endpoint = reqwest::Url::parse(&config.endpoint).map_err(|e| {
            DeliveryError::configuration(format!("invalid endpoint {}: {e}", config.endpoint))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(DeliveryError::configuration(format!(
                "endpoint must use http or https: {}",
                config.endpoint
            )));
        }

        let mut builder = reqwest::Client::builder().user_agent(&config.user_agent);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| {
            DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
        })?;

        Ok(Self { client, config })
    }

    /// Creates a new delivery client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn with_defaults() -> Result<Self, DeliveryError> {
        Self::new(ClientConfig::default())
    }

    /// Returns the downstream endpoint.
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// Posts one record and parses the downstream reply.
    ///
    /// A reply with a non-success code is still `Ok`; the caller classifies
    /// it.
    ///
    /// # Errors
    ///
    /// - `Serialization` if the record cannot be encoded
    /// - `Network` or `Timeout` if the request cannot be completed
    /// - `ReadBody` if the response body cannot be read
    /// - `MalformedResponse` if the body is not a reply object
    pub async fn deliver(&self, record: &Record) -> Result<DownstreamReply, DeliveryError> {
        let span = info_span!("downstream_request", url = %self.config.endpoint);

        async move {
            let body = serde_json::to_vec(record)
                .map_err(|e| DeliveryError::serialization(e.to_string()))?;

            let start_time = std::time::Instant::now();
            let response = self
                .client
                .post(&self.config.endpoint)
                .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
                .body(body)
                .send()
                .await
                .map_err(|e| self.classify_send_error(&e))?;

            let status = response.status();
            tracing::debug!(
                status = status.as_u16(),
                duration_ms = start_time.elapsed().as_millis(),
                "Received response"
            );
            if !status.is_success() {
                tracing::warn!(status = status.as_u16(), "Downstream answered with non-2xx status");
            }

            let bytes = response.bytes().await.map_err(|e| {
                if e.is_timeout() {
                    self.timeout_error()
                } else {
                    DeliveryError::read_body(e.to_string())
                }
            })?;

            serde_json::from_slice::<DownstreamReply>(&bytes)
                .map_err(|e| DeliveryError::malformed(status.as_u16(), e.to_string()))
        }
        .instrument(span)
        .await
    }

    fn classify_send_error(&self, error: &reqwest::Error) -> DeliveryError {
        tracing::warn!("Request failed: {}", error);

        if error.is_timeout() {
            return self.timeout_error();
        }
        if error.is_connect() {
            return DeliveryError::network(format!("connection failed: {error}"));
        }
        DeliveryError::network(error.to_string())
    }

    fn timeout_error(&self) -> DeliveryError {
        DeliveryError::timeout(self.config.timeout.map_or(0, |timeout| timeout.as_secs()))
    }
}
