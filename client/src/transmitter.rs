// HTTP transmitter for delivering payloads to the collection service

use crate::config::Settings;
use crate::errors::TransmitError;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Collection path for check-in batches (newline-delimited JSON)
pub const CHECK_INS_PATH: &str = "check_ins/json";
/// Collection path for aggregate payloads (one batch per request)
pub const AGGREGATES_PATH: &str = "1/collect";

/// Wire encoding of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// One JSON document per request
    Json,
    /// Newline-delimited JSON documents
    Ndjson,
}

impl PayloadFormat {
    fn content_type(&self) -> &'static str {
        match self {
            PayloadFormat::Json => "application/json; charset=UTF-8",
            PayloadFormat::Ndjson => "application/x-ndjson; charset=UTF-8",
        }
    }
}

/// Outcome of one transmission round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitResponse {
    pub code: u16,
}

impl TransmitResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

/// Transmitter trait for delivering payloads to the collection service
///
/// One call is one HTTP round trip; implementations perform no retries of
/// their own. Retry policy belongs to the callers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transmitter: Send + Sync {
    async fn transmit(
        &self,
        body: Vec<u8>,
        format: PayloadFormat,
    ) -> Result<TransmitResponse, TransmitError>;
}

/// Encode a payload as a single JSON document
pub fn encode_json<T: Serialize>(payload: &T) -> Result<Vec<u8>, TransmitError> {
    Ok(serde_json::to_vec(payload)?)
}

/// Encode a batch as newline-delimited JSON, one document per item
pub fn encode_ndjson<T: Serialize>(items: &[T]) -> Result<Vec<u8>, TransmitError> {
    let mut body = Vec::new();
    for item in items {
        serde_json::to_writer(&mut body, item)?;
        body.push(b'\n');
    }
    Ok(body)
}

/// Reqwest-based transmitter
///
/// Both collection URLs are resolved once at construction, carrying the
/// authentication and identity query parameters on every request.
#[derive(Debug)]
pub struct HttpTransmitter {
    client: Client,
    checkins_url: Url,
    aggregates_url: Url,
}

impl HttpTransmitter {
    /// Create a new transmitter from the client settings
    pub fn new(settings: &Settings) -> Result<Self, TransmitError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.endpoint.timeout_seconds))
            .build()
            .map_err(|e| TransmitError::ClientBuild(e.to_string()))?;

        Ok(Self {
            client,
            checkins_url: Self::collection_url(settings, CHECK_INS_PATH)?,
            aggregates_url: Self::collection_url(settings, AGGREGATES_PATH)?,
        })
    }

    fn collection_url(settings: &Settings, path: &str) -> Result<Url, TransmitError> {
        let invalid = |reason: String| TransmitError::InvalidEndpoint {
            endpoint: settings.endpoint.base_url.clone(),
            reason,
        };

        let base = Url::parse(&settings.endpoint.base_url).map_err(|e| invalid(e.to_string()))?;
        let mut url = base.join(path).map_err(|e| invalid(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("api_key", &settings.app.push_api_key)
            .append_pair("name", &settings.app.name)
            .append_pair("environment", &settings.app.environment)
            .append_pair("hostname", &settings.app.hostname)
            .append_pair("client_version", env!("CARGO_PKG_VERSION"));

        Ok(url)
    }
}

#[async_trait]
impl Transmitter for HttpTransmitter {
    async fn transmit(
        &self,
        body: Vec<u8>,
        format: PayloadFormat,
    ) -> Result<TransmitResponse, TransmitError> {
        let url = match format {
            PayloadFormat::Json => &self.aggregates_url,
            PayloadFormat::Ndjson => &self.checkins_url,
        };

        debug!(
            path = url.path(),
            format = ?format,
            bytes = body.len(),
            "Transmitting payload"
        );

        let response = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, format.content_type())
            .body(body)
            .send()
            .await?;

        Ok(TransmitResponse {
            code: response.status().as_u16(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_success_bounds() {
        assert!(TransmitResponse { code: 200 }.is_success());
        assert!(TransmitResponse { code: 299 }.is_success());
        assert!(!TransmitResponse { code: 199 }.is_success());
        assert!(!TransmitResponse { code: 300 }.is_success());
        assert!(!TransmitResponse { code: 500 }.is_success());
    }

    #[test]
    fn test_encode_ndjson_frames_each_item() {
        let items = vec![json!({"a": 1}), json!({"b": 2})];
        let body = encode_ndjson(&items).unwrap();
        let text = String::from_utf8(body).unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"a":1}"#);
        assert_eq!(lines[1], r#"{"b":2}"#);
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_encode_ndjson_empty_batch() {
        let items: Vec<serde_json::Value> = Vec::new();
        assert!(encode_ndjson(&items).unwrap().is_empty());
    }

    #[test]
    fn test_collection_url_carries_identity_params() {
        let mut settings = Settings::default();
        settings.endpoint.base_url = "https://collect.example".to_string();
        settings.app.push_api_key = "key-123".to_string();
        settings.app.name = "my-app".to_string();

        let url = HttpTransmitter::collection_url(&settings, CHECK_INS_PATH).unwrap();
        assert_eq!(url.path(), "/check_ins/json");

        let query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(query.contains(&("api_key".to_string(), "key-123".to_string())));
        assert!(query.contains(&("name".to_string(), "my-app".to_string())));
        assert!(query.iter().any(|(k, _)| k == "hostname"));
    }

    #[test]
    fn test_invalid_endpoint_is_rejected() {
        let mut settings = Settings::default();
        settings.endpoint.base_url = "not a url".to_string();

        let err = HttpTransmitter::new(&settings).unwrap_err();
        assert!(matches!(err, TransmitError::InvalidEndpoint { .. }));
    }
}
