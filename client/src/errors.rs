// Error handling framework

use thiserror::Error;

/// Transmission errors
///
/// One transmit call is one HTTP round trip; everything that prevents the
/// round trip from producing a status code surfaces here. Non-2xx status
/// codes are not errors at this layer, they are carried in the response.
#[derive(Error, Debug)]
pub enum TransmitError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Invalid collection endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Payload serialization failed: {0}")]
    Serialization(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),
}

impl From<serde_json::Error> for TransmitError {
    fn from(err: serde_json::Error) -> Self {
        TransmitError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for TransmitError {
    fn from(err: reqwest::Error) -> Self {
        TransmitError::RequestFailed(err.to_string())
    }
}
