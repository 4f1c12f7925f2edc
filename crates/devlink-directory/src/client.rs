//! HTTP client for the directory REST API.
//!
//! Identifiers are percent-encoded as single path segments so ids with
//! reserved characters cannot escape their position in the URL.

use crate::types::{DeviceNode, HealthStatus, LinkedDevice, ServiceNode};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const API_ROOT: &str = "/api";
const HEALTH_PATH: &str = "/api/checks/liveness";

/// Characters escaped inside a path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Directory client configuration.
#[derive(Debug, Clone)]
pub struct DirectoryClientConfig {
    /// Base URL of the directory server (e.g., <http://localhost:7000>)
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Basic auth user (the service id)
    pub username: Option<String>,
    /// Basic auth password (the service token)
    pub password: Option<String>,
}

impl Default for DirectoryClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:7000".to_string(),
            timeout: Duration::from_secs(30),
            username: None,
            password: None,
        }
    }
}

/// HTTP client for directory operations.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    client: Client,
    config: DirectoryClientConfig,
}

impl DirectoryClient {
    /// Create a new directory client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new(mut config: DirectoryClientConfig) -> Result<Self, DirectoryError> {
        let trimmed = config.base_url.trim_end_matches('/').len();
        config.base_url.truncate(trimmed);

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DirectoryError::Init(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Base URL requests are issued against.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Fetch a service's description.
    ///
    /// # Errors
    ///
    /// Returns error on network or API errors.
    pub async fn service_info(&self, service_id: &str) -> Result<ServiceNode, DirectoryError> {
        let url = self.api_url(&["service", service_id]);
        tracing::debug!(service_id, url, "GET service");
        self.get_json(&url).await
    }

    /// Fetch the devices currently linked to a service, with their config.
    ///
    /// # Errors
    ///
    /// Returns error on network or API errors.
    pub async fn linked_devices(
        &self,
        service_id: &str,
    ) -> Result<Vec<LinkedDevice>, DirectoryError> {
        let url = self.api_url(&["service", service_id, "things"]);
        tracing::debug!(service_id, url, "GET service device list");
        self.get_json(&url).await
    }

    /// Fetch a device's description.
    ///
    /// # Errors
    ///
    /// Returns error on network or API errors.
    pub async fn device_info(&self, device_id: &str) -> Result<DeviceNode, DirectoryError> {
        let url = self.api_url(&["device", device_id]);
        tracing::debug!(device_id, url, "GET device");
        self.get_json(&url).await
    }

    /// Ask the server for its health.
    ///
    /// # Errors
    ///
    /// Returns error on network or API errors.
    pub async fn health_check(&self) -> Result<HealthStatus, DirectoryError> {
        #[derive(Deserialize)]
        struct HealthResponse {
            #[serde(default)]
            status: String,
        }

        let url = format!("{}{HEALTH_PATH}", self.config.base_url);
        tracing::debug!(url, "GET health check");
        let response: HealthResponse = self.get_json(&url).await?;
        Ok(HealthStatus::from_reported(&response.status))
    }

    fn api_url(&self, segments: &[&str]) -> String {
        let mut url = format!("{}{API_ROOT}", self.config.base_url);
        for segment in segments {
            url.push('/');
            url.extend(utf8_percent_encode(segment, PATH_SEGMENT));
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.username {
            Some(user) => request.basic_auth(user, self.config.password.as_ref()),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, DirectoryError> {
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| DirectoryError::Request(e.to_string()))?;

        let response = check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| DirectoryError::Parse(e.to_string()))
    }
}

/// Turn a non-success response into an API error, preferring the
/// server's `{"message": ...}` error body when it sends one.
async fn check_status(response: Response) -> Result<Response, DirectoryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(DirectoryError::Api {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    #[derive(Deserialize)]
    struct ErrorEnvelope {
        error: ErrorBody,
    }

    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
        return envelope.error.message;
    }
    if let Ok(error) = serde_json::from_str::<ErrorBody>(body) {
        return error.message;
    }
    body.to_string()
}

/// Errors that can occur with the directory client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DirectoryError {
    /// Client initialization failed
    #[error("client init error: {0}")]
    Init(String),
    /// HTTP request failed
    #[error("request error: {0}")]
    Request(String),
    /// API returned an error status
    #[error("API error (status {status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message from API
        message: String,
    },
    /// Response parsing failed
    #[error("parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn config_default() {
        let config = DirectoryClientConfig::default();
        assert_eq!(config.base_url, "http://localhost:7000");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.username.is_none());
        assert!(config.password.is_none());
    }

    #[test]
    fn client_creation_trims_trailing_slash() {
        let client = assert_ok!(DirectoryClient::new(DirectoryClientConfig {
            base_url: "http://directory.local:7000/".to_string(),
            ..Default::default()
        }));
        assert_eq!(client.base_url(), "http://directory.local:7000");
    }

    #[test]
    fn api_urls_encode_ids() {
        let client = DirectoryClient::new(DirectoryClientConfig::default()).unwrap();
        assert_eq!(
            client.api_url(&["service", "592880c5", "things"]),
            "http://localhost:7000/api/service/592880c5/things"
        );
        assert_eq!(
            client.api_url(&["device", "a/b c"]),
            "http://localhost:7000/api/device/a%2Fb%20c"
        );
    }

    #[test]
    fn error_message_prefers_json_body() {
        assert_eq!(
            error_message(r#"{"error":{"message":"Service not found"}}"#),
            "Service not found"
        );
        assert_eq!(error_message(r#"{"message":"Unauthorized"}"#), "Unauthorized");
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
    }

    #[tokio::test]
    async fn unreachable_server_is_request_error() {
        let client = DirectoryClient::new(DirectoryClientConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout: Duration::from_secs(2),
            ..Default::default()
        })
        .unwrap();

        let err = assert_err!(client.linked_devices("svc").await);
        assert!(matches!(err, DirectoryError::Request(_)));
    }
}
