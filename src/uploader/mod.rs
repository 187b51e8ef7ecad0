//! Display device uploader
//!
//! Talks to the device-control cloud API with a bearer token: verify the
//! device, push the image to its content store, then make it the active
//! artwork.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::DeviceConfig;
use crate::error::UploadError;

/// Uploader configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderSettings {
    /// Timeout for each HTTP call
    pub request_timeout_secs: u64,
    /// Largest payload the device accepts
    pub max_upload_bytes: usize,
}

impl Default for UploaderSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            max_upload_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Device details reported by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub online: Option<bool>,
}

/// Confirmation of a completed upload
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub content_id: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentResponse {
    content_id: String,
}

#[derive(Debug, Serialize)]
struct Command {
    component: &'static str,
    capability: &'static str,
    command: &'static str,
    arguments: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct CommandRequest {
    commands: Vec<Command>,
}

/// Something that can put an image on the display
#[allow(async_fn_in_trait)]
pub trait DisplayUploader {
    /// Confirm the device exists and is reachable
    async fn check_device(&self) -> Result<DeviceInfo, UploadError>;

    /// Upload and activate an image
    async fn upload(&self, bytes: &[u8], name: &str) -> Result<UploadReceipt, UploadError>;
}

/// Map a non-success status to an upload error
fn classify(status: StatusCode, context: &str) -> UploadError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            UploadError::Auth(format!("{}: HTTP {}", context, status))
        }
        StatusCode::NOT_FOUND => {
            UploadError::DeviceNotFound(format!("{}: HTTP {}", context, status))
        }
        StatusCode::PAYLOAD_TOO_LARGE => {
            UploadError::Upload(format!("{}: payload too large", context))
        }
        s => UploadError::Upload(format!("{}: HTTP {}", context, s)),
    }
}

fn transport(context: &str, e: reqwest::Error) -> UploadError {
    if e.is_timeout() {
        UploadError::Upload(format!("{}: timed out", context))
    } else {
        UploadError::Upload(format!("{}: {}", context, e))
    }
}

/// SmartThings-style device API client
#[derive(Debug)]
pub struct SmartThingsClient {
    client: Client,
    base_url: String,
    token: String,
    device_id: String,
    settings: UploaderSettings,
}

impl SmartThingsClient {
    /// Create a new client. Token and device id must be set.
    pub fn new(device: &DeviceConfig, settings: UploaderSettings) -> Result<Self, UploadError> {
        if device.access_token.trim().is_empty() {
            return Err(UploadError::Auth("access token not configured".to_string()));
        }
        if device.device_id.trim().is_empty() {
            return Err(UploadError::DeviceNotFound(
                "device id not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| UploadError::Upload(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: device.api_url.trim_end_matches('/').to_string(),
            token: device.access_token.trim().to_string(),
            device_id: device.device_id.trim().to_string(),
            settings,
        })
    }

    fn device_url(&self, suffix: &str) -> String {
        format!("{}/devices/{}{}", self.base_url, self.device_id, suffix)
    }

    fn ensure_success(response: Response, context: &str) -> Result<Response, UploadError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(classify(response.status(), context))
        }
    }

    async fn send_commands(&self, commands: Vec<Command>) -> Result<(), UploadError> {
        let response = self
            .client
            .post(self.device_url("/commands"))
            .bearer_auth(&self.token)
            .json(&CommandRequest { commands })
            .send()
            .await
            .map_err(|e| transport("command", e))?;
        Self::ensure_success(response, "command")?;
        Ok(())
    }
}

impl DisplayUploader for SmartThingsClient {
    async fn check_device(&self) -> Result<DeviceInfo, UploadError> {
        let response = self
            .client
            .get(self.device_url(""))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| transport("device lookup", e))?;
        let response = Self::ensure_success(response, "device lookup")?;

        let info: DeviceInfo = response
            .json()
            .await
            .map_err(|e| UploadError::Upload(format!("failed to parse device info: {}", e)))?;

        if info.online == Some(false) {
            return Err(UploadError::DeviceNotFound(format!(
                "device {} is offline",
                self.device_id
            )));
        }

        debug!(device = %self.device_id, label = ?info.label, "device reachable");
        Ok(info)
    }

    async fn upload(&self, bytes: &[u8], name: &str) -> Result<UploadReceipt, UploadError> {
        if bytes.len() > self.settings.max_upload_bytes {
            return Err(UploadError::Upload(format!(
                "image is {} bytes, limit is {}",
                bytes.len(),
                self.settings.max_upload_bytes
            )));
        }

        self.check_device().await?;

        let response = self
            .client
            .post(self.device_url("/content"))
            .bearer_auth(&self.token)
            .query(&[("name", name)])
            .header("Content-Type", "image/jpeg")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| transport("content upload", e))?;
        let response = Self::ensure_success(response, "content upload")?;

        let content: ContentResponse = response
            .json()
            .await
            .map_err(|e| UploadError::Upload(format!("failed to parse upload response: {}", e)))?;

        self.send_commands(vec![
            Command {
                component: "main",
                capability: "custom.artMode",
                command: "selectContent",
                arguments: vec![serde_json::json!(content.content_id)],
            },
            Command {
                component: "main",
                capability: "custom.artMode",
                command: "setArtMode",
                arguments: vec![serde_json::json!({ "enabled": true })],
            },
        ])
        .await?;

        info!(
            device = %self.device_id,
            content_id = %content.content_id,
            size = bytes.len(),
            "artwork uploaded and activated"
        );

        Ok(UploadReceipt {
            content_id: content.content_id,
            uploaded_at: Utc::now(),
        })
    }
}
