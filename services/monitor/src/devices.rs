//! HTTP client for the reader-management API on the gateway.
//!
//! Each call is a single request/response; retry policy belongs to callers.
//! Failures are returned, never applied to read or case state.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("invalid device API URL: {0}")]
    InvalidUrl(String),
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("device API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unknown reader action '{0}'")]
    UnknownAction(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reader {
    #[serde(alias = "readerId")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Antenna {
    #[serde(default)]
    pub reader_id: Option<String>,
    #[serde(default)]
    pub port: Option<u32>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderStatus {
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub reading: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderAction {
    Start,
    Stop,
    Reset,
    Reboot,
}

impl ReaderAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ReaderAction::Start => "start",
            ReaderAction::Stop => "stop",
            ReaderAction::Reset => "reset",
            ReaderAction::Reboot => "reboot",
        }
    }
}

impl TryFrom<&str> for ReaderAction {
    type Error = DeviceError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "start" => Ok(ReaderAction::Start),
            "stop" => Ok(ReaderAction::Stop),
            "reset" => Ok(ReaderAction::Reset),
            "reboot" => Ok(ReaderAction::Reboot),
            _ => Err(DeviceError::UnknownAction(s.to_owned())),
        }
    }
}

#[derive(Clone)]
pub struct DeviceClient {
    client: reqwest::Client,
    base_url: reqwest::Url,
}

impl DeviceClient {
    pub fn new(base_url: &str) -> Result<Self, DeviceError> {
        let base_url = reqwest::Url::parse(base_url.trim())
            .map_err(|e| DeviceError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(DeviceError::InvalidUrl(base_url.to_string()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, base_url })
    }

    fn url(&self, segments: &[&str]) -> reqwest::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("api").extend(segments);
        }
        url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, segments: &[&str]) -> Result<T, DeviceError> {
        let url = self.url(segments);
        debug!(url = %url, "device GET");
        let resp = self.client.get(url).send().await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn post(&self, segments: &[&str]) -> Result<(), DeviceError> {
        let url = self.url(segments);
        debug!(url = %url, "device POST");
        let resp = self.client.post(url).send().await?;
        check(resp).await?;
        Ok(())
    }

    pub async fn list_readers(&self) -> Result<Vec<Reader>, DeviceError> {
        self.get_json(&["readers"]).await
    }

    pub async fn list_antennas(&self) -> Result<Vec<Antenna>, DeviceError> {
        self.get_json(&["antennas"]).await
    }

    pub async fn reader_status(&self, reader_id: &str) -> Result<ReaderStatus, DeviceError> {
        self.get_json(&["readers", reader_id, "status"]).await
    }

    pub async fn reader_action(&self, reader_id: &str, action: ReaderAction) -> Result<(), DeviceError> {
        self.post(&["readers", reader_id, action.as_str()]).await
    }

    pub async fn reset_antennas(&self, reader_id: &str) -> Result<(), DeviceError> {
        self.post(&["readers", reader_id, "antennas", "reset"]).await
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, DeviceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), body = %body, "device API call failed");
    Err(DeviceError::Status {
        status: status.as_u16(),
        body,
    })
}
