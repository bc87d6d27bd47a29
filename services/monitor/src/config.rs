//! Monitor configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Default config path: `/etc/rfid-reconcile/monitor.toml`.
//!
//! # Required fields
//! - `schema_version = 1`
//! - `upstream.base_url`
//!
//! Everything else has a default. The upstream base URL may later be
//! replaced at runtime through the control API; that value lives in the
//! key-value store, not here.

use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/rfid-reconcile/monitor.toml";

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub schema_version: u32,
    /// Reader to subscribe to on auto-connect; None means all readers.
    pub reader_id: Option<String>,
    pub auto_connect: bool,
    pub upstream: UpstreamConfig,
    pub device: DeviceConfig,
    pub control: ControlConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub sse_path: String,
    pub ws_path: String,
}

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// None means "same as the upstream base URL".
    pub api_base_url: Option<String>,
    pub status_poll_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub bind: String,
    pub refresh_ms: u64,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub sqlite_path: String,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    reader_id: Option<String>,
    auto_connect: Option<bool>,
    upstream: Option<RawUpstreamConfig>,
    device: Option<RawDeviceConfig>,
    control: Option<RawControlConfig>,
    store: Option<RawStoreConfig>,
}

#[derive(Debug, Deserialize)]
struct RawUpstreamConfig {
    base_url: Option<String>,
    sse_path: Option<String>,
    ws_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDeviceConfig {
    api_base_url: Option<String>,
    status_poll_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawControlConfig {
    bind: Option<String>,
    refresh_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawStoreConfig {
    sqlite_path: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load monitor config from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<MonitorConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load monitor config from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<MonitorConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {}",
            schema_version
        )));
    }

    let raw_upstream = raw
        .upstream
        .ok_or_else(|| ConfigError::MissingField("upstream".to_owned()))?;
    let base_url = raw_upstream
        .base_url
        .ok_or_else(|| ConfigError::MissingField("upstream.base_url".to_owned()))?;
    validate_http_url("upstream.base_url", &base_url)?;
    let upstream = UpstreamConfig {
        base_url,
        sse_path: raw_upstream
            .sse_path
            .unwrap_or_else(|| "/api/events".to_owned()),
        ws_path: raw_upstream.ws_path.unwrap_or_else(|| "/ws".to_owned()),
    };

    let device = match raw.device {
        Some(d) => DeviceConfig {
            api_base_url: d.api_base_url,
            status_poll_secs: d.status_poll_secs.unwrap_or(10),
        },
        None => DeviceConfig {
            api_base_url: None,
            status_poll_secs: 10,
        },
    };
    if let Some(ref url) = device.api_base_url {
        validate_http_url("device.api_base_url", url)?;
    }
    if device.status_poll_secs == 0 {
        return Err(ConfigError::InvalidValue(
            "device.status_poll_secs must be at least 1".to_owned(),
        ));
    }

    let control = match raw.control {
        Some(c) => ControlConfig {
            bind: c.bind.unwrap_or_else(|| "127.0.0.1:9191".to_owned()),
            refresh_ms: c.refresh_ms.unwrap_or(1000),
        },
        None => ControlConfig {
            bind: "127.0.0.1:9191".to_owned(),
            refresh_ms: 1000,
        },
    };
    if control.refresh_ms == 0 {
        return Err(ConfigError::InvalidValue(
            "control.refresh_ms must be at least 1".to_owned(),
        ));
    }

    let store = StoreConfig {
        sqlite_path: raw
            .store
            .and_then(|s| s.sqlite_path)
            .unwrap_or_else(|| "/var/lib/rfid-reconcile/monitor.sqlite3".to_owned()),
    };

    let reader_id = raw
        .reader_id
        .map(|r| r.trim().to_owned())
        .filter(|r| !r.is_empty());

    Ok(MonitorConfig {
        schema_version,
        reader_id,
        auto_connect: raw.auto_connect.unwrap_or(false),
        upstream,
        device,
        control,
        store,
    })
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = reqwest::Url::parse(value)
        .map_err(|e| ConfigError::InvalidValue(format!("{field}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::InvalidValue(format!(
            "{field}: scheme must be http or https, got {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {}", s),
            ConfigError::Parse(s) => write!(f, "Parse error: {}", s),
            ConfigError::MissingField(s) => write!(f, "Missing required field: {}", s),
            ConfigError::InvalidValue(s) => write!(f, "Invalid config value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}
