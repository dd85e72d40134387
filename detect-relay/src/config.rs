use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Preferred field list is empty")]
    EmptyPreferredFields,

    #[error("Empty field name")]
    EmptyFieldName,

    #[error("Upload limit cannot be 0")]
    InvalidUploadLimit,

    #[error("Readiness interval cannot be 0")]
    InvalidProbeInterval,

    #[error("{0} cannot be 0")]
    ZeroTimeout(&'static str),

    #[error(
        "Forward timeout ({forward_secs}s) must exceed the readiness budget ({budget_secs}s)"
    )]
    ForwardTimeoutTooShort { forward_secs: u64, budget_secs: u64 },

    #[error("Invalid upstream path {0}: {1}")]
    InvalidUpstreamPath(String, url::ParseError),
}

/// Relay configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for client uploads
    pub listener: Listener,
    /// Optional listener for the health/readiness endpoints of the relay itself
    #[serde(default)]
    pub admin_listener: Option<Listener>,
    /// Inbound path that accepts uploads
    #[serde(default = "default_route_path")]
    pub route_path: String,
    /// The inference service uploads are forwarded to
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    /// Values applied when the caller leaves a parameter out
    #[serde(default)]
    pub defaults: ParameterDefaults,
}

impl Config {
    /// Validates the relay configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        if let Some(admin_listener) = &self.admin_listener {
            admin_listener.validate()?;
        }

        self.upload.validate()?;
        self.upstream.detect_url()?;
        self.upstream.health_url()?;

        if self.upstream.forward_timeout_secs == 0 {
            return Err(ValidationError::ZeroTimeout("forward_timeout_secs"));
        }

        if self.readiness.enabled {
            if self.readiness.interval_ms == 0 {
                return Err(ValidationError::InvalidProbeInterval);
            }
            if self.readiness.probe_timeout_secs == 0 {
                return Err(ValidationError::ZeroTimeout("probe_timeout_secs"));
            }

            // The first real request may still land on a warming backend
            if self.upstream.forward_timeout_secs <= self.readiness.budget_secs {
                return Err(ValidationError::ForwardTimeoutTooShort {
                    forward_secs: self.upstream.forward_timeout_secs,
                    budget_secs: self.readiness.budget_secs,
                });
            }
        }

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    /// Validates the listener configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Inference service configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct UpstreamConfig {
    /// Base URL of the inference service
    ///
    /// Note: Uses the `url::Url` type so invalid URLs are rejected during
    /// config deserialization.
    pub base_url: Url,
    #[serde(default = "default_detect_path")]
    pub detect_path: String,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// Upper bound for the whole forwarding exchange
    #[serde(default = "default_forward_timeout_secs")]
    pub forward_timeout_secs: u64,
}

impl UpstreamConfig {
    pub fn detect_url(&self) -> Result<Url, ValidationError> {
        self.endpoint(&self.detect_path)
    }

    pub fn health_url(&self) -> Result<Url, ValidationError> {
        self.endpoint(&self.health_path)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.forward_timeout_secs)
    }

    // Joins onto the base URL path so deployments behind a path prefix keep it.
    fn endpoint(&self, path: &str) -> Result<Url, ValidationError> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|e| ValidationError::InvalidUpstreamPath(path.to_string(), e))
    }
}

/// Inbound upload handling
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    /// Ceiling for the whole multipart body
    pub max_bytes: u64,
    /// Directory for transient upload files, the OS temp dir if unset
    pub temp_dir: Option<PathBuf>,
    /// Field names checked, in order, when choosing the file to forward
    pub preferred_fields: Vec<String>,
    /// Field name the file is forwarded under
    pub forward_field: String,
}

impl UploadConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_bytes == 0 {
            return Err(ValidationError::InvalidUploadLimit);
        }
        if self.preferred_fields.is_empty() {
            return Err(ValidationError::EmptyPreferredFields);
        }
        if self.forward_field.is_empty() || self.preferred_fields.iter().any(|f| f.is_empty()) {
            return Err(ValidationError::EmptyFieldName);
        }
        Ok(())
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            max_bytes: 25 * 1024 * 1024,
            temp_dir: None,
            preferred_fields: ["image", "file", "photo", "picture", "img", "upload"]
                .into_iter()
                .map(String::from)
                .collect(),
            forward_field: "image".into(),
        }
    }
}

/// Pre-flight health polling of the inference service
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReadinessConfig {
    pub enabled: bool,
    /// Total time a request may wait for the service to come up
    pub budget_secs: u64,
    /// Fixed delay between two probes
    pub interval_ms: u64,
    /// Timeout of a single probe
    pub probe_timeout_secs: u64,
}

impl ReadinessConfig {
    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.budget_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        ReadinessConfig {
            enabled: false,
            budget_secs: 120,
            interval_ms: 1200,
            probe_timeout_secs: 5,
        }
    }
}

/// Query parameter values used when the caller does not send their own
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParameterDefaults {
    pub conf: String,
    pub imgsz: String,
    pub return_image: String,
}

impl Default for ParameterDefaults {
    fn default() -> Self {
        ParameterDefaults {
            conf: "0.25".into(),
            imgsz: "640".into(),
            return_image: "true".into(),
        }
    }
}

fn default_route_path() -> String {
    "/api/detect".into()
}

fn default_detect_path() -> String {
    "/api/detect".into()
}

fn default_health_path() -> String {
    "/health".into()
}

fn default_forward_timeout_secs() -> u64 {
    180
}
