//! Exporter configuration

use exporter_lib::directory::{Credentials, SlsClientConfig, DEFAULT_ENDPOINT_TEMPLATE};
use exporter_lib::reconcile::DEFAULT_MAX_CONCURRENCY;
use exporter_lib::TargetList;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment prefix for overrides, e.g. `SLS_EXPORTER__AUTH__SECRET_KEY`
const ENV_PREFIX: &str = "SLS_EXPORTER";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("empty fields in configuration: {}", .0.join(", "))]
    EmptyFields(Vec<String>),

    #[error("invalid listen address: {0}")]
    InvalidListen(String),
}

/// Listen port, given as `9115`, `":9115"` or `"host:9115"`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ListenPort {
    Number(u16),
    Text(String),
}

impl Default for ListenPort {
    fn default() -> Self {
        ListenPort::Text(String::new())
    }
}

impl ListenPort {
    fn is_empty(&self) -> bool {
        match self {
            ListenPort::Number(port) => *port == 0,
            ListenPort::Text(text) => text.trim().is_empty(),
        }
    }

    /// Address to bind, a bare port binds every interface
    pub fn listen_addr(&self) -> Result<String, ConfigError> {
        let text = match self {
            ListenPort::Number(port) => return Ok(format!("0.0.0.0:{port}")),
            ListenPort::Text(text) => text.trim(),
        };

        if let Ok(port) = text.parse::<u16>() {
            return Ok(format!("0.0.0.0:{port}"));
        }

        let (host, port) = text
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::InvalidListen(text.to_string()))?;
        port.parse::<u16>()
            .map_err(|_| ConfigError::InvalidListen(text.to_string()))?;

        let host = if host.is_empty() { "0.0.0.0" } else { host };
        Ok(format!("{host}:{port}"))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    /// Port (or address) serving `/metrics`
    #[serde(default)]
    pub port: ListenPort,

    /// Machine groups reconciled at once during a pass
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Log service endpoint with `{region}` and `{project}` placeholders
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Timeout for each log service request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Instance name attached to log records
    #[serde(default = "default_instance")]
    pub instance: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            port: ListenPort::default(),
            max_concurrency: default_max_concurrency(),
            endpoint: default_endpoint(),
            request_timeout_secs: default_request_timeout(),
            instance: default_instance(),
        }
    }
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT_TEMPLATE.to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

#[derive(Clone, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Exporter configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExporterConfig {
    #[serde(default)]
    pub global: GlobalConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    /// Region identifier -> projects to monitor
    #[serde(default, rename = "project")]
    pub projects: BTreeMap<String, Vec<String>>,
}

impl ExporterConfig {
    /// Load configuration from a YAML file with environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    fn load_with_prefix(path: &Path, env_prefix: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Yaml))
            .add_source(config::Environment::with_prefix(env_prefix).separator("__"))
            .build()?;

        let config: ExporterConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject documents with empty required fields
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut empty = Vec::new();

        if self.global.port.is_empty() {
            empty.push("global.port".to_string());
        }
        if self.global.max_concurrency == 0 {
            empty.push("global.max_concurrency".to_string());
        }
        if self.global.endpoint.trim().is_empty() {
            empty.push("global.endpoint".to_string());
        }
        if self.auth.access_key.is_empty() {
            empty.push("auth.access_key".to_string());
        }
        if self.auth.secret_key.is_empty() {
            empty.push("auth.secret_key".to_string());
        }
        if self.projects.is_empty() {
            empty.push("project".to_string());
        }
        for (region, projects) in &self.projects {
            if projects.iter().all(|p| p.trim().is_empty()) {
                empty.push(format!("project.{region}"));
            }
        }

        if !empty.is_empty() {
            return Err(ConfigError::EmptyFields(empty));
        }

        self.global.port.listen_addr()?;
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<String, ConfigError> {
        self.global.port.listen_addr()
    }

    pub fn targets(&self) -> TargetList {
        TargetList::new(self.projects.clone())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.auth.access_key, &self.auth.secret_key)
    }

    pub fn client_config(&self) -> SlsClientConfig {
        SlsClientConfig {
            endpoint_template: self.global.endpoint.clone(),
            request_timeout: Duration::from_secs(self.global.request_timeout_secs),
        }
    }
}
