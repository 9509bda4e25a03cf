//! Dispatch configuration.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::request::RequestOptions;
use crate::retry::RetryConfig;

/// Hint used when neither the service nor the `default` entry defines one.
pub const DEFAULT_HINT: &str = "default";

/// What to do when the resolver has no endpoint for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMissPolicy {
    /// Send the original, unrewritten request to the transport once.
    #[default]
    ExecuteOriginal,
    /// Return a synthetic 503 response without calling the transport.
    ServiceUnavailable,
}

/// Hint strings per service, with a `default` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintConfig {
    /// Hint for services without their own entry.
    #[serde(default = "default_hint")]
    pub default: String,
    /// Per-service overrides keyed by service name.
    #[serde(flatten)]
    pub services: BTreeMap<String, String>,
}

fn default_hint() -> String {
    DEFAULT_HINT.to_string()
}

impl Default for HintConfig {
    fn default() -> Self {
        Self {
            default: default_hint(),
            services: BTreeMap::new(),
        }
    }
}

impl HintConfig {
    /// Adds a per-service hint.
    pub fn with_service(mut self, service: impl Into<String>, hint: impl Into<String>) -> Self {
        self.services.insert(service.into(), hint.into());
        self
    }

    /// Hint for `service`, falling back to the `default` entry.
    pub fn hint_for(&self, service: &str) -> &str {
        self.services
            .get(service)
            .map(String::as_str)
            .unwrap_or(&self.default)
    }
}

/// Per-service overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Overrides the global retry flag.
    pub retry_enabled: Option<bool>,
    /// Replaces the global retry settings.
    pub retry: Option<RetryConfig>,
}

/// Top-level dispatch configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Whether calls go through the retrying dispatcher (default: true).
    pub retry_enabled: bool,
    /// Global retry settings.
    pub retry: RetryConfig,
    /// Per-service overrides keyed by service name.
    pub services: BTreeMap<String, ServiceConfig>,
    /// Correlation hints.
    pub hints: HintConfig,
    /// Per-attempt connect timeout in milliseconds (default: 10000).
    pub connect_timeout_ms: u64,
    /// Per-attempt read timeout in milliseconds (default: 60000).
    pub read_timeout_ms: u64,
    /// Behaviour when no endpoint resolves.
    pub on_resolution_miss: ResolutionMissPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        let options = RequestOptions::default();
        Self {
            retry_enabled: true,
            retry: RetryConfig::default(),
            services: BTreeMap::new(),
            hints: HintConfig::default(),
            connect_timeout_ms: options.connect_timeout.as_millis() as u64,
            read_timeout_ms: options.read_timeout.as_millis() as u64,
            on_resolution_miss: ResolutionMissPolicy::default(),
        }
    }
}

impl DispatchConfig {
    /// Loads configuration from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => Ok(toml::from_str(&contents)?),
            "json" => Ok(serde_json::from_str(&contents)?),
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// Whether retries are enabled for `service`.
    pub fn retry_enabled_for(&self, service: &str) -> bool {
        self.services
            .get(service)
            .and_then(|s| s.retry_enabled)
            .unwrap_or(self.retry_enabled)
    }

    /// Retry settings for `service`.
    pub fn retry_for(&self, service: &str) -> &RetryConfig {
        self.services
            .get(service)
            .and_then(|s| s.retry.as_ref())
            .unwrap_or(&self.retry)
    }

    /// Hint for `service`.
    pub fn hint_for(&self, service: &str) -> &str {
        self.hints.hint_for(service)
    }

    /// Default per-attempt transport options.
    pub fn request_options(&self) -> RequestOptions {
        RequestOptions::new(
            Duration::from_millis(self.connect_timeout_ms),
            Duration::from_millis(self.read_timeout_ms),
        )
    }
}
