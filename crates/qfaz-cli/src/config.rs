//! Configuration loading

use anyhow::{Context, Result};
use qfaz_client::backends::BUILD_BACKEND_URL;
use qfaz_client::{BackendSources, ClientConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend candidates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendsConfig {
    /// Ordered list of backend origins; takes precedence over `url`
    #[serde(default)]
    pub urls: Vec<String>,
    /// Single backend origin
    #[serde(default)]
    pub url: Option<String>,
    /// Base that same-origin relative paths resolve against
    #[serde(default = "default_same_origin")]
    pub same_origin: String,
    /// Skip TLS certificate verification
    #[serde(default)]
    pub skip_tls_verify: bool,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            urls: vec![],
            url: None,
            same_origin: default_same_origin(),
            skip_tls_verify: false,
        }
    }
}

/// Per-request timeouts in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_storm_upload_ms")]
    pub storm_upload_ms: u64,
    #[serde(default = "default_bank_processing_ms")]
    pub bank_processing_ms: u64,
    #[serde(default = "default_request_ms")]
    pub request_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            storm_upload_ms: default_storm_upload_ms(),
            bank_processing_ms: default_bank_processing_ms(),
            request_ms: default_request_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_same_origin() -> String {
    qfaz_client::client::DEFAULT_SAME_ORIGIN.to_string()
}

fn default_storm_upload_ms() -> u64 {
    60_000
}

fn default_bank_processing_ms() -> u64 {
    120_000 // batches of bank reports take a while
}

fn default_request_ms() -> u64 {
    60_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        Ok(config)
    }

    /// Apply backend overrides given on the command line or environment
    pub fn apply_overrides(&mut self, urls: Option<Vec<String>>, url: Option<String>) {
        if let Some(urls) = urls {
            let urls: Vec<String> = urls
                .into_iter()
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect();
            if !urls.is_empty() {
                self.backends.urls = urls;
            }
        }

        if let Some(url) = url {
            self.backends.url = Some(url);
        }
    }

    /// Single backend URL that is set but unused because `urls` wins
    pub fn shadowed_url(&self) -> Option<&str> {
        if self.backends.urls.is_empty() {
            None
        } else {
            self.backends.url.as_deref().filter(|u| !u.is_empty())
        }
    }

    /// Warn about origins that will not work as request targets.
    /// They are kept as configured.
    pub fn validate(&self) {
        if let Some(url) = self.shadowed_url() {
            warn!(
                "Backend url {} is ignored because a backend list is configured ({} entries)",
                url,
                self.backends.urls.len()
            );
        }

        let origins = self.backends.urls.iter().chain(self.backends.url.as_ref());
        for origin in origins.filter(|o| !o.is_empty()) {
            if let Err(e) = url::Url::parse(origin) {
                warn!("Backend origin {:?} is not a valid URL: {}", origin, e);
            }
        }

        if let Err(e) = url::Url::parse(&self.backends.same_origin) {
            warn!(
                "same_origin {:?} is not a valid URL: {}",
                self.backends.same_origin, e
            );
        }
    }

    /// Sources for backend candidate resolution
    pub fn backend_sources(&self) -> BackendSources {
        BackendSources {
            runtime_list: if self.backends.urls.is_empty() {
                None
            } else {
                Some(self.backends.urls.clone())
            },
            runtime_url: self.backends.url.clone(),
            build_url: BUILD_BACKEND_URL.map(str::to_string),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            same_origin: self.backends.same_origin.clone(),
            skip_tls_verify: self.backends.skip_tls_verify,
            storm_timeout: Duration::from_millis(self.timeouts.storm_upload_ms),
            bank_timeout: Duration::from_millis(self.timeouts.bank_processing_ms),
            request_timeout: Duration::from_millis(self.timeouts.request_ms),
        }
    }

    pub fn log_summary(&self, path: &str) {
        info!(
            "Configuration from {}: {} backend url(s), single url {:?}, same origin {}",
            path,
            self.backends.urls.len(),
            self.backends.url,
            self.backends.same_origin
        );
    }
}
