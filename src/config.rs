//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - config.toml (default configuration)
//! - config.local.toml (git-ignored local overrides)
//! - Environment variables (YTCLIENT_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # config.toml
//! [cluster]
//! proxy = "hume.example.net"
//! token = "..."
//!
//! [retry]
//! max_attempts = 10
//!
//! [rpc]
//! proxy_role = "batch"
//! ban_window_ms = 30000
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! YTCLIENT_CLUSTER__PROXY=localhost:8000
//! YTCLIENT_RETRY__MAX_ATTEMPTS=3
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cluster endpoint and HTTP settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster proxy address (`host[:port]` or a full URL)
    #[serde(default = "default_proxy")]
    pub proxy: String,

    /// OAuth token used when the call context carries no credentials
    #[serde(default)]
    pub token: Option<String>,

    /// Send every call to `proxy` instead of discovering heavy proxies
    #[serde(default)]
    pub disable_discovery: bool,

    /// HTTP API version used in request paths
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Per-request HTTP timeout in milliseconds. 0 = no timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// `User-Agent` sent with every HTTP request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Retry policy shared by the mutation and read retriers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per logical call, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for the delay between attempts
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Backoff growth factor per attempt
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Randomize each delay between zero and the computed backoff
    #[serde(default = "default_true")]
    pub jitter: bool,
}

/// RPC proxy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Proxy role passed to discovery (`role=` query parameter)
    #[serde(default)]
    pub proxy_role: Option<String>,

    /// Static proxy addresses. Empty = discover through the cluster proxy.
    #[serde(default)]
    pub proxies: Vec<String>,

    /// How long a failing proxy stays excluded from selection
    #[serde(default = "default_ban_window_ms")]
    pub ban_window_ms: u64,

    /// TCP connect timeout
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Largest bus frame accepted from a proxy
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Write logs to this file instead of stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
}

// Default value functions
fn default_proxy() -> String {
    "localhost:80".to_string()
}
fn default_api_version() -> String {
    "v4".to_string()
}
fn default_request_timeout_ms() -> u64 {
    60_000
}
fn default_user_agent() -> String {
    "ytclient-rs".to_string()
}
fn default_max_attempts() -> u32 {
    5
}
fn default_initial_backoff_ms() -> u64 {
    100
}
fn default_max_backoff_ms() -> u64 {
    5_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_true() -> bool {
    true
}
fn default_ban_window_ms() -> u64 {
    60_000
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_max_frame_size() -> usize {
    64 * 1024 * 1024
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. config.toml (base configuration)
    /// 2. config.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (YTCLIENT_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("config.toml"))
            .merge(Toml::file("config.local.toml"))
            .merge(Env::prefixed("YTCLIENT_").split("__"))
            .extract()
    }

    /// Load configuration from specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("YTCLIENT_").split("__"))
            .extract()
    }

    /// Configuration pointing at `proxy` with every other field defaulted.
    pub fn for_proxy(proxy: impl Into<String>) -> Self {
        let mut config = Config::default();
        config.cluster.proxy = proxy.into();
        config
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cluster: ClusterConfig::default(),
            retry: RetryConfig::default(),
            rpc: RpcConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            proxy: default_proxy(),
            token: None,
            disable_discovery: false,
            api_version: default_api_version(),
            request_timeout_ms: default_request_timeout_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl ClusterConfig {
    /// Normalized cluster URL.
    pub fn cluster_url(&self) -> ClusterUrl {
        ClusterUrl::normalize(&self.proxy, self.disable_discovery)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `attempt + 1` (attempts are 1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let base_ms = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        let capped_ms = base_ms.min(self.max_backoff_ms as f64);

        if self.jitter {
            Duration::from_millis((rand::random::<f64>() * capped_ms) as u64)
        } else {
            Duration::from_millis(capped_ms as u64)
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        RpcConfig {
            proxy_role: None,
            proxies: Vec::new(),
            ban_window_ms: default_ban_window_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl RpcConfig {
    pub fn ban_window(&self) -> Duration {
        Duration::from_millis(self.ban_window_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

// ============================================================================
// Cluster URL
// ============================================================================

/// Cluster proxy URL after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterUrl {
    /// `scheme://host[:port]` without trailing slash
    pub url: String,
    /// Skip heavy-proxy discovery and always use `url`
    pub disable_discovery: bool,
}

impl ClusterUrl {
    /// Add a missing `http://` scheme and strip trailing slashes. Local
    /// proxies never take part in discovery.
    pub fn normalize(proxy: &str, disable_discovery: bool) -> Self {
        let proxy = proxy.trim().trim_end_matches('/');
        let url = if proxy.contains("://") {
            proxy.to_string()
        } else {
            format!("http://{proxy}")
        };

        let host = url
            .split("://")
            .nth(1)
            .unwrap_or_default()
            .split([':', '/'])
            .next()
            .unwrap_or_default();
        let disable_discovery = disable_discovery || host == "localhost";
        ClusterUrl {
            url,
            disable_discovery,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cluster.proxy, "localhost:80");
        assert_eq!(config.cluster.api_version, "v4");
        assert!(config.cluster.token.is_none());
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.rpc.ban_window_ms, 60_000);
        assert!(config.rpc.proxies.is_empty());
    }

    #[test]
    fn test_default_logging_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "text");
        assert!(config.logging.file.is_none());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();

        assert!(toml_str.contains("[cluster]"));
        assert!(toml_str.contains("[retry]"));
        assert!(toml_str.contains("[rpc]"));
        assert!(toml_str.contains("[logging]"));
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.cluster.proxy, "localhost:80");
        assert_eq!(back.retry.initial_backoff_ms, 100);
        assert_eq!(back.rpc.connect_timeout_ms, 5_000);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let back: Config = toml::from_str("[cluster]\nproxy = \"hume\"\n").unwrap();
        assert_eq!(back.cluster.proxy, "hume");
        assert_eq!(back.cluster.api_version, "v4");
        assert_eq!(back.retry.max_attempts, 5);
    }

    #[test]
    fn test_backoff_without_jitter_is_capped() {
        let retry = RetryConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            multiplier: 2.0,
            jitter: false,
            ..RetryConfig::default()
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(400));
        assert_eq!(retry.backoff(10), Duration::from_millis(1_000));
    }

    #[test]
    fn test_backoff_with_jitter_stays_in_range() {
        let retry = RetryConfig::default();
        for attempt in 1..10 {
            assert!(retry.backoff(attempt) <= Duration::from_millis(retry.max_backoff_ms));
        }
    }

    #[test]
    fn test_cluster_url_normalization() {
        let url = ClusterUrl::normalize("hume.example.net/", false);
        assert_eq!(url.url, "http://hume.example.net");
        assert!(!url.disable_discovery);

        let url = ClusterUrl::normalize("https://hume.example.net", false);
        assert_eq!(url.url, "https://hume.example.net");

        let url = ClusterUrl::normalize("localhost:8000", false);
        assert_eq!(url.url, "http://localhost:8000");
        assert!(url.disable_discovery);

        let url = ClusterUrl::normalize("hume.example.net", true);
        assert!(url.disable_discovery);
    }
}
