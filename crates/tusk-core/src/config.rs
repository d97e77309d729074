use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::{RetryPolicy, DEFAULT_RETRY_DELAYS_MS};
use crate::transport::CurlOptions;
use crate::upload::UploadOptions;

/// Retry table override (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before each attempt in milliseconds; the length is the attempt count.
    pub delays_ms: Vec<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delays_ms: DEFAULT_RETRY_DELAYS_MS.to_vec(),
        }
    }
}

/// libcurl timeouts (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    /// Bytes/sec below which a transfer counts as stalled.
    pub low_speed_limit: u32,
    pub low_speed_time_secs: u64,
    /// Hard limit for a single request, including a whole chunk body.
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        let o = CurlOptions::default();
        Self {
            connect_timeout_secs: o.connect_timeout.as_secs(),
            low_speed_limit: o.low_speed_limit,
            low_speed_time_secs: o.low_speed_time.as_secs(),
            timeout_secs: o.timeout.as_secs(),
        }
    }
}

impl From<&HttpConfig> for CurlOptions {
    fn from(c: &HttpConfig) -> Self {
        CurlOptions {
            connect_timeout: Duration::from_secs(c.connect_timeout_secs),
            low_speed_limit: c.low_speed_limit,
            low_speed_time: Duration::from_secs(c.low_speed_time_secs),
            timeout: Duration::from_secs(c.timeout_secs),
        }
    }
}

/// Global configuration loaded from `~/.config/tusk/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuskConfig {
    /// Public tus endpoint; session URLs are rebuilt on top of it.
    pub endpoint: String,
    /// URL of the server settings document.
    pub settings_url: String,
    /// Maximum chunk requests in flight per upload.
    pub parallel_uploads: usize,
    /// Optional retry table; if missing, the built-in table is used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Optional libcurl timeouts; if missing, library defaults are used.
    #[serde(default)]
    pub http: Option<HttpConfig>,
}

impl Default for TuskConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/api/tus".to_string(),
            settings_url: "http://127.0.0.1:8080/api/settings".to_string(),
            parallel_uploads: 3,
            retry: None,
            http: None,
        }
    }
}

impl TuskConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        match &self.retry {
            Some(r) if !r.delays_ms.is_empty() => RetryPolicy::from_millis(&r.delays_ms),
            _ => RetryPolicy::default(),
        }
    }

    pub fn curl_options(&self) -> CurlOptions {
        self.http.as_ref().map(CurlOptions::from).unwrap_or_default()
    }

    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            endpoint: self.endpoint.trim_end_matches('/').to_string(),
            parallel_uploads: self.parallel_uploads.max(1),
            retry: self.retry_policy(),
        }
    }

    /// Reject endpoints that are not absolute http(s) URLs.
    pub fn validate(&self) -> Result<()> {
        for (what, value) in [("endpoint", &self.endpoint), ("settings_url", &self.settings_url)] {
            let parsed =
                url::Url::parse(value).with_context(|| format!("invalid {}: {}", what, value))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                bail!("{} must be an http(s) URL, got {}", what, value);
            }
        }
        if self.parallel_uploads == 0 {
            bail!("parallel_uploads must be at least 1");
        }
        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("tusk")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from an explicit path.
pub fn load_from(path: &Path) -> Result<TuskConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let cfg: TuskConfig = toml::from_str(&data)
        .with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<TuskConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = TuskConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_from(&path)
}
