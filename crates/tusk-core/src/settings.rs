//! Server-provided upload settings and their process-wide memo.
//!
//! The settings document is fetched once and cached; later uploads reuse the
//! snapshot even if an operator changes it, which only matters for sessions
//! created afterwards.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::auth::TokenStore;
use crate::transport::{is_success, HttpStack, TransportError};

/// Chunk size used when the server omits one (20 MB).
pub const DEFAULT_CHUNK_SIZE: i64 = 20 * 1000 * 1000;

fn default_chunk_size() -> i64 {
    DEFAULT_CHUNK_SIZE
}

/// The `tus` section of the settings document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TusSettings {
    pub enabled: bool,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: i64,
}

/// Largest chunk accepted from the server; each in-flight chunk is held in memory.
pub const MAX_CHUNK_SIZE: u64 = 1 << 30;

impl TusSettings {
    /// Chunk size as a byte count, `None` unless in `1..=MAX_CHUNK_SIZE`.
    pub fn chunk_size_bytes(&self) -> Option<u64> {
        u64::try_from(self.chunk_size)
            .ok()
            .filter(|&n| n > 0 && n <= MAX_CHUNK_SIZE)
    }
}

#[derive(Debug, Deserialize)]
struct SettingsDocument {
    tus: TusSettings,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings request failed: {0}")]
    Transport(#[from] TransportError),
    #[error("settings request returned HTTP {0}")]
    Http(u32),
    #[error("invalid settings document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("settings task: {0}")]
    Join(String),
}

/// Parse a settings response body.
pub fn parse_settings(body: &[u8]) -> Result<TusSettings, SettingsError> {
    let doc: SettingsDocument = serde_json::from_slice(body)?;
    Ok(doc.tus)
}

/// GET the settings document. Blocking; runs on the calling thread.
pub fn fetch_settings(
    stack: &dyn HttpStack,
    url: &str,
    auth: &TokenStore,
) -> Result<TusSettings, SettingsError> {
    let mut req = stack.create_request("GET", url);
    req.set_header("Accept", "application/json");
    auth.apply(req.as_mut());
    let resp = req.send(None)?;
    if !is_success(resp.status()) {
        return Err(SettingsError::Http(resp.status()));
    }
    let settings = parse_settings(resp.body())?;
    tracing::debug!(
        enabled = settings.enabled,
        chunk_size = settings.chunk_size,
        "fetched upload settings"
    );
    Ok(settings)
}

/// Single-assignment memo of the settings snapshot.
///
/// Racing first callers share one in-flight fetch. A failed fetch is not
/// cached, so the next caller tries again.
#[derive(Debug)]
pub struct SettingsCache {
    url: String,
    cell: OnceCell<TusSettings>,
}

impl SettingsCache {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cell: OnceCell::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The snapshot if it has already been fetched.
    pub fn cached(&self) -> Option<TusSettings> {
        self.cell.get().copied()
    }

    pub async fn get(
        &self,
        stack: Arc<dyn HttpStack>,
        auth: &TokenStore,
    ) -> Result<TusSettings, SettingsError> {
        let settings = self
            .cell
            .get_or_try_init(|| async move {
                let url = self.url.clone();
                let auth = auth.clone();
                tokio::task::spawn_blocking(move || fetch_settings(stack.as_ref(), &url, &auth))
                    .await
                    .map_err(|e| SettingsError::Join(e.to_string()))?
            })
            .await?;
        Ok(*settings)
    }
}
