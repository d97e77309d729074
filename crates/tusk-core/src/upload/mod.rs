//! Upload session controller: resumable, chunked, parallel tus uploads.
//!
//! `Uploader` is the async entry point. The transfer itself is blocking
//! (curl easy handles on worker threads) and runs under `spawn_blocking`.

pub mod chunk;
mod controller;
pub mod partial;
pub mod payload;
pub mod previous;
pub mod session;
pub mod task;
pub mod transfer;

use std::sync::Arc;

use crate::auth::TokenStore;
use crate::config::TuskConfig;
use crate::retry::{RequestError, RetryPolicy};
use crate::settings::{SettingsCache, SettingsError, TusSettings};
use crate::transport::{CurlStack, HttpStack, PatchedStack};

use controller::Controller;
use session::{decode_destination, SessionClient};

pub use payload::{BytesPayload, FilePayload, Payload};
pub use previous::{fingerprint, MemoryPreviousUploads, PreviousUploads, StoredUpload};
pub use task::{UploadState, UploadTask};

/// Progress of one upload. `loaded` only counts bytes the server confirmed
/// as part of the contiguous prefix; `in_flight` is what is being sent now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub loaded: u64,
    pub total: u64,
    pub in_flight: u64,
}

pub type ProgressFn = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Per-uploader settings (endpoint, parallelism, retry table).
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOptions {
    /// Public tus endpoint, without trailing slash.
    pub endpoint: String,
    /// Maximum chunk requests in flight per upload.
    pub parallel_uploads: usize,
    pub retry: RetryPolicy,
}

impl Default for UploadOptions {
    fn default() -> Self {
        TuskConfig::default().upload_options()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("upload failed: {context} after {attempts} attempt(s): {source}")]
    Request {
        context: String,
        attempts: u32,
        source: RequestError,
    },
    #[error("upload failed: {0}")]
    Settings(#[from] SettingsError),
    #[error("upload failed: server chunk size {0} is out of range")]
    InvalidChunkSize(i64),
    #[error("upload failed: {0}")]
    Join(String),
}

/// Resumable upload client for one tus endpoint.
///
/// Cheap to clone; clones share the settings memo and previous-upload store.
#[derive(Clone)]
pub struct Uploader {
    stack: Arc<dyn HttpStack>,
    settings: Arc<SettingsCache>,
    auth: TokenStore,
    previous: Arc<dyn PreviousUploads>,
    options: UploadOptions,
}

impl Uploader {
    /// Wrap `stack` so `Location` headers are corrected against `options.endpoint`.
    pub fn new<S>(stack: S, settings: Arc<SettingsCache>, auth: TokenStore, options: UploadOptions) -> Self
    where
        S: HttpStack + 'static,
    {
        Self {
            stack: Arc::new(PatchedStack::new(stack, options.endpoint.clone())),
            settings,
            auth,
            previous: Arc::new(MemoryPreviousUploads::new()),
            options,
        }
    }

    /// libcurl-backed uploader for the configured endpoint.
    pub fn from_config(cfg: &TuskConfig, auth: TokenStore) -> Self {
        Self::new(
            CurlStack::new(cfg.curl_options()),
            Arc::new(SettingsCache::new(cfg.settings_url.clone())),
            auth,
            cfg.upload_options(),
        )
    }

    pub fn with_previous_uploads(mut self, store: Arc<dyn PreviousUploads>) -> Self {
        self.previous = store;
        self
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// Cached server settings, fetching them on first use.
    pub async fn settings(&self) -> Result<TusSettings, SettingsError> {
        self.settings.get(Arc::clone(&self.stack), &self.auth).await
    }

    /// Whether `payload` should go through the resumable path.
    ///
    /// Never errors: an unsupported stack or a failed settings fetch both mean
    /// `false`.
    pub async fn use_transport(&self, payload: &dyn Payload) -> bool {
        if !self.stack.is_supported() {
            tracing::debug!(stack = self.stack.name(), "http stack cannot do chunked uploads");
            return false;
        }
        match self.settings().await {
            Ok(s) => s.enabled && i128::from(payload.len()) > i128::from(s.chunk_size),
            Err(e) => {
                tracing::warn!(error = %e, "could not fetch upload settings");
                false
            }
        }
    }

    /// Upload `payload` to `destination` (percent-encoded path) on the server.
    ///
    /// Resumes a session previously started for the same payload when the
    /// store knows one. Resolves once every byte is confirmed.
    pub async fn upload(
        &self,
        destination: &str,
        payload: Arc<dyn Payload>,
        overwrite: bool,
        on_progress: Option<ProgressFn>,
    ) -> Result<(), UploadError> {
        let settings = self.settings().await?;
        let chunk_size = settings
            .chunk_size_bytes()
            .ok_or(UploadError::InvalidChunkSize(settings.chunk_size))?;

        let destination = decode_destination(destination);
        let fp = fingerprint(payload.as_ref(), &destination, &self.options.endpoint);
        let task = UploadTask::new(payload, destination, overwrite, chunk_size, fp);
        tracing::info!(
            name = task.payload.name(),
            destination = %task.destination,
            bytes = task.total(),
            chunk_size,
            "starting upload"
        );

        let controller = Controller {
            client: SessionClient::new(
                Arc::clone(&self.stack),
                self.auth.clone(),
                self.options.endpoint.clone(),
            ),
            previous: Arc::clone(&self.previous),
            policy: self.options.retry.clone(),
            parallel: self.options.parallel_uploads.max(1),
        };
        tokio::task::spawn_blocking(move || controller.run(task, on_progress))
            .await
            .map_err(|e| UploadError::Join(e.to_string()))?
    }
}
