//! Blocking state machine behind `Uploader::upload`.
//!
//! With `parallel > 1` and more than one chunk, every chunk goes into its own
//! partial session and a final `Upload-Concat` request joins them; otherwise
//! one session receives the chunks in order.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::retry::{run_with_retry, RequestError, RetryPolicy};

use super::chunk::{plan_chunks, ChunkLedger};
use super::partial::{PartialSet, PartialSlot};
use super::previous::{PreviousUploads, StoredUpload};
use super::session::{Metadata, ResumeProbe, SessionClient};
use super::task::{UploadState, UploadTask};
use super::transfer::{ChunkFailure, ChunkTarget, ChunkTransfer};
use super::{ProgressEvent, ProgressFn, UploadError};

pub(crate) struct Controller {
    pub client: SessionClient,
    pub previous: Arc<dyn PreviousUploads>,
    pub policy: RetryPolicy,
    pub parallel: usize,
}

enum Plan {
    Session { url: String, offset: u64 },
    Partials(PartialSet),
}

fn emit(progress: Option<&ProgressFn>, loaded: u64, total: u64, in_flight: u64) {
    if let Some(f) = progress {
        f(ProgressEvent {
            loaded,
            total,
            in_flight,
        });
    }
}

fn metadata(task: &UploadTask) -> Metadata<'_> {
    Metadata {
        filename: task.payload.name(),
        filetype: task.payload.content_type(),
        destination: &task.destination,
        overwrite: task.overwrite,
    }
}

impl From<ChunkFailure> for UploadError {
    fn from(f: ChunkFailure) -> Self {
        UploadError::Request {
            context: f.request,
            attempts: f.attempts,
            source: f.error,
        }
    }
}

impl Controller {
    pub fn run(&self, mut task: UploadTask, progress: Option<ProgressFn>) -> Result<(), UploadError> {
        match self.drive(&mut task, progress.as_ref()) {
            Ok(()) => {
                tracing::info!(
                    name = task.payload.name(),
                    destination = %task.destination,
                    bytes = task.total(),
                    session_url = task.session_url().unwrap_or_default(),
                    "upload completed"
                );
                Ok(())
            }
            Err(e) => {
                task.transition(UploadState::Failed);
                tracing::error!(
                    name = task.payload.name(),
                    destination = %task.destination,
                    confirmed = task.bytes_confirmed(),
                    error = %e,
                    "upload failed"
                );
                Err(e)
            }
        }
    }

    /// One request with retry, counting attempts for the error report.
    fn attempt<T, F>(&self, context: String, mut f: F) -> Result<T, UploadError>
    where
        F: FnMut() -> Result<T, RequestError>,
    {
        let stop = AtomicBool::new(false);
        let mut attempts = 0u32;
        let res = run_with_retry(&self.policy, &context, &stop, || {
            attempts += 1;
            f()
        });
        res.map_err(|source| UploadError::Request {
            context,
            attempts,
            source,
        })
    }

    fn partial_set(&self, task: &UploadTask, slots: Vec<PartialSlot>) -> PartialSet {
        PartialSet::new(
            slots,
            task.chunk_size,
            task.fingerprint.clone(),
            Arc::clone(&self.previous),
        )
    }

    fn resume(&self, task: &mut UploadTask) -> Result<Option<Plan>, UploadError> {
        match self.previous.find(&task.fingerprint) {
            None => Ok(None),
            Some(StoredUpload::Single(url)) => self.resume_session(task, url),
            Some(StoredUpload::Partial { chunk_size, parts }) => {
                self.resume_partials(task, chunk_size, parts)
            }
        }
    }

    fn resume_session(&self, task: &mut UploadTask, url: String) -> Result<Option<Plan>, UploadError> {
        task.transition(UploadState::Resuming);
        let total = task.total();
        let probe = self.attempt(format!("HEAD {}", url), || {
            self.client.probe_offset(&url, total)
        })?;
        match probe {
            ResumeProbe::Offset(offset) => {
                tracing::info!(session_url = %url, offset, total, "resuming upload");
                Ok(Some(Plan::Session { url, offset }))
            }
            ResumeProbe::Expired => {
                tracing::warn!(session_url = %url, "stored upload session expired, creating a new one");
                self.previous.forget(&task.fingerprint);
                Ok(None)
            }
        }
    }

    fn resume_partials(
        &self,
        task: &mut UploadTask,
        chunk_size: u64,
        parts: Vec<Option<String>>,
    ) -> Result<Option<Plan>, UploadError> {
        let chunks = plan_chunks(0, task.total(), task.chunk_size);
        if chunk_size != task.chunk_size || parts.len() != chunks.len() {
            tracing::warn!(
                stored_chunk_size = chunk_size,
                chunk_size = task.chunk_size,
                "stored partial uploads do not match the current chunk plan, starting over"
            );
            self.previous.forget(&task.fingerprint);
            return Ok(None);
        }
        task.transition(UploadState::Resuming);
        let mut slots = Vec::with_capacity(parts.len());
        for (chunk, part) in chunks.iter().zip(parts) {
            let Some(url) = part else {
                slots.push(PartialSlot::default());
                continue;
            };
            let probe = self.attempt(format!("HEAD {}", url), || {
                self.client.probe_offset(&url, chunk.len())
            })?;
            slots.push(match probe {
                ResumeProbe::Offset(offset) => PartialSlot {
                    url: Some(url),
                    offset,
                },
                ResumeProbe::Expired => {
                    tracing::debug!(session_url = %url, index = chunk.index, "partial session expired");
                    PartialSlot::default()
                }
            });
        }
        let held = slots.iter().filter(|s| s.url.is_some()).count();
        tracing::info!(parts = slots.len(), held, "resuming parallel upload");
        Ok(Some(Plan::Partials(self.partial_set(task, slots))))
    }

    fn fresh(&self, task: &mut UploadTask) -> Result<Plan, UploadError> {
        task.transition(UploadState::Creating);
        let count = plan_chunks(0, task.total(), task.chunk_size).len();
        if self.parallel > 1 && count > 1 {
            return Ok(Plan::Partials(
                self.partial_set(task, vec![PartialSlot::default(); count]),
            ));
        }
        let total = task.total();
        let meta = metadata(task);
        let url = self.attempt(format!("POST {}", self.client.endpoint()), || {
            self.client.create(total, &meta)
        })?;
        self.previous
            .remember(&task.fingerprint, &StoredUpload::Single(url.clone()));
        Ok(Plan::Session { url, offset: 0 })
    }

    fn drive(&self, task: &mut UploadTask, progress: Option<&ProgressFn>) -> Result<(), UploadError> {
        task.transition(UploadState::Probing);
        let plan = match self.resume(task)? {
            Some(plan) => plan,
            None => self.fresh(task)?,
        };
        task.transition(UploadState::Transferring);
        match plan {
            Plan::Session { url, offset } => self.send_session(task, url, offset, progress)?,
            Plan::Partials(parts) => self.send_partials(task, &parts, progress)?,
        }
        task.transition(UploadState::Completed);
        self.previous.forget(&task.fingerprint);
        Ok(())
    }

    fn send_session(
        &self,
        task: &mut UploadTask,
        url: String,
        offset: u64,
        progress: Option<&ProgressFn>,
    ) -> Result<(), UploadError> {
        let total = task.total();
        task.set_session_url(url.clone());
        if task.confirm(offset) {
            emit(progress, offset, total, 0);
        }
        if task.is_complete() {
            if total == 0 {
                emit(progress, 0, 0, 0);
            }
            return Ok(());
        }
        let chunks = plan_chunks(offset, total, task.chunk_size);
        tracing::debug!(session_url = %url, offset, total, chunks = chunks.len(), "transferring");
        let mut ledger = ChunkLedger::new(offset, &chunks);
        let payload = Arc::clone(&task.payload);
        let transfer = ChunkTransfer {
            client: &self.client,
            target: ChunkTarget::Session(&url),
            payload: payload.as_ref(),
            policy: &self.policy,
            parallel: 1,
        };
        transfer.run(&mut ledger, chunks, |confirmed, in_flight| {
            if task.confirm(confirmed) {
                emit(progress, confirmed, total, in_flight);
            }
        })?;
        Ok(())
    }

    fn send_partials(
        &self,
        task: &mut UploadTask,
        parts: &PartialSet,
        progress: Option<&ProgressFn>,
    ) -> Result<(), UploadError> {
        let total = task.total();
        let chunks = plan_chunks(0, total, task.chunk_size);
        let mut ledger = ChunkLedger::new(0, &chunks);
        let mut pending = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            if parts.slot(chunk.index).offset < chunk.len() {
                pending.push(*chunk);
            } else if let Some(offset) = ledger.confirm(chunk.index) {
                if task.confirm(offset) {
                    emit(progress, offset, total, 0);
                }
            }
        }
        tracing::debug!(total, chunks = chunks.len(), pending = pending.len(), parallel = self.parallel, "transferring partial uploads");

        let payload = Arc::clone(&task.payload);
        let transfer = ChunkTransfer {
            client: &self.client,
            target: ChunkTarget::Partials(parts),
            payload: payload.as_ref(),
            policy: &self.policy,
            parallel: self.parallel,
        };
        transfer.run(&mut ledger, pending, |confirmed, in_flight| {
            if task.confirm(confirmed) {
                emit(progress, confirmed, total, in_flight);
            }
        })?;

        let urls = parts.urls().ok_or_else(|| UploadError::Request {
            context: "concatenation".into(),
            attempts: 0,
            source: RequestError::Protocol("a chunk has no partial session".into()),
        })?;
        let url = {
            let meta = metadata(task);
            self.attempt(format!("POST {} (final)", self.client.endpoint()), || {
                self.client.concatenate(&urls, &meta)
            })?
        };
        tracing::info!(session_url = %url, parts = urls.len(), "joined partial uploads");
        task.set_session_url(url);
        Ok(())
    }
}
