//! Per-call upload state.

use std::fmt;
use std::sync::Arc;

use super::payload::Payload;

/// Lifecycle of one `upload()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Init,
    Probing,
    Resuming,
    Creating,
    Transferring,
    Completed,
    Failed,
}

impl UploadState {
    pub fn as_str(self) -> &'static str {
        match self {
            UploadState::Init => "init",
            UploadState::Probing => "probing",
            UploadState::Resuming => "resuming",
            UploadState::Creating => "creating",
            UploadState::Transferring => "transferring",
            UploadState::Completed => "completed",
            UploadState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, UploadState::Completed | UploadState::Failed)
    }

    fn can_enter(self, next: UploadState) -> bool {
        use UploadState::*;
        match (self, next) {
            (_, Failed) => !self.is_terminal(),
            (Init, Probing)
            | (Probing, Resuming)
            | (Probing, Creating)
            | (Resuming, Creating)
            | (Resuming, Transferring)
            | (Creating, Transferring)
            | (Transferring, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One upload in progress. Owned by a single `upload()` call.
pub struct UploadTask {
    pub payload: Arc<dyn Payload>,
    /// Percent-decoded target path on the server.
    pub destination: String,
    pub overwrite: bool,
    pub chunk_size: u64,
    pub fingerprint: String,
    session_url: Option<String>,
    bytes_confirmed: u64,
    state: UploadState,
}

impl fmt::Debug for UploadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadTask")
            .field("name", &self.payload.name())
            .field("len", &self.payload.len())
            .field("destination", &self.destination)
            .field("session_url", &self.session_url)
            .field("bytes_confirmed", &self.bytes_confirmed)
            .field("state", &self.state)
            .finish()
    }
}

impl UploadTask {
    pub fn new(
        payload: Arc<dyn Payload>,
        destination: String,
        overwrite: bool,
        chunk_size: u64,
        fingerprint: String,
    ) -> Self {
        Self {
            payload,
            destination,
            overwrite,
            chunk_size,
            fingerprint,
            session_url: None,
            bytes_confirmed: 0,
            state: UploadState::Init,
        }
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn total(&self) -> u64 {
        self.payload.len()
    }

    pub fn session_url(&self) -> Option<&str> {
        self.session_url.as_deref()
    }

    pub fn set_session_url(&mut self, url: String) {
        self.session_url = Some(url);
    }

    pub fn bytes_confirmed(&self) -> u64 {
        self.bytes_confirmed
    }

    /// Record a confirmed offset. Never moves backwards or past the payload end.
    /// Returns true if the value advanced.
    pub fn confirm(&mut self, offset: u64) -> bool {
        let offset = offset.min(self.total());
        if offset > self.bytes_confirmed {
            self.bytes_confirmed = offset;
            true
        } else {
            false
        }
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_confirmed == self.total()
    }

    /// Move to `next`, logging the transition. Illegal transitions are ignored.
    pub fn transition(&mut self, next: UploadState) -> bool {
        if !self.state.can_enter(next) {
            tracing::debug!(from = %self.state, to = %next, "ignoring illegal upload state transition");
            return false;
        }
        tracing::debug!(
            name = self.payload.name(),
            from = %self.state,
            to = %next,
            confirmed = self.bytes_confirmed,
            "upload state"
        );
        self.state = next;
        true
    }
}
