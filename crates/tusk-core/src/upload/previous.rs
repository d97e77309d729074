//! Lookup of sessions started by earlier `upload()` calls.
//!
//! Only the lookup capability is provided here. Where the map lives between
//! process runs is up to the embedding application.

use std::collections::HashMap;
use std::sync::RwLock;

use sha2::{Digest, Sha256};

use super::payload::Payload;

/// Identity of an upload: same file, same target, same endpoint.
pub fn fingerprint(payload: &dyn Payload, destination: &str, endpoint: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [
        payload.name(),
        payload.content_type(),
        &payload.len().to_string(),
        destination,
        endpoint,
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("tusk-{}", hex::encode(hasher.finalize()))
}

/// What an earlier call left on the server for one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredUpload {
    /// One session receiving the whole payload in order.
    Single(String),
    /// Partial sessions, one per `chunk_size` chunk, concatenated at the end.
    /// `None` marks a chunk whose partial session was never created.
    Partial {
        chunk_size: u64,
        parts: Vec<Option<String>>,
    },
}

/// Store of fingerprint -> sessions of an unfinished upload.
pub trait PreviousUploads: Send + Sync {
    fn find(&self, fingerprint: &str) -> Option<StoredUpload>;

    fn remember(&self, fingerprint: &str, upload: &StoredUpload);

    fn forget(&self, fingerprint: &str);
}

#[derive(Debug, Default)]
pub struct MemoryPreviousUploads {
    uploads: RwLock<HashMap<String, StoredUpload>>,
}

impl MemoryPreviousUploads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.uploads.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PreviousUploads for MemoryPreviousUploads {
    fn find(&self, fingerprint: &str) -> Option<StoredUpload> {
        self.uploads.read().unwrap().get(fingerprint).cloned()
    }

    fn remember(&self, fingerprint: &str, upload: &StoredUpload) {
        self.uploads
            .write()
            .unwrap()
            .insert(fingerprint.to_string(), upload.clone());
    }

    fn forget(&self, fingerprint: &str) {
        self.uploads.write().unwrap().remove(fingerprint);
    }
}
