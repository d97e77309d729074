//! Partial sessions of a concatenated upload.
//!
//! Each planned chunk is uploaded into its own partial session so chunks can
//! travel in parallel without violating the per-session offset rule. The set
//! is written to the previous-upload store every time a partial is created,
//! so an interrupted upload can pick up the parts that already exist.

use std::sync::{Arc, Mutex};

use super::previous::{PreviousUploads, StoredUpload};

/// One chunk's partial session and how much of it the server holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialSlot {
    pub url: Option<String>,
    pub offset: u64,
}

pub struct PartialSet {
    slots: Mutex<Vec<PartialSlot>>,
    chunk_size: u64,
    fingerprint: String,
    store: Arc<dyn PreviousUploads>,
}

impl PartialSet {
    pub fn new(
        slots: Vec<PartialSlot>,
        chunk_size: u64,
        fingerprint: impl Into<String>,
        store: Arc<dyn PreviousUploads>,
    ) -> Self {
        Self {
            slots: Mutex::new(slots),
            chunk_size,
            fingerprint: fingerprint.into(),
            store,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn slot(&self, index: usize) -> PartialSlot {
        self.slots
            .lock()
            .unwrap()
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    /// Record the session created for chunk `index` and persist the set.
    pub fn created(&self, index: usize, url: &str) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get_mut(index) {
            *slot = PartialSlot {
                url: Some(url.to_string()),
                offset: 0,
            };
        }
        let stored = StoredUpload::Partial {
            chunk_size: self.chunk_size,
            parts: slots.iter().map(|s| s.url.clone()).collect(),
        };
        self.store.remember(&self.fingerprint, &stored);
    }

    /// Part URLs in chunk order, once every chunk has a session.
    pub fn urls(&self) -> Option<Vec<String>> {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.url.clone())
            .collect()
    }
}
