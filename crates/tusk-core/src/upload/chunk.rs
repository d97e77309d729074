//! Chunk planning and the confirmed-chunk ledger.

/// A chunk of the payload: byte range [start, end) (half-open).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the plan, 0-based.
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl Chunk {
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Splits `[offset, total)` into back-to-back chunks of `chunk_size` bytes.
///
/// The last chunk may be shorter. Returns an empty vec when nothing is left
/// or `chunk_size` is 0.
pub fn plan_chunks(offset: u64, total: u64, chunk_size: u64) -> Vec<Chunk> {
    if offset >= total || chunk_size == 0 {
        return Vec::new();
    }
    let count = (total - offset).div_ceil(chunk_size) as usize;
    let mut out = Vec::with_capacity(count);
    let mut start = offset;
    while start < total {
        let end = start.saturating_add(chunk_size).min(total);
        out.push(Chunk {
            index: out.len(),
            start,
            end,
        });
        start = end;
    }
    out
}

/// Which planned chunks the server has acknowledged.
///
/// Chunks can be confirmed in any order; only the contiguous run starting at
/// the resume offset counts as uploaded.
#[derive(Debug, Clone)]
pub struct ChunkLedger {
    base: u64,
    chunks: Vec<Chunk>,
    bits: Vec<u8>,
    prefix: usize,
}

impl ChunkLedger {
    pub fn new(base: u64, chunks: &[Chunk]) -> Self {
        Self {
            base,
            chunks: chunks.to_vec(),
            bits: vec![0u8; chunks.len().div_ceil(8)],
            prefix: 0,
        }
    }

    pub fn is_confirmed(&self, index: usize) -> bool {
        self.bits
            .get(index / 8)
            .map(|&b| b & (1 << (index % 8)) != 0)
            .unwrap_or(false)
    }

    /// Mark chunk `index` confirmed. Returns the new contiguous offset if it advanced.
    pub fn confirm(&mut self, index: usize) -> Option<u64> {
        if index >= self.chunks.len() || self.is_confirmed(index) {
            return None;
        }
        self.bits[index / 8] |= 1 << (index % 8);
        let before = self.prefix;
        while self.prefix < self.chunks.len() && self.is_confirmed(self.prefix) {
            self.prefix += 1;
        }
        (self.prefix > before).then(|| self.confirmed_offset())
    }

    /// End of the contiguous confirmed run.
    pub fn confirmed_offset(&self) -> u64 {
        match self.prefix {
            0 => self.base,
            n => self.chunks[n - 1].end,
        }
    }

    pub fn confirmed_count(&self) -> usize {
        (0..self.chunks.len()).filter(|&i| self.is_confirmed(i)).count()
    }

    pub fn all_confirmed(&self) -> bool {
        self.prefix == self.chunks.len()
    }
}
