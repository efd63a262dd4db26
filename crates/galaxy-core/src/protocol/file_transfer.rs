//! Chunked file transfer bookkeeping
//!
//! Chunk frames carry no file identifier. The receiver appends every chunk to
//! the first inbound transfer that still expects chunks, which is only correct
//! while each direction of a connection has at most one file in flight.
//! [`InboundTransfers`] enforces that by dropping an incomplete transfer when a
//! new one starts.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::Timestamp;

// ----------------------------------------------------------------------------
// Identifiers and Chunk Math
// ----------------------------------------------------------------------------

/// Per-file identifier: `f<unix-millis>_<index in batch>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    pub fn generate(now: Timestamp, index: usize) -> Self {
        Self(format!("f{}_{}", now.as_millis(), index))
    }

    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Number of chunks needed for `size` bytes
pub fn chunk_count(size: u64, chunk_size: usize) -> u64 {
    size.div_ceil(chunk_size.max(1) as u64)
}

/// Byte range of chunk `index` within a file of `size` bytes
pub fn chunk_range(index: u64, size: u64, chunk_size: usize) -> Range<u64> {
    let chunk_size = chunk_size.max(1) as u64;
    let start = index.saturating_mul(chunk_size).min(size);
    let end = start.saturating_add(chunk_size).min(size);
    start..end
}

/// Progress percentage, rounded half up; an empty transfer is complete
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let done = done.min(total) as u128;
    let total = total as u128;
    ((done * 200 + total) / (total * 2)) as u8
}

// ----------------------------------------------------------------------------
// Metadata and Progress
// ----------------------------------------------------------------------------

/// What `file-start` announces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub file_id: FileId,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub chunk_count: u64,
}

impl FileMetadata {
    pub fn new(
        file_id: FileId,
        name: impl Into<String>,
        size: u64,
        mime_type: impl Into<String>,
        chunk_size: usize,
    ) -> Self {
        Self {
            file_id,
            name: name.into(),
            size,
            mime_type: mime_type.into(),
            chunk_count: chunk_count(size, chunk_size),
        }
    }

    /// The single 100% update for a file with no chunks to report
    pub fn empty_file_progress(&self) -> Option<ChunkProgress> {
        (self.chunk_count == 0).then(|| ChunkProgress {
            file_id: self.file_id.clone(),
            name: self.name.clone(),
            done: 0,
            total: 0,
            percent: percent(0, 0),
        })
    }
}

/// Snapshot emitted after each chunk in either direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkProgress {
    pub file_id: FileId,
    pub name: String,
    pub done: u64,
    pub total: u64,
    pub percent: u8,
}

/// Sender-side progress for one file
#[derive(Debug, Clone)]
pub struct OutboundProgress {
    metadata: FileMetadata,
    sent: u64,
}

impl OutboundProgress {
    pub fn new(metadata: FileMetadata) -> Self {
        Self { metadata, sent: 0 }
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn is_complete(&self) -> bool {
        self.sent >= self.metadata.chunk_count
    }

    /// Range of the next chunk to send, if any remain
    pub fn next_range(&self, chunk_size: usize) -> Option<Range<u64>> {
        (!self.is_complete()).then(|| chunk_range(self.sent, self.metadata.size, chunk_size))
    }

    pub fn record_chunk(&mut self) -> ChunkProgress {
        self.sent += 1;
        ChunkProgress {
            file_id: self.metadata.file_id.clone(),
            name: self.metadata.name.clone(),
            done: self.sent,
            total: self.metadata.chunk_count,
            percent: percent(self.sent, self.metadata.chunk_count),
        }
    }
}

// ----------------------------------------------------------------------------
// Inbound Reassembly
// ----------------------------------------------------------------------------

/// A file being received
#[derive(Debug, Clone)]
pub struct InboundTransfer {
    pub metadata: FileMetadata,
    chunks: Vec<Vec<u8>>,
}

impl InboundTransfer {
    pub fn new(metadata: FileMetadata) -> Self {
        Self {
            metadata,
            chunks: Vec::new(),
        }
    }

    pub fn received(&self) -> u64 {
        self.chunks.len() as u64
    }

    pub fn expects_chunks(&self) -> bool {
        self.received() < self.metadata.chunk_count
    }
}

/// Reassembled file handed to the event surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFile {
    pub metadata: FileMetadata,
    pub payload: Vec<u8>,
}

/// Inbound transfers for one connection
#[derive(Debug, Default)]
pub struct InboundTransfers {
    active: Vec<InboundTransfer>,
}

impl InboundTransfers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a transfer, dropping any earlier one still waiting for chunks
    ///
    /// Returns the dropped transfers.
    pub fn begin(&mut self, metadata: FileMetadata) -> Vec<InboundTransfer> {
        let (dropped, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.active)
            .into_iter()
            .partition(|t| t.expects_chunks() || t.metadata.file_id == metadata.file_id);
        self.active = kept;
        for transfer in &dropped {
            warn!(
                "Dropping incomplete inbound transfer {} ({}/{} chunks)",
                transfer.metadata.file_id,
                transfer.received(),
                transfer.metadata.chunk_count
            );
        }
        self.active.push(InboundTransfer::new(metadata));
        dropped
    }

    /// Append a chunk to the first transfer that still expects one
    ///
    /// Returns `None` for a stray chunk with no transfer to receive it.
    pub fn accept_chunk(&mut self, chunk: Vec<u8>) -> Option<ChunkProgress> {
        let transfer = self.active.iter_mut().find(|t| t.expects_chunks())?;
        transfer.chunks.push(chunk);
        let received = transfer.received();
        Some(ChunkProgress {
            file_id: transfer.metadata.file_id.clone(),
            name: transfer.metadata.name.clone(),
            done: received,
            total: transfer.metadata.chunk_count,
            percent: percent(received, transfer.metadata.chunk_count),
        })
    }

    /// Finalize a transfer, concatenating its chunks in arrival order
    pub fn finish(&mut self, file_id: &FileId) -> Option<CompletedFile> {
        let index = self
            .active
            .iter()
            .position(|t| &t.metadata.file_id == file_id)?;
        let transfer = self.active.remove(index);
        if transfer.expects_chunks() {
            warn!(
                "File {} ended after {}/{} chunks",
                file_id,
                transfer.received(),
                transfer.metadata.chunk_count
            );
        }
        let payload = transfer.chunks.concat();
        if payload.len() as u64 != transfer.metadata.size {
            warn!(
                "File {} declared {} bytes but {} arrived",
                file_id,
                transfer.metadata.size,
                payload.len()
            );
        }
        Some(CompletedFile {
            metadata: transfer.metadata,
            payload,
        })
    }

    /// Drop a transfer the sender cancelled
    pub fn cancel(&mut self, file_id: &FileId) -> Option<InboundTransfer> {
        let index = self
            .active
            .iter()
            .position(|t| &t.metadata.file_id == file_id)?;
        Some(self.active.remove(index))
    }

    /// Drop everything; returns how many transfers were discarded
    pub fn clear(&mut self) -> usize {
        let count = self.active.len();
        self.active.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
