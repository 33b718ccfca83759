//! Chunked file transfer over the reliable-ordered data channel.
//!
//! Framing: one `file-meta` text frame, then the file as in-order binary
//! chunks of [`FILE_CHUNK_SIZE`], no end marker -- completion is inferred
//! when the received byte count reaches the declared size. The channel
//! carries at most one file at a time; a fresh `file-meta` discards any
//! unfinished transfer. Not safe over an unordered/unreliable channel
//! configuration without adding sequence numbers.

use bytes::{Bytes, BytesMut};
use tracing::{debug, info, warn};

use campana_shared::constants::{FILE_CHUNK_SIZE, MAX_FILE_SIZE};
use campana_shared::protocol::DataFrame;

use crate::error::CallError;
use crate::transport::{DataMessage, PeerTransport, TransportError};

/// A fully reassembled incoming file.
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    pub name: String,
    pub size: u64,
    pub data: Bytes,
}

struct IncomingTransfer {
    name: String,
    declared_size: u64,
    bytes_received: u64,
    chunks: Vec<Bytes>,
}

/// Receiving half: single-slot reassembly state for the data channel.
#[derive(Default)]
pub struct FileReceiver {
    active: Option<IncomingTransfer>,
}

impl FileReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_receiving(&self) -> bool {
        self.active.is_some()
    }

    /// Handle a `file-meta` frame. A zero-byte file completes
    /// immediately; an oversized declaration is rejected as malformed
    /// metadata (the call keeps running, only this transfer dies).
    pub fn on_metadata(
        &mut self,
        name: String,
        size: u64,
    ) -> Result<Option<ReceivedFile>, CallError> {
        if let Some(prior) = self.active.take() {
            warn!(
                name = %prior.name,
                received = prior.bytes_received,
                declared = prior.declared_size,
                "Discarding unfinished transfer, new metadata arrived"
            );
        }

        if size > MAX_FILE_SIZE {
            return Err(CallError::FileTransferAborted(format!(
                "declared size {size} exceeds limit {MAX_FILE_SIZE}"
            )));
        }

        if size == 0 {
            debug!(name = %name, "Zero-byte transfer completes immediately");
            return Ok(Some(ReceivedFile {
                name,
                size: 0,
                data: Bytes::new(),
            }));
        }

        debug!(name = %name, size, "Transfer started");
        self.active = Some(IncomingTransfer {
            name,
            declared_size: size,
            bytes_received: 0,
            chunks: Vec::new(),
        });
        Ok(None)
    }

    /// Handle a binary frame. Frames with no active transfer are
    /// silently dropped so a stale or malformed sender cannot corrupt an
    /// unrelated later transfer. A chunk that would overshoot the
    /// declared size aborts the transfer the same way.
    pub fn on_chunk(&mut self, chunk: Bytes) -> Option<ReceivedFile> {
        let Some(transfer) = &mut self.active else {
            debug!(len = chunk.len(), "Binary frame with no active transfer, dropping");
            return None;
        };

        let received = transfer.bytes_received + chunk.len() as u64;
        if received > transfer.declared_size {
            warn!(
                name = %transfer.name,
                received,
                declared = transfer.declared_size,
                "Chunk overshoots declared size, aborting transfer"
            );
            self.active = None;
            return None;
        }

        transfer.bytes_received = received;
        transfer.chunks.push(chunk);

        if transfer.bytes_received < transfer.declared_size {
            return None;
        }

        let transfer = self.active.take().expect("active transfer");
        let mut data = BytesMut::with_capacity(transfer.declared_size as usize);
        for chunk in &transfer.chunks {
            data.extend_from_slice(chunk);
        }

        info!(
            name = %transfer.name,
            size = transfer.declared_size,
            chunks = transfer.chunks.len(),
            "Transfer complete"
        );

        Some(ReceivedFile {
            name: transfer.name,
            size: transfer.declared_size,
            data: data.freeze(),
        })
    }
}

/// Send a file: metadata first, then fixed-size chunks in order.
pub async fn send_file(
    transport: &dyn PeerTransport,
    name: &str,
    data: &[u8],
) -> Result<(), TransportError> {
    let meta = DataFrame::FileMeta {
        name: name.to_string(),
        size: data.len() as u64,
    };
    transport.send_data(DataMessage::Text(meta.to_json())).await?;

    for chunk in data.chunks(FILE_CHUNK_SIZE) {
        transport
            .send_data(DataMessage::Binary(Bytes::copy_from_slice(chunk)))
            .await?;
    }

    debug!(
        name = %name,
        size = data.len(),
        chunks = data.len().div_ceil(FILE_CHUNK_SIZE),
        "File sent"
    );
    Ok(())
}
