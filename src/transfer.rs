//! Data-producing commands: chunked reads, thumbnails and hashing.
//!
//! Each operation allocates its own buffer, so any number of them can run
//! concurrently. Replies go out through [`Outbound`], which keeps every
//! metadata frame glued to its binary payload.
//!
//! | command | success                                  | failure                      |
//! |---------|------------------------------------------|------------------------------|
//! | `read`  | `read_chunk` (+ payload when `len > 0`)  | `error{reqId, read_failed}`  |
//! | `thumb` | `thumb_meta` + JPEG payload              | `error{reqId, no_thumb}`     |
//! | `hash`  | `hash_result{sha256}`                    | `hash_result{sha256: null}`  |

// Rust guideline compliant 2026-02

use std::io;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::media::{ByteSource, ThumbnailProvider};
use crate::outbound::Outbound;
use crate::protocol::Reply;

/// Largest payload a single `read_chunk` carries (256 KiB).
pub const CHUNK_CAP: usize = 256 * 1024;

/// Read size while hashing (512 KiB).
pub const HASH_READ_SIZE: usize = 512 * 1024;

/// JPEG quality for thumbnails.
pub const JPEG_QUALITY: u8 = 80;

/// Error code for unreadable resources.
pub const READ_FAILED: &str = "read_failed";

/// Error code for missing thumbnail support.
pub const NO_THUMB: &str = "no_thumb";

/// Failures of a transfer operation.
#[derive(Debug)]
pub enum TransferError {
    /// The locator could not be opened or read.
    Resource {
        /// Locator that failed.
        locator: String,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// No thumbnail can be produced for the locator.
    Unsupported {
        /// Locator that was asked for.
        locator: String,
        /// Why.
        reason: String,
    },
}

impl TransferError {
    fn resource(locator: &str, source: io::Error) -> Self {
        Self::Resource {
            locator: locator.to_string(),
            source,
        }
    }

    fn unsupported(locator: &str, reason: impl Into<String>) -> Self {
        Self::Unsupported {
            locator: locator.to_string(),
            reason: reason.into(),
        }
    }

    /// Wire error code for this failure.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Resource { .. } => READ_FAILED,
            Self::Unsupported { .. } => NO_THUMB,
        }
    }
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resource { locator, source } => write!(f, "Cannot read {locator}: {source}"),
            Self::Unsupported { locator, reason } => {
                write!(f, "No thumbnail for {locator}: {reason}")
            }
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Resource { source, .. } => Some(source),
            Self::Unsupported { .. } => None,
        }
    }
}

/// Bytes read for one `read` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Payload, at most [`CHUNK_CAP`] bytes.
    pub data: Vec<u8>,
    /// Whether the chunk reaches the end of the resource.
    pub eof: bool,
}

/// Executes `read`, `thumb` and `hash` commands.
pub struct TransferEngine {
    source: Arc<dyn ByteSource>,
    thumbnails: Arc<dyn ThumbnailProvider>,
}

impl std::fmt::Debug for TransferEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferEngine").finish_non_exhaustive()
    }
}

impl TransferEngine {
    /// Engine reading from `source` and rendering with `thumbnails`.
    #[must_use]
    pub fn new(source: Arc<dyn ByteSource>, thumbnails: Arc<dyn ThumbnailProvider>) -> Self {
        Self { source, thumbnails }
    }

    /// Read up to `min(length, CHUNK_CAP)` bytes starting at `offset`.
    ///
    /// `eof` is set when nothing was read, or when the source knows its
    /// length and the chunk reaches it.
    pub async fn read_chunk(
        &self,
        locator: &str,
        offset: u64,
        length: u32,
    ) -> Result<Chunk, TransferError> {
        let stream = self
            .source
            .open_at(locator, offset)
            .await
            .map_err(|e| TransferError::resource(locator, e))?;

        let want = (length as usize).min(CHUNK_CAP);
        let mut data = Vec::with_capacity(want);
        stream
            .reader
            .take(want as u64)
            .read_to_end(&mut data)
            .await
            .map_err(|e| TransferError::resource(locator, e))?;

        let read = data.len() as u64;
        let eof = read == 0
            || stream
                .total_len
                .is_some_and(|total| total > 0 && offset.saturating_add(read) >= total);

        Ok(Chunk { data, eof })
    }

    /// Answer a `read` command.
    pub async fn stream_chunk(
        &self,
        out: &Outbound,
        locator: &str,
        offset: u64,
        length: u32,
        req_id: &str,
    ) {
        match self.read_chunk(locator, offset, length).await {
            Ok(chunk) => {
                let meta = Reply::ReadChunkMeta {
                    req_id: req_id.to_string(),
                    offset,
                    len: chunk.data.len() as u32,
                    eof: chunk.eof,
                };
                log::debug!(
                    "[Transfer] read {} offset={} len={} eof={}",
                    req_id,
                    offset,
                    chunk.data.len(),
                    chunk.eof
                );
                if chunk.data.is_empty() {
                    out.send(&meta);
                } else {
                    out.send_with_payload(&meta, chunk.data);
                }
            }
            Err(e) => {
                log::warn!("[Transfer] read {} failed: {}", req_id, e);
                out.send(&Reply::error(Some(req_id), e.code(), Some(e.to_string())));
            }
        }
    }

    /// Render a JPEG thumbnail on a blocking worker.
    pub async fn render_thumbnail(
        &self,
        locator: &str,
        max_w: u32,
        max_h: u32,
    ) -> Result<Vec<u8>, TransferError> {
        let provider = Arc::clone(&self.thumbnails);
        let owned = locator.to_string();

        tokio::task::spawn_blocking(move || {
            let image = provider
                .generate(&owned, max_w, max_h)
                .ok_or_else(|| TransferError::unsupported(&owned, "thumbnail unavailable"))?;
            encode_jpeg(&image, JPEG_QUALITY)
                .map_err(|e| TransferError::unsupported(&owned, e.to_string()))
        })
        .await
        .map_err(|e| TransferError::unsupported(locator, e.to_string()))?
    }

    /// Answer a `thumb` command.
    pub async fn send_thumbnail(
        &self,
        out: &Outbound,
        locator: &str,
        max_w: u32,
        max_h: u32,
        req_id: &str,
    ) {
        match self.render_thumbnail(locator, max_w, max_h).await {
            Ok(jpeg) => {
                let meta = Reply::ThumbMeta {
                    req_id: req_id.to_string(),
                    len: jpeg.len() as u32,
                };
                out.send_with_payload(&meta, jpeg);
            }
            Err(e) => {
                log::debug!("[Transfer] thumb {}: {}", req_id, e);
                out.send(&Reply::error(Some(req_id), NO_THUMB, Some(e.to_string())));
            }
        }
    }

    /// SHA-256 of the whole resource as lowercase hex.
    pub async fn compute_hash(&self, locator: &str) -> Result<String, TransferError> {
        let mut stream = self
            .source
            .open(locator)
            .await
            .map_err(|e| TransferError::resource(locator, e))?;

        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; HASH_READ_SIZE];
        loop {
            let n = stream
                .reader
                .read(&mut buf)
                .await
                .map_err(|e| TransferError::resource(locator, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        Ok(hasher.finalize().iter().map(|b| format!("{b:02x}")).collect())
    }

    /// Answer a `hash` command.
    pub async fn hash_command(&self, out: &Outbound, locator: &str, req_id: &str) {
        let sha256 = match self.compute_hash(locator).await {
            Ok(digest) => Some(digest),
            Err(e) => {
                log::warn!("[Transfer] hash {} failed: {}", req_id, e);
                None
            }
        };
        out.send(&Reply::HashResult {
            locator: locator.to_string(),
            sha256,
        });
    }
}

/// Encode an image as baseline JPEG, dropping any alpha channel.
pub fn encode_jpeg(image: &image::DynamicImage, quality: u8) -> image::ImageResult<Vec<u8>> {
    let rgb = image.to_rgb8();
    let mut out = Vec::new();
    {
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
        encoder.encode_image(&rgb)?;
    }
    Ok(out)
}
