//! Test doubles shared by unit tests.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::connection::{Connection, OutboundFrame};
use crate::media::{ByteSource, ByteStream, MediaCatalog};
use crate::protocol::{self, MediaItem, MediaKind, Reply};

/// Connection that records every frame it is asked to send.
#[derive(Debug, Default)]
pub struct RecordingConnection {
    frames: Mutex<Vec<OutboundFrame>>,
}

impl RecordingConnection {
    pub fn frames(&self) -> Vec<OutboundFrame> {
        self.frames.lock().unwrap().clone()
    }

    /// Text frames decoded as replies, binary frames skipped.
    pub fn replies(&self) -> Vec<Reply> {
        self.frames()
            .into_iter()
            .filter_map(|frame| match frame {
                OutboundFrame::Text(text) => Some(protocol::decode(&text).unwrap()),
                _ => None,
            })
            .collect()
    }

    pub fn binary_count(&self) -> usize {
        self.frames()
            .iter()
            .filter(|f| matches!(f, OutboundFrame::Binary(_)))
            .count()
    }
}

impl Connection for RecordingConnection {
    fn ensure_connected(&self) {}

    fn close(&self) {}

    fn send_text(&self, text: String) {
        self.frames.lock().unwrap().push(OutboundFrame::Text(text));
    }

    fn send_binary(&self, bytes: Vec<u8>) {
        self.frames.lock().unwrap().push(OutboundFrame::Binary(bytes));
    }
}

/// In-memory resources keyed by locator.
#[derive(Debug, Default)]
pub struct MemorySource {
    resources: HashMap<String, Vec<u8>>,
    report_length: bool,
}

impl MemorySource {
    pub fn new() -> Self {
        Self {
            resources: HashMap::new(),
            report_length: true,
        }
    }

    /// Streams without a known total length.
    pub fn without_length() -> Self {
        Self {
            resources: HashMap::new(),
            report_length: false,
        }
    }

    pub fn with(mut self, locator: &str, bytes: Vec<u8>) -> Self {
        self.resources.insert(locator.to_string(), bytes);
        self
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    async fn open(&self, locator: &str) -> io::Result<ByteStream> {
        let bytes = self
            .resources
            .get(locator)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, locator.to_string()))?;
        let total_len = self.report_length.then_some(bytes.len() as u64);
        Ok(ByteStream {
            reader: Box::new(std::io::Cursor::new(bytes)),
            total_len,
        })
    }
}

/// Catalog serving a fixed item list, or failing every call.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    pub items: Vec<MediaItem>,
    pub fail: bool,
}

impl StaticCatalog {
    fn check(&self) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("media store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl MediaCatalog for StaticCatalog {
    async fn list(
        &self,
        kind: MediaKind,
        after_modified: Option<i64>,
        limit: u32,
    ) -> anyhow::Result<Vec<MediaItem>> {
        self.check()?;
        Ok(self
            .items
            .iter()
            .filter(|i| i.is_video == (kind == MediaKind::Videos))
            .filter(|i| after_modified.map_or(true, |after| i.modified_time > after))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn stat(&self, locator: &str) -> anyhow::Result<Option<MediaItem>> {
        self.check()?;
        Ok(self.items.iter().find(|i| i.locator == locator).cloned())
    }

    async fn find_new_since(
        &self,
        since_epoch_ms: i64,
        limit: u32,
    ) -> anyhow::Result<Vec<MediaItem>> {
        self.check()?;
        Ok(self
            .items
            .iter()
            .filter(|i| i.modified_time * 1000 > since_epoch_ms)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

/// A catalog entry with the given locator and timestamp.
pub fn item(locator: &str, modified_time: i64, is_video: bool) -> MediaItem {
    MediaItem {
        id: modified_time as u64,
        locator: locator.to_string(),
        display_name: locator.rsplit('/').next().map(str::to_string),
        mime: Some(if is_video { "video/mp4" } else { "image/jpeg" }.to_string()),
        size: 100,
        modified_time,
        width: None,
        height: None,
        is_video,
    }
}

/// Source whose every open waits for a permit on `gate`.
#[derive(Debug)]
pub struct GatedSource {
    inner: MemorySource,
    gate: Arc<Notify>,
}

impl GatedSource {
    pub fn new(inner: MemorySource, gate: Arc<Notify>) -> Self {
        Self { inner, gate }
    }
}

#[async_trait]
impl ByteSource for GatedSource {
    async fn open(&self, locator: &str) -> io::Result<ByteStream> {
        self.gate.notified().await;
        self.inner.open(locator).await
    }
}
