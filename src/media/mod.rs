//! Media collaborators: catalog, byte source and thumbnail provider.
//!
//! The protocol engine only talks to the three traits defined here.
//! Filesystem-backed implementations live in the submodules so the agent can
//! serve a plain directory tree:
//!
//! - [`catalog::FsCatalog`] - scans a media root for images and videos
//! - [`source::FsByteSource`] - opens locators as files, seeking to offsets
//! - [`thumbnail::ImageThumbnailProvider`] - scales images with the `image` crate
//!
//! # Locators
//!
//! A locator is an opaque string. The filesystem implementations accept plain
//! paths and `file://` URIs; any other scheme is rejected as unsupported.

pub mod catalog;
pub mod source;
pub mod thumbnail;

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::protocol::{MediaItem, MediaKind};

pub use catalog::FsCatalog;
pub use source::FsByteSource;
pub use thumbnail::{ImageThumbnailProvider, NoThumbnails};

/// Enumerates media items.
#[async_trait]
pub trait MediaCatalog: Send + Sync {
    /// Items of one kind, newest first, optionally modified after
    /// `after_modified` (epoch seconds, exclusive).
    async fn list(
        &self,
        kind: MediaKind,
        after_modified: Option<i64>,
        limit: u32,
    ) -> anyhow::Result<Vec<MediaItem>>;

    /// A single item, or `None` when the locator is unknown.
    async fn stat(&self, locator: &str) -> anyhow::Result<Option<MediaItem>>;

    /// Items of any kind modified after `since_epoch_ms`, newest first.
    async fn find_new_since(
        &self,
        since_epoch_ms: i64,
        limit: u32,
    ) -> anyhow::Result<Vec<MediaItem>>;
}

/// Produces thumbnail bitmaps.
///
/// Called from a blocking worker. `None` means the platform or the resource
/// has no thumbnail.
pub trait ThumbnailProvider: Send + Sync {
    /// Bitmap fitting within `max_w` × `max_h`.
    fn generate(&self, locator: &str, max_w: u32, max_h: u32) -> Option<image::DynamicImage>;
}

/// An opened resource.
pub struct ByteStream {
    /// Resource bytes from the current position.
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Total length of the resource, when the source knows it.
    pub total_len: Option<u64>,
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream")
            .field("total_len", &self.total_len)
            .finish_non_exhaustive()
    }
}

/// Opens resources for reading.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Open `locator` at its first byte.
    async fn open(&self, locator: &str) -> io::Result<ByteStream>;

    /// Open `locator` positioned `offset` bytes in.
    ///
    /// The default reads and discards the skipped prefix; sources that can
    /// seek should override it.
    async fn open_at(&self, locator: &str, offset: u64) -> io::Result<ByteStream> {
        let mut stream = self.open(locator).await?;
        if offset > 0 {
            let mut skipped = (&mut stream.reader).take(offset);
            tokio::io::copy(&mut skipped, &mut tokio::io::sink()).await?;
        }
        Ok(stream)
    }
}

/// Maps locators to filesystem paths, optionally confined to a root.
#[derive(Debug, Clone, Default)]
pub struct LocatorResolver {
    root: Option<PathBuf>,
}

impl LocatorResolver {
    /// Accept any readable path.
    #[must_use]
    pub fn unrestricted() -> Self {
        Self { root: None }
    }

    /// Only accept paths that resolve inside `root`.
    ///
    /// Relative locators are taken relative to `root`.
    pub fn confined(root: &Path) -> io::Result<Self> {
        Ok(Self {
            root: Some(root.canonicalize()?),
        })
    }

    /// The canonical root, when confined.
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Resolve a locator to an existing path.
    ///
    /// Blocks on filesystem metadata; call from a blocking context.
    pub fn resolve(&self, locator: &str) -> io::Result<PathBuf> {
        let path = locator_to_path(locator)?;
        let Some(root) = &self.root else {
            return Ok(path);
        };

        let path = if path.is_relative() { root.join(path) } else { path };
        let canonical = path.canonicalize()?;
        if canonical.starts_with(root) {
            Ok(canonical)
        } else {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{locator} is outside the media root"),
            ))
        }
    }
}

/// Interpret a locator as a path (`file://` prefix or plain path).
pub fn locator_to_path(locator: &str) -> io::Result<PathBuf> {
    if locator.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty locator"));
    }
    if let Some(rest) = locator.strip_prefix("file://") {
        return Ok(PathBuf::from(rest));
    }
    if locator.contains("://") {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("unsupported locator scheme: {locator}"),
        ));
    }
    Ok(PathBuf::from(locator))
}
