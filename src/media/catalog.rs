//! Filesystem media catalog.
//!
//! Walks a media root on every query (no index), classifying files by
//! extension. Hidden files and directories are skipped, symlinks are not
//! followed, and empty files are never reported.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{LocatorResolver, MediaCatalog};
use crate::protocol::{MediaItem, MediaKind};

/// Catalog over a directory tree.
#[derive(Debug, Clone)]
pub struct FsCatalog {
    root: PathBuf,
    resolver: LocatorResolver,
}

impl FsCatalog {
    /// Catalog rooted at `root` (must exist).
    pub fn new(root: &Path) -> io::Result<Self> {
        let resolver = LocatorResolver::confined(root)?;
        let root = resolver.root().map_or_else(|| root.to_path_buf(), Path::to_path_buf);
        Ok(Self { root, resolver })
    }

    /// The canonical media root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every media item under the root, newest first.
    fn scan(root: &Path) -> io::Result<Vec<MediaItem>> {
        let mut items = Vec::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if dir != root => {
                    log::debug!("[Catalog] Skipping unreadable {}: {}", dir.display(), e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            for entry in entries.flatten() {
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                let Ok(file_type) = entry.file_type() else { continue };
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    if let Some(item) = describe(&path) {
                        items.push(item);
                    }
                }
            }
        }

        items.sort_by(|a, b| {
            b.modified_time
                .cmp(&a.modified_time)
                .then_with(|| a.locator.cmp(&b.locator))
        });
        Ok(items)
    }

    async fn scan_filtered<F>(&self, limit: u32, keep: F) -> Result<Vec<MediaItem>>
    where
        F: Fn(&MediaItem) -> bool + Send + 'static,
    {
        let root = self.root.clone();
        let items = tokio::task::spawn_blocking(move || Self::scan(&root))
            .await
            .context("catalog scan task failed")?
            .with_context(|| format!("failed to scan {}", self.root.display()))?;

        Ok(items
            .into_iter()
            .filter(|item| keep(item))
            .take(limit as usize)
            .collect())
    }
}

#[async_trait]
impl MediaCatalog for FsCatalog {
    async fn list(
        &self,
        kind: MediaKind,
        after_modified: Option<i64>,
        limit: u32,
    ) -> Result<Vec<MediaItem>> {
        let want_video = kind == MediaKind::Videos;
        self.scan_filtered(limit, move |item| {
            item.is_video == want_video
                && after_modified.map_or(true, |after| item.modified_time > after)
        })
        .await
    }

    async fn stat(&self, locator: &str) -> Result<Option<MediaItem>> {
        let resolver = self.resolver.clone();
        let locator = locator.to_string();
        let item = tokio::task::spawn_blocking(move || match resolver.resolve(&locator) {
            Ok(path) if path.is_file() => describe(&path),
            Ok(_) => None,
            Err(e) => {
                log::debug!("[Catalog] stat {}: {}", locator, e);
                None
            }
        })
        .await
        .context("catalog stat task failed")?;
        Ok(item)
    }

    async fn find_new_since(&self, since_epoch_ms: i64, limit: u32) -> Result<Vec<MediaItem>> {
        self.scan_filtered(limit, move |item| {
            item.modified_time.saturating_mul(1000) > since_epoch_ms
        })
        .await
    }
}

/// Build a catalog entry for a media file; `None` for other or empty files.
fn describe(path: &Path) -> Option<MediaItem> {
    let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
    let (mime, is_video) = classify_extension(&ext)?;

    let meta = fs::metadata(path).ok()?;
    if meta.len() == 0 {
        return None;
    }
    let modified_time = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs() as i64);

    let (width, height) = if is_video {
        (None, None)
    } else {
        image::image_dimensions(path)
            .map_or((None, None), |(w, h)| (Some(w), Some(h)))
    };

    let locator = path.to_string_lossy().into_owned();
    Some(MediaItem {
        id: item_id(&locator),
        display_name: path.file_name().map(|n| n.to_string_lossy().into_owned()),
        locator,
        mime: Some(mime.to_string()),
        size: meta.len(),
        modified_time,
        width,
        height,
        is_video,
    })
}

/// Stable id derived from the locator.
fn item_id(locator: &str) -> u64 {
    let hash = Sha256::digest(locator.as_bytes());
    let mut id = [0u8; 8];
    id.copy_from_slice(&hash[..8]);
    u64::from_be_bytes(id)
}

/// MIME type and video flag for a lowercase file extension.
fn classify_extension(ext: &str) -> Option<(&'static str, bool)> {
    let class = match ext {
        "jpg" | "jpeg" => ("image/jpeg", false),
        "png" => ("image/png", false),
        "gif" => ("image/gif", false),
        "webp" => ("image/webp", false),
        "bmp" => ("image/bmp", false),
        "heic" => ("image/heic", false),
        "heif" => ("image/heif", false),
        "mp4" | "m4v" => ("video/mp4", true),
        "mov" => ("video/quicktime", true),
        "mkv" => ("video/x-matroska", true),
        "webm" => ("video/webm", true),
        "3gp" => ("video/3gpp", true),
        "avi" => ("video/x-msvideo", true),
        _ => return None,
    };
    Some(class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn write_file(path: &Path, bytes: &[u8], modified_secs: u64) {
        fs::write(path, bytes).unwrap();
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(UNIX_EPOCH + Duration::from_secs(modified_secs))
            .unwrap();
    }

    fn write_png(path: &Path, w: u32, h: u32, modified_secs: u64) {
        image::RgbImage::new(w, h).save(path).unwrap();
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(UNIX_EPOCH + Duration::from_secs(modified_secs))
            .unwrap();
    }

    fn fixture() -> (tempfile::TempDir, FsCatalog) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("DCIM/Camera")).unwrap();
        fs::create_dir_all(root.join(".thumbnails")).unwrap();

        write_png(&root.join("DCIM/Camera/old.png"), 4, 3, 1_000);
        write_png(&root.join("DCIM/Camera/new.png"), 8, 6, 3_000);
        write_file(&root.join("DCIM/Camera/clip.mp4"), &[1; 64], 2_000);
        write_file(&root.join("DCIM/Camera/empty.jpg"), &[], 4_000);
        write_file(&root.join("notes.txt"), b"hello", 5_000);
        write_file(&root.join(".thumbnails/cached.jpg"), &[1; 16], 6_000);

        let catalog = FsCatalog::new(root).unwrap();
        (dir, catalog)
    }

    fn names(items: &[MediaItem]) -> Vec<&str> {
        items
            .iter()
            .map(|i| i.display_name.as_deref().unwrap_or(""))
            .collect()
    }

    #[tokio::test]
    async fn test_list_images_newest_first() {
        let (_dir, catalog) = fixture();
        let items = catalog.list(MediaKind::Images, None, 10).await.unwrap();
        assert_eq!(names(&items), vec!["new.png", "old.png"]);

        let newest = &items[0];
        assert_eq!(newest.width, Some(8));
        assert_eq!(newest.height, Some(6));
        assert_eq!(newest.mime.as_deref(), Some("image/png"));
        assert_eq!(newest.modified_time, 3_000);
        assert!(!newest.is_video);
    }

    #[tokio::test]
    async fn test_list_videos() {
        let (_dir, catalog) = fixture();
        let items = catalog.list(MediaKind::Videos, None, 10).await.unwrap();
        assert_eq!(names(&items), vec!["clip.mp4"]);
        assert!(items[0].is_video);
        assert_eq!(items[0].size, 64);
        assert_eq!(items[0].width, None);
    }

    #[tokio::test]
    async fn test_list_after_modified_and_limit() {
        let (_dir, catalog) = fixture();
        let items = catalog
            .list(MediaKind::Images, Some(1_000), 10)
            .await
            .unwrap();
        assert_eq!(names(&items), vec!["new.png"]);

        let items = catalog.list(MediaKind::Images, None, 1).await.unwrap();
        assert_eq!(names(&items), vec!["new.png"]);
    }

    #[tokio::test]
    async fn test_find_new_since_spans_kinds() {
        let (_dir, catalog) = fixture();
        let items = catalog.find_new_since(1_500_000, 10).await.unwrap();
        assert_eq!(names(&items), vec!["new.png", "clip.mp4"]);
    }

    #[tokio::test]
    async fn test_stat_known_and_unknown() {
        let (dir, catalog) = fixture();
        let path = dir.path().join("DCIM/Camera/clip.mp4");
        let item = catalog
            .stat(path.to_str().unwrap())
            .await
            .unwrap()
            .expect("clip should be found");
        assert_eq!(item.display_name.as_deref(), Some("clip.mp4"));

        let listed = catalog.list(MediaKind::Videos, None, 10).await.unwrap();
        assert_eq!(listed[0].id, item.id);
        assert_eq!(listed[0].locator, item.locator);

        assert!(catalog.stat("/definitely/not/here.jpg").await.unwrap().is_none());
        assert!(catalog
            .stat(dir.path().join("notes.txt").to_str().unwrap())
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_item_id_is_stable() {
        assert_eq!(item_id("/a/b.jpg"), item_id("/a/b.jpg"));
        assert_ne!(item_id("/a/b.jpg"), item_id("/a/c.jpg"));
    }

    #[test]
    fn test_classify_extension() {
        assert_eq!(classify_extension("jpeg"), Some(("image/jpeg", false)));
        assert_eq!(classify_extension("mov"), Some(("video/quicktime", true)));
        assert_eq!(classify_extension("txt"), None);
    }

    #[test]
    fn test_scan_missing_root_fails() {
        let missing = std::env::temp_dir().join(format!(
            "mediabridge-missing-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        assert!(FsCatalog::scan(&missing).is_err());
    }
}
