//! Thumbnail providers.

use image::DynamicImage;

use super::{LocatorResolver, ThumbnailProvider};

/// Provider for platforms without thumbnail support.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoThumbnails;

impl ThumbnailProvider for NoThumbnails {
    fn generate(&self, _locator: &str, _max_w: u32, _max_h: u32) -> Option<DynamicImage> {
        None
    }
}

/// Decodes still images and scales them down, preserving aspect ratio.
///
/// Videos and anything `image` cannot decode have no thumbnail.
#[derive(Debug, Clone, Default)]
pub struct ImageThumbnailProvider {
    resolver: LocatorResolver,
}

impl ImageThumbnailProvider {
    /// Provider resolving locators with `resolver`.
    #[must_use]
    pub fn new(resolver: LocatorResolver) -> Self {
        Self { resolver }
    }
}

impl ThumbnailProvider for ImageThumbnailProvider {
    fn generate(&self, locator: &str, max_w: u32, max_h: u32) -> Option<DynamicImage> {
        let path = match self.resolver.resolve(locator) {
            Ok(path) => path,
            Err(e) => {
                log::debug!("[Thumbnail] Cannot resolve {}: {}", locator, e);
                return None;
            }
        };

        let image = match image::open(&path) {
            Ok(image) => image,
            Err(e) => {
                log::debug!("[Thumbnail] Cannot decode {}: {}", path.display(), e);
                return None;
            }
        };

        if image.width() <= max_w && image.height() <= max_h {
            return Some(image);
        }
        Some(image.thumbnail(max_w.max(1), max_h.max(1)))
    }
}
