//! Per-page cache records
//!
//! A [`ThumbnailEntry`] exists for every page the cache has been asked about.
//! The pixel buffer is optional: an entry without one is either still loading,
//! failed, or had its buffer dropped by a render-parameter change.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Bytes per pixel of a rendered thumbnail (RGBA)
pub const BYTES_PER_PIXEL: u64 = 4;

/// Width and height of a thumbnail or page, in pixels or points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThumbnailSize {
    pub width: u32,
    pub height: u32,
}

impl ThumbnailSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when either dimension is zero
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Intrinsic page size as reported by the document, in points
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// A rendered thumbnail bitmap
///
/// Pixel data is shared, so handing a thumbnail out of the cache is a
/// reference-count bump rather than a copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Raw pixel data (RGBA)
    pub pixels: Arc<[u8]>,
}

impl Thumbnail {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels: pixels.into(),
        }
    }

    /// Create a thumbnail filled with a single RGBA colour
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixel_count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(pixel_count * BYTES_PER_PIXEL as usize);
        for _ in 0..pixel_count {
            pixels.extend_from_slice(&rgba);
        }
        Self::new(width, height, pixels)
    }

    /// Memory charged to the cache for this bitmap: width × height × 4
    pub fn memory_bytes(&self) -> u64 {
        self.width as u64 * self.height as u64 * BYTES_PER_PIXEL
    }

    pub fn size(&self) -> ThumbnailSize {
        ThumbnailSize::new(self.width, self.height)
    }
}

/// Cached state for one page
#[derive(Debug, Clone)]
pub struct ThumbnailEntry {
    /// Rendered bitmap, `None` until generated or after invalidation
    pub thumbnail: Option<Thumbnail>,

    /// Intrinsic page size, filled from the document when known
    pub page_size: Option<PageSize>,

    /// A generation request is in flight
    pub is_loading: bool,

    /// The last generation attempt failed
    pub has_error: bool,

    /// Failure message of the last attempt (empty when `has_error` is false)
    pub error_message: String,

    /// Logical access clock value of the most recent touch
    pub last_accessed: u64,

    /// Memory accounted for `thumbnail` (0 when absent)
    pub memory_bytes: u64,

    /// When the in-flight generation was requested
    pub loading_since: Option<Instant>,
}

impl ThumbnailEntry {
    pub(crate) fn new(last_accessed: u64) -> Self {
        Self {
            thumbnail: None,
            page_size: None,
            is_loading: false,
            has_error: false,
            error_message: String::new(),
            last_accessed,
            memory_bytes: 0,
            loading_since: None,
        }
    }

    /// True when a bitmap is resident
    pub fn is_ready(&self) -> bool {
        self.thumbnail.is_some()
    }

    pub(crate) fn mark_loading(&mut self, now: Instant) {
        self.is_loading = true;
        self.loading_since = Some(now);
        self.clear_error();
    }

    pub(crate) fn clear_error(&mut self) {
        self.has_error = false;
        self.error_message.clear();
    }

    /// Install a bitmap, returning the memory of the one it replaced
    pub(crate) fn install(&mut self, thumbnail: Thumbnail) -> u64 {
        let previous = self.memory_bytes;
        self.memory_bytes = thumbnail.memory_bytes();
        self.thumbnail = Some(thumbnail);
        self.is_loading = false;
        self.loading_since = None;
        self.clear_error();
        previous
    }

    pub(crate) fn fail(&mut self, message: String) {
        self.is_loading = false;
        self.loading_since = None;
        self.has_error = true;
        self.error_message = message;
    }

    /// Drop the bitmap but keep the metadata, returning the freed memory
    pub(crate) fn release(&mut self) -> u64 {
        let freed = self.memory_bytes;
        self.thumbnail = None;
        self.memory_bytes = 0;
        self.is_loading = false;
        self.loading_since = None;
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_bytes_is_rgba() {
        let thumb = Thumbnail::solid(120, 160, [255, 255, 255, 255]);
        assert_eq!(thumb.memory_bytes(), 120 * 160 * 4);
        assert_eq!(thumb.pixels.len(), 120 * 160 * 4);
    }

    #[test]
    fn test_install_replaces_and_reports_previous() {
        let mut entry = ThumbnailEntry::new(1);
        entry.mark_loading(Instant::now());
        assert!(entry.is_loading);

        assert_eq!(entry.install(Thumbnail::solid(10, 10, [0; 4])), 0);
        assert!(!entry.is_loading);
        assert_eq!(entry.memory_bytes, 400);

        assert_eq!(entry.install(Thumbnail::solid(20, 10, [0; 4])), 400);
        assert_eq!(entry.memory_bytes, 800);
    }

    #[test]
    fn test_fail_and_retry_never_both_loading_and_error() {
        let mut entry = ThumbnailEntry::new(1);
        entry.mark_loading(Instant::now());
        entry.fail("boom".to_string());
        assert!(entry.has_error && !entry.is_loading);
        assert_eq!(entry.error_message, "boom");

        entry.mark_loading(Instant::now());
        assert!(entry.is_loading && !entry.has_error);
        assert!(entry.error_message.is_empty());
    }

    #[test]
    fn test_release_keeps_metadata() {
        let mut entry = ThumbnailEntry::new(7);
        entry.install(Thumbnail::solid(4, 4, [1; 4]));
        entry.page_size = Some(PageSize::new(612.0, 792.0));

        assert_eq!(entry.release(), 64);
        assert!(entry.thumbnail.is_none());
        assert_eq!(entry.memory_bytes, 0);
        assert_eq!(entry.last_accessed, 7);
        assert_eq!(entry.page_size, Some(PageSize::new(612.0, 792.0)));
    }

    #[test]
    fn test_thumbnail_size_empty() {
        assert!(ThumbnailSize::new(0, 10).is_empty());
        assert!(!ThumbnailSize::new(1, 1).is_empty());
    }
}
