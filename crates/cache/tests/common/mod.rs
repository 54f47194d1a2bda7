//! Test doubles shared by the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use thumbnail_cache::{
    CacheConfig, GenerationRequest, PageSize, PageSource, Thumbnail, ThumbnailCache,
    ThumbnailGenerator,
};

/// Document with a fixed number of US Letter pages
pub struct FixedDocument(pub usize);

impl PageSource for FixedDocument {
    fn page_count(&self) -> usize {
        self.0
    }

    fn page_size(&self, _page_index: usize) -> Option<PageSize> {
        Some(PageSize::new(612.0, 792.0))
    }
}

/// Generator that records requests instead of rendering
#[derive(Default)]
pub struct RecordingGenerator {
    requests: Mutex<Vec<GenerationRequest>>,
}

impl RecordingGenerator {
    pub fn count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn pages(&self) -> Vec<usize> {
        self.requests.lock().iter().map(|r| r.page_index).collect()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }

    /// Remove and return the request at `index`, if any
    pub fn take(&self, index: usize) -> Option<GenerationRequest> {
        let mut requests = self.requests.lock();
        (index < requests.len()).then(|| requests.remove(index))
    }
}

impl ThumbnailGenerator for RecordingGenerator {
    fn generate(&self, request: GenerationRequest) {
        self.requests.lock().push(request);
    }
}

pub fn setup(config: CacheConfig, pages: usize) -> (ThumbnailCache, Arc<RecordingGenerator>) {
    let generator = Arc::new(RecordingGenerator::default());
    let cache = ThumbnailCache::new(config, generator.clone());
    cache.set_document(Some(Arc::new(FixedDocument(pages))));
    (cache, generator)
}

/// Default-sized 120x160 thumbnail (76,800 bytes)
pub fn thumb() -> Thumbnail {
    Thumbnail::solid(120, 160, [255, 255, 255, 255])
}

/// Square thumbnail, `side * side * 4` bytes
pub fn square(side: u32) -> Thumbnail {
    Thumbnail::solid(side, side, [0, 0, 0, 255])
}

/// Recompute memory from entry snapshots and compare with the aggregate
pub fn assert_invariants(cache: &ThumbnailCache) {
    let pages = cache.cached_pages();
    let mut resident_bytes = 0;
    for page in &pages {
        let entry = cache.entry(*page).expect("listed page has an entry");
        assert!(
            !(entry.is_loading && entry.has_error),
            "page {page} is both loading and failed"
        );
        match &entry.thumbnail {
            Some(thumbnail) => {
                assert_eq!(entry.memory_bytes, thumbnail.memory_bytes());
                resident_bytes += entry.memory_bytes;
            }
            None => assert_eq!(entry.memory_bytes, 0),
        }
    }

    assert_eq!(cache.memory_usage(), resident_bytes, "memory accounting drifted");
    assert!(
        pages.len() <= cache.max_entries(),
        "{} entries exceed budget of {}",
        pages.len(),
        cache.max_entries()
    );
    assert!(
        cache.memory_usage() <= cache.max_memory_bytes() || pages.len() <= 1,
        "memory {} exceeds budget {} with {} entries",
        cache.memory_usage(),
        cache.max_memory_bytes(),
        pages.len()
    );
}
