//! Collaborator seams: the document and the asynchronous thumbnail generator

use crate::entry::{PageSize, Thumbnail, ThumbnailSize};
use crate::viewport::GenerationPriority;

/// Page metadata provider for the open document
pub trait PageSource: Send + Sync {
    /// Number of pages in the document
    fn page_count(&self) -> usize;

    /// Intrinsic size of a page, `None` if the page cannot be inspected
    fn page_size(&self, page_index: usize) -> Option<PageSize>;
}

/// Parameters of a single thumbnail render
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub page_index: usize,
    pub size: ThumbnailSize,
    pub quality: f64,
    pub priority: GenerationPriority,
}

/// Result of a render reported back to the cache owner
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Completed {
        page_index: usize,
        thumbnail: Thumbnail,
    },
    Failed {
        page_index: usize,
        message: String,
    },
}

impl GenerationOutcome {
    pub fn page_index(&self) -> usize {
        match self {
            GenerationOutcome::Completed { page_index, .. }
            | GenerationOutcome::Failed { page_index, .. } => *page_index,
        }
    }
}

/// Asynchronous renderer of page thumbnails
///
/// `generate` must not block on the render itself. The result is delivered
/// later through [`crate::ThumbnailCache::handle_outcome`] (or the
/// `on_generation_*` callbacks) on whichever thread owns the cache.
pub trait ThumbnailGenerator: Send + Sync {
    fn generate(&self, request: GenerationRequest);
}
