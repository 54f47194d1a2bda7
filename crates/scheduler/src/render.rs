//! Background thumbnail generation.
//!
//! [`RenderPool`] plugs into the cache as its [`ThumbnailGenerator`]: every
//! request lands in a [`JobQueue`] and is rendered by a [`WorkerPool`]
//! through a caller-supplied [`PageRenderer`].

use std::io;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;
use thumbnail_cache::{GenerationOutcome, GenerationRequest, Thumbnail, ThumbnailGenerator};

use crate::{JobQueue, WorkerPool, WorkerPoolConfig};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("page {0} not found")]
    PageNotFound(usize),
    #[error("invalid thumbnail size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    #[error("render failed: {0}")]
    Failed(String),
}

/// Turns a generation request into pixels.
///
/// Called from worker threads, possibly for several pages at once.
pub trait PageRenderer: Send + Sync {
    fn render(&self, request: &GenerationRequest) -> Result<Thumbnail, RenderError>;
}

impl<F> PageRenderer for F
where
    F: Fn(&GenerationRequest) -> Result<Thumbnail, RenderError> + Send + Sync,
{
    fn render(&self, request: &GenerationRequest) -> Result<Thumbnail, RenderError> {
        self(request)
    }
}

/// Queue plus workers, usable as the cache's generator
///
/// ```no_run
/// use std::sync::Arc;
/// use thumbnail_cache::{CacheConfig, GenerationRequest, Thumbnail, ThumbnailCache};
/// use thumbnail_scheduler::{RenderError, RenderPool, WorkerPoolConfig};
///
/// let renderer = |request: &GenerationRequest| -> Result<Thumbnail, RenderError> {
///     Ok(Thumbnail::solid(request.size.width, request.size.height, [255; 4]))
/// };
/// let (pool, outcomes) = RenderPool::start(Arc::new(renderer), WorkerPoolConfig::new(2))?;
/// let pool = Arc::new(pool);
/// let cache = ThumbnailCache::new(CacheConfig::default(), pool.clone());
///
/// cache.request_generation(0);
/// // ... later, on the owning thread
/// cache.drain_outcomes(&outcomes);
/// pool.shutdown();
/// # Ok::<(), std::io::Error>(())
/// ```
pub struct RenderPool {
    queue: Arc<JobQueue>,
    workers: Mutex<Option<WorkerPool>>,
}

impl RenderPool {
    /// Start the workers and hand back the channel their outcomes arrive on
    pub fn start(
        renderer: Arc<dyn PageRenderer>,
        config: WorkerPoolConfig,
    ) -> io::Result<(Self, Receiver<GenerationOutcome>)> {
        let queue = Arc::new(JobQueue::new());
        let (tx, rx) = mpsc::channel();
        let workers = WorkerPool::new(queue.clone(), renderer, tx, config)?;

        let pool = Self {
            queue,
            workers: Mutex::new(Some(workers)),
        };
        Ok((pool, rx))
    }

    /// Number of renders waiting for a worker
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_running(&self) -> bool {
        self.workers.lock().is_some()
    }

    /// Stop accepting work and join the workers
    ///
    /// Queued jobs that have not started are discarded.
    pub fn shutdown(&self) {
        self.queue.clear();
        if let Some(workers) = self.workers.lock().take() {
            workers.shutdown();
        }
    }
}

impl ThumbnailGenerator for RenderPool {
    fn generate(&self, request: GenerationRequest) {
        if !self.is_running() {
            return;
        }
        trace!(
            "queueing page {} at priority {:?}",
            request.page_index,
            request.priority
        );
        self.queue.push(request);
    }
}
