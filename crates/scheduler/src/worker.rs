//! Render worker pool for parallel thumbnail generation.
//!
//! Workers run on separate threads, pull jobs from the shared [`JobQueue`],
//! render them and report each result as a [`GenerationOutcome`] on a
//! channel owned by whoever drives the cache.

use std::io;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::Sender,
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};
use thumbnail_cache::GenerationOutcome;

use crate::render::PageRenderer;
use crate::JobQueue;

/// Configuration for the render worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads to spawn.
    /// Default: number of logical CPU cores.
    pub num_workers: usize,

    /// Maximum time a worker will wait for a job before checking shutdown.
    /// Default: 10ms.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::new(num_cpus())
    }
}

impl WorkerPoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
            poll_interval: Duration::from_millis(10),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Pool of threads executing queued renders.
///
/// Every job popped from the queue produces exactly one outcome. Renderer
/// errors become [`GenerationOutcome::Failed`] with the error's message.
pub struct WorkerPool {
    workers: Vec<Worker>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawn the worker threads.
    ///
    /// Fails only if the OS refuses to create a thread; workers already
    /// started are stopped before the error is returned.
    pub fn new(
        queue: Arc<JobQueue>,
        renderer: Arc<dyn PageRenderer>,
        outcomes: Sender<GenerationOutcome>,
        config: WorkerPoolConfig,
    ) -> io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut pool = Self {
            workers: Vec::with_capacity(config.num_workers),
            shutdown: shutdown.clone(),
        };

        for id in 0..config.num_workers {
            let worker = Worker::spawn(
                id,
                queue.clone(),
                renderer.clone(),
                outcomes.clone(),
                shutdown.clone(),
                config.poll_interval,
            );
            match worker {
                Ok(worker) => pool.workers.push(worker),
                Err(err) => {
                    pool.stop();
                    return Err(err);
                }
            }
        }

        debug!("started {} render workers", pool.workers.len());
        Ok(pool)
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Signal all workers to stop and wait for them to finish their
    /// current render.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for worker in self.workers.drain(..) {
            worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(
        id: usize,
        queue: Arc<JobQueue>,
        renderer: Arc<dyn PageRenderer>,
        outcomes: Sender<GenerationOutcome>,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> io::Result<Self> {
        let thread = thread::Builder::new()
            .name(format!("thumbnail-worker-{}", id))
            .spawn(move || Self::run(queue, renderer, outcomes, shutdown, poll_interval))?;

        Ok(Self {
            thread: Some(thread),
        })
    }

    fn run(
        queue: Arc<JobQueue>,
        renderer: Arc<dyn PageRenderer>,
        outcomes: Sender<GenerationOutcome>,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) {
        while !shutdown.load(Ordering::Acquire) {
            let Some(job) = queue.pop() else {
                thread::sleep(poll_interval);
                continue;
            };

            let page_index = job.page_index();
            let outcome = match renderer.render(&job.request) {
                Ok(thumbnail) => GenerationOutcome::Completed {
                    page_index,
                    thumbnail,
                },
                Err(err) => {
                    debug!("render of page {} failed: {}", page_index, err);
                    GenerationOutcome::Failed {
                        page_index,
                        message: err.to_string(),
                    }
                }
            };

            if outcomes.send(outcome).is_err() {
                // Nobody is listening any more
                break;
            }
        }
    }

    fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("render worker panicked");
            }
        }
    }
}

/// Number of logical CPU cores, used as the default worker count.
fn num_cpus() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RenderError;
    use std::sync::mpsc;
    use thumbnail_cache::{GenerationPriority, GenerationRequest, Thumbnail, ThumbnailSize};

    struct SolidRenderer;

    impl PageRenderer for SolidRenderer {
        fn render(&self, request: &GenerationRequest) -> Result<Thumbnail, RenderError> {
            if request.page_index == 13 {
                return Err(RenderError::Failed("unlucky page".to_string()));
            }
            Ok(Thumbnail::solid(
                request.size.width,
                request.size.height,
                [255, 255, 255, 255],
            ))
        }
    }

    fn request(page_index: usize) -> GenerationRequest {
        GenerationRequest {
            page_index,
            size: ThumbnailSize::new(4, 4),
            quality: 1.0,
            priority: GenerationPriority::Visible,
        }
    }

    #[test]
    fn test_worker_pool_config() {
        let config = WorkerPoolConfig::default();
        assert!(config.num_workers > 0);
        assert_eq!(config.poll_interval, Duration::from_millis(10));

        let config = WorkerPoolConfig::new(0).with_poll_interval(Duration::from_millis(50));
        assert_eq!(config.num_workers, 1);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_worker_pool_reports_every_job() {
        let queue = Arc::new(JobQueue::new());
        let (tx, rx) = mpsc::channel();
        let pool = WorkerPool::new(
            queue.clone(),
            Arc::new(SolidRenderer),
            tx,
            WorkerPoolConfig::new(2),
        )
        .unwrap();
        assert_eq!(pool.num_workers(), 2);

        queue.push(request(1));
        queue.push(request(13));

        let mut outcomes: Vec<_> = (0..2)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        outcomes.sort_by_key(|outcome| outcome.page_index());

        assert!(matches!(
            &outcomes[0],
            GenerationOutcome::Completed { page_index: 1, thumbnail } if thumbnail.width == 4
        ));
        assert_eq!(
            outcomes[1],
            GenerationOutcome::Failed {
                page_index: 13,
                message: "render failed: unlucky page".to_string(),
            }
        );

        assert!(!pool.is_shutting_down());
        pool.shutdown();
    }
}
