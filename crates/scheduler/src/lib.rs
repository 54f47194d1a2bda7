//! Thumbnail Scheduler Library
//!
//! Background execution for the thumbnail cache.
//!
//! Renders are queued by priority (visible pages, margin pages, background
//! preloads) and executed by a pool of worker threads, with FIFO ordering
//! within each priority level. Results travel back to the cache owner over
//! a channel, and a maintenance timer drives preloading and cleanup.
//!
//! # Example
//!
//! ```
//! use thumbnail_cache::{GenerationPriority, GenerationRequest, ThumbnailSize};
//! use thumbnail_scheduler::JobQueue;
//!
//! let queue = JobQueue::new();
//! let request = |page_index, priority| GenerationRequest {
//!     page_index,
//!     size: ThumbnailSize::new(120, 160),
//!     quality: 1.0,
//!     priority,
//! };
//!
//! queue.push(request(12, GenerationPriority::Background));
//! queue.push(request(3, GenerationPriority::Visible));
//!
//! // Visible pages are rendered first
//! assert_eq!(queue.pop().map(|job| job.page_index()), Some(3));
//! ```

mod maintenance;
mod priority;
mod render;
mod worker;

pub use maintenance::MaintenanceTimer;
pub use priority::{GenerationJob, JobId, JobQueue};
pub use render::{PageRenderer, RenderError, RenderPool};
pub use worker::{WorkerPool, WorkerPoolConfig};
