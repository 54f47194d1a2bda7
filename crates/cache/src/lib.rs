//! PDF Thumbnail Cache Library
//!
//! Bounded page-thumbnail cache with adaptive LRU/LFU eviction and
//! viewport-aware generation priorities.
//!
//! The cache never renders anything itself. Misses are forwarded to a
//! [`ThumbnailGenerator`], whose results are fed back with
//! [`ThumbnailCache::handle_outcome`]. State changes are announced to
//! listeners as [`CacheEvent`]s.

pub mod cache;
pub mod config;
pub mod entry;
pub mod events;
pub mod eviction;
pub mod generator;
pub mod stats;
pub mod viewport;

pub use cache::{ThumbnailCache, TIMEOUT_MESSAGE};
pub use config::{CacheConfig, ConfigError, MIN_MEMORY_LIMIT};
pub use entry::{PageSize, Thumbnail, ThumbnailEntry, ThumbnailSize, BYTES_PER_PIXEL};
pub use events::{CacheEvent, EventBus, ListenerId};
pub use eviction::{EvictionPolicy, FrequencyTable};
pub use generator::{GenerationOutcome, GenerationRequest, PageSource, ThumbnailGenerator};
pub use stats::CacheStats;
pub use viewport::{GenerationPriority, PriorityTable, ViewportWindow};
