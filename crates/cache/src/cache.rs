//! Page thumbnail cache with adaptive eviction
//!
//! Maps page indices to rendered thumbnails, bounded by both an entry count
//! and a memory budget. Missing thumbnails are requested from an asynchronous
//! [`ThumbnailGenerator`] at most once per page; results come back through
//! [`ThumbnailCache::handle_outcome`].

use std::collections::{BTreeSet, HashMap};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::config::{CacheConfig, MIN_MEMORY_LIMIT};
use crate::entry::{PageSize, Thumbnail, ThumbnailEntry, ThumbnailSize};
use crate::events::{CacheEvent, EventBus, ListenerId};
use crate::eviction::{self, EvictionPolicy, FrequencyTable};
use crate::generator::{GenerationOutcome, GenerationRequest, PageSource, ThumbnailGenerator};
use crate::stats::CacheStats;
use crate::viewport::{GenerationPriority, PriorityTable, ViewportWindow};

/// Error message stored on entries whose generation exceeded the deadline
pub const TIMEOUT_MESSAGE: &str = "generation timed out";

/// Quality changes smaller than this do not invalidate rendered thumbnails
const QUALITY_EPSILON: f64 = 0.001;

/// Internal cache state, guarded by a single lock
struct CacheState {
    document: Option<Arc<dyn PageSource>>,

    /// Map from page index to entry
    entries: HashMap<usize, ThumbnailEntry>,

    /// Access counts, outliving entries evicted under LRU
    frequencies: FrequencyTable,

    priorities: PriorityTable,
    viewport: Option<ViewportWindow>,

    /// Pages waiting for a preload tick, lowest index first
    preload_queue: BTreeSet<usize>,

    /// Sum of `memory_bytes` over resident entries
    memory_used: u64,
    max_entries: usize,
    max_memory_bytes: u64,

    thumbnail_size: ThumbnailSize,
    quality: f64,
    lazy_loading: bool,
    adaptive_caching: bool,
    preload_range: usize,
    generation_timeout: Option<Duration>,

    hits: u64,
    misses: u64,
    evictions: u64,
    generation_requests: u64,

    /// Logical clock; every touch gets a strictly larger value
    access_clock: u64,
}

impl CacheState {
    fn new(config: &CacheConfig) -> Self {
        Self {
            document: None,
            entries: HashMap::new(),
            frequencies: FrequencyTable::new(),
            priorities: PriorityTable::new(),
            viewport: None,
            preload_queue: BTreeSet::new(),
            memory_used: 0,
            max_entries: config.max_entries.max(1),
            max_memory_bytes: config.max_memory_bytes.max(MIN_MEMORY_LIMIT),
            thumbnail_size: config.thumbnail_size,
            quality: config.quality,
            lazy_loading: config.lazy_loading,
            adaptive_caching: config.adaptive_caching,
            preload_range: config.preload_range,
            generation_timeout: config.generation_timeout,
            hits: 0,
            misses: 0,
            evictions: 0,
            generation_requests: 0,
            access_clock: 0,
        }
    }

    fn page_count(&self) -> usize {
        self.document.as_ref().map_or(0, |doc| doc.page_count())
    }

    fn is_valid_page(&self, page_index: usize) -> bool {
        page_index < self.page_count()
    }

    fn tick(&mut self) -> u64 {
        self.access_clock += 1;
        self.access_clock
    }

    fn efficiency(&self) -> f64 {
        eviction::efficiency(self.hits, self.misses)
    }

    /// Refresh recency and bump the access count of an existing entry
    fn touch(&mut self, page_index: usize) {
        let now = self.tick();
        let Some(entry) = self.entries.get_mut(&page_index) else {
            return;
        };
        entry.last_accessed = now;

        self.frequencies.record(page_index);
        let limit = self.max_entries.saturating_mul(2);
        let entries = &self.entries;
        self.frequencies
            .enforce_limit(limit, |page| entries.contains_key(&page));
    }

    /// False when lazy loading holds back pages outside the viewport window
    fn should_generate(&self, page_index: usize) -> bool {
        if !self.lazy_loading {
            return true;
        }
        self.viewport
            .map_or(true, |window| window.contains(page_index))
    }

    /// Whether a preload pass should queue this page
    fn should_preload(&self, page_index: usize) -> bool {
        if !self.is_valid_page(page_index) {
            return false;
        }
        match self.entries.get(&page_index) {
            Some(entry) => !entry.is_ready() && !entry.is_loading && !entry.has_error,
            None => true,
        }
    }

    /// Evict one entry with the policy matching the current hit rate
    fn evict_one(&mut self, protected: Option<usize>) -> Option<usize> {
        let efficiency = self.efficiency();
        let policy = EvictionPolicy::for_efficiency(efficiency, self.adaptive_caching);
        let victim =
            eviction::select_victim(&self.entries, &self.frequencies, policy, protected)?;

        let entry = self.entries.remove(&victim)?;
        self.memory_used = self.memory_used.saturating_sub(entry.memory_bytes);
        self.preload_queue.remove(&victim);
        if policy == EvictionPolicy::LeastFrequentlyUsed {
            self.frequencies.remove(victim);
        }
        self.evictions += 1;

        debug!(
            "thumbnail cache: evicted page {} ({:?}, efficiency {:.2}, {} entries, {} bytes)",
            victim,
            policy,
            efficiency,
            self.entries.len(),
            self.memory_used
        );
        Some(victim)
    }

    /// Evict until both budgets hold; memory eviction stops at one entry
    fn evict_to_fit(&mut self, protected: Option<usize>) -> usize {
        let mut evicted = 0;

        while self.entries.len() > self.max_entries {
            if self.evict_one(protected).is_none() {
                break;
            }
            evicted += 1;
        }

        while self.memory_used > self.max_memory_bytes && self.entries.len() > 1 {
            if self.evict_one(protected).is_none() {
                break;
            }
            evicted += 1;
        }

        evicted
    }

    /// Mark a page loading and build its generator request
    ///
    /// Returns `None` when nothing needs to be generated: invalid page,
    /// thumbnail already resident, or a request already in flight.
    fn begin_generation(&mut self, page_index: usize) -> Option<GenerationRequest> {
        if !self.is_valid_page(page_index) {
            return None;
        }

        let existing = self
            .entries
            .get(&page_index)
            .map(|entry| (entry.is_ready(), entry.is_loading, entry.has_error));

        match existing {
            Some((true, _, _)) => {
                debug!("thumbnail cache: page {} already cached", page_index);
                self.touch(page_index);
                return None;
            }
            Some((_, true, _)) => {
                debug!("thumbnail cache: page {} already loading", page_index);
                return None;
            }
            Some((_, _, has_error)) => {
                if has_error {
                    debug!("thumbnail cache: retrying page {} after error", page_index);
                }
            }
            None => {
                while self.entries.len() >= self.max_entries {
                    if self.evict_one(None).is_none() {
                        break;
                    }
                }
            }
        }

        let now = self.tick();
        let page_size = self
            .document
            .as_ref()
            .and_then(|doc| doc.page_size(page_index));

        let entry = self
            .entries
            .entry(page_index)
            .or_insert_with(|| ThumbnailEntry::new(now));
        entry.mark_loading(Instant::now());
        entry.last_accessed = now;
        if entry.page_size.is_none() {
            entry.page_size = page_size;
        }

        self.preload_queue.remove(&page_index);
        self.generation_requests += 1;

        let request = GenerationRequest {
            page_index,
            size: self.thumbnail_size,
            quality: self.quality,
            priority: self.priorities.priority(page_index),
        };
        debug!(
            "thumbnail cache: requesting page {} at priority {}",
            page_index,
            request.priority.value()
        );
        Some(request)
    }

    /// Drop every resident bitmap, keeping entry metadata
    fn release_buffers(&mut self) {
        for entry in self.entries.values_mut() {
            if entry.is_ready() {
                let freed = entry.release();
                self.memory_used = self.memory_used.saturating_sub(freed);
            }
        }
    }

    /// Fail generations that have been in flight longer than the deadline
    fn expire_stalled(&mut self, now: Instant) -> Vec<usize> {
        let Some(timeout) = self.generation_timeout else {
            return Vec::new();
        };

        let mut expired = Vec::new();
        for (page, entry) in self.entries.iter_mut() {
            let stalled = entry.is_loading
                && entry
                    .loading_since
                    .is_some_and(|since| now.saturating_duration_since(since) >= timeout);
            if stalled {
                entry.fail(TIMEOUT_MESSAGE.to_string());
                expired.push(*page);
            }
        }
        expired.sort_unstable();
        expired
    }

    fn recompute_priorities(&mut self) {
        let page_count = self.page_count();
        match self.viewport {
            Some(window) => self.priorities.recompute(&window, page_count),
            None => self.priorities.clear(),
        }
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.len(),
            resident_count: self.entries.values().filter(|e| e.is_ready()).count(),
            loading_count: self.entries.values().filter(|e| e.is_loading).count(),
            memory_used: self.memory_used,
            memory_limit: self.max_memory_bytes,
            entry_limit: self.max_entries,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            generation_requests: self.generation_requests,
        }
    }
}

/// Thumbnail cache with adaptive LRU/LFU eviction
///
/// Thread-safe: every operation takes one short-lived lock around the entry
/// map. The generator is called and events are emitted after the lock has
/// been released, so listeners may call back into the cache.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use thumbnail_cache::{
///     CacheConfig, GenerationRequest, PageSize, PageSource, Thumbnail,
///     ThumbnailCache, ThumbnailGenerator,
/// };
///
/// struct Letter;
/// impl PageSource for Letter {
///     fn page_count(&self) -> usize { 10 }
///     fn page_size(&self, _: usize) -> Option<PageSize> { Some(PageSize::new(612.0, 792.0)) }
/// }
///
/// struct Discard;
/// impl ThumbnailGenerator for Discard {
///     fn generate(&self, _request: GenerationRequest) {}
/// }
///
/// let cache = ThumbnailCache::new(CacheConfig::default(), Arc::new(Discard));
/// cache.set_document(Some(Arc::new(Letter)));
///
/// // First access misses and issues a generation request
/// assert!(cache.get(0).is_none());
/// assert!(cache.is_loading(0));
///
/// // The renderer reports back later
/// cache.on_generation_complete(0, Thumbnail::solid(120, 160, [255; 4]));
/// assert!(cache.get(0).is_some());
/// ```
pub struct ThumbnailCache {
    state: Mutex<CacheState>,
    generator: Arc<dyn ThumbnailGenerator>,
    events: EventBus,
}

impl ThumbnailCache {
    /// Create an empty cache that forwards requests to `generator`
    pub fn new(config: CacheConfig, generator: Arc<dyn ThumbnailGenerator>) -> Self {
        Self {
            state: Mutex::new(CacheState::new(&config)),
            generator,
            events: EventBus::new(),
        }
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    /// Register a closure called for every [`CacheEvent`]
    pub fn subscribe<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(callback)
    }

    /// Register a channel listener
    pub fn subscribe_channel(&self) -> (ListenerId, Receiver<CacheEvent>) {
        self.events.subscribe_channel()
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.events.unsubscribe(id)
    }

    // ------------------------------------------------------------------
    // Document
    // ------------------------------------------------------------------

    /// Install a new document (or none) and drop everything cached
    pub fn set_document(&self, document: Option<Arc<dyn PageSource>>) {
        {
            let mut state = self.state.lock();
            info!(
                "thumbnail cache: document changed ({} pages)",
                document.as_ref().map_or(0, |doc| doc.page_count())
            );
            state.document = document;
            state.recompute_priorities();
        }
        self.clear();
    }

    pub fn page_count(&self) -> usize {
        self.state.lock().page_count()
    }

    // ------------------------------------------------------------------
    // Lookup and generation
    // ------------------------------------------------------------------

    /// Get the thumbnail for a page
    ///
    /// Returns the resident thumbnail and records a hit. On a miss the page is
    /// requested from the generator unless lazy loading holds it back, and
    /// `None` is returned without waiting. Invalid pages return `None` without
    /// touching the counters.
    pub fn get(&self, page_index: usize) -> Option<Thumbnail> {
        let request = {
            let mut state = self.state.lock();
            if !state.is_valid_page(page_index) {
                return None;
            }

            if state.entries.contains_key(&page_index) {
                state.touch(page_index);
            }

            let cached = state
                .entries
                .get(&page_index)
                .and_then(|entry| entry.thumbnail.clone());
            if let Some(thumbnail) = cached {
                state.hits += 1;
                return Some(thumbnail);
            }

            state.misses += 1;
            if !state.should_generate(page_index) {
                debug!(
                    "thumbnail cache: page {} outside viewport, not generating",
                    page_index
                );
                return None;
            }

            let memory_before = state.memory_used;
            let request = state.begin_generation(page_index);
            (request, memory_changed(memory_before, state.memory_used))
        };

        self.dispatch(request);
        None
    }

    /// Ask the generator for a page unless it is resident or already loading
    ///
    /// An entry in the error state is cleared and retried. Explicit requests
    /// are not subject to lazy loading.
    pub fn request_generation(&self, page_index: usize) {
        let request = {
            let mut state = self.state.lock();
            let memory_before = state.memory_used;
            let request = state.begin_generation(page_index);
            (request, memory_changed(memory_before, state.memory_used))
        };
        self.dispatch(request);
    }

    /// Request every page in `[start, end]` that is neither resident nor loading
    pub fn request_range(&self, start: usize, end: usize) {
        let pages: Vec<usize> = {
            let state = self.state.lock();
            let page_count = state.page_count();
            if page_count == 0 || start >= page_count {
                return;
            }
            let end = end.min(page_count - 1);
            (start..=end)
                .filter(|page| {
                    state
                        .entries
                        .get(page)
                        .map_or(true, |entry| !entry.is_ready() && !entry.is_loading)
                })
                .collect()
        };

        if !pages.is_empty() {
            debug!(
                "thumbnail cache: requesting {} pages in {}..={}",
                pages.len(),
                start,
                end
            );
        }
        for page in pages {
            self.request_generation(page);
        }
    }

    /// Record a finished render
    ///
    /// A completion for a page that is no longer cached (evicted or cleared
    /// while the render was running) is discarded without any event.
    pub fn on_generation_complete(&self, page_index: usize, thumbnail: Thumbnail) {
        let events = {
            let mut state = self.state.lock();
            if !state.entries.contains_key(&page_index) {
                debug!(
                    "thumbnail cache: discarding stale completion for page {}",
                    page_index
                );
                return;
            }

            let now = state.tick();
            let added = thumbnail.memory_bytes();
            let Some(entry) = state.entries.get_mut(&page_index) else {
                return;
            };
            let replaced = entry.install(thumbnail);
            entry.last_accessed = now;

            state.memory_used = state.memory_used.saturating_sub(replaced) + added;
            state.evict_to_fit(Some(page_index));

            debug!(
                "thumbnail cache: page {} ready ({} bytes, {}/{} entries, {} bytes total)",
                page_index,
                added,
                state.entries.len(),
                state.max_entries,
                state.memory_used
            );

            vec![
                CacheEvent::Ready(page_index),
                CacheEvent::LoadingChanged {
                    page_index,
                    loading: false,
                },
                CacheEvent::MemoryChanged(state.memory_used),
            ]
        };

        self.events.emit_all(events);
    }

    /// Record a failed render; the next `get` or request retries it
    pub fn on_generation_failed(&self, page_index: usize, message: impl Into<String>) {
        let message = message.into();
        {
            let mut state = self.state.lock();
            if !state.entries.contains_key(&page_index) {
                debug!(
                    "thumbnail cache: discarding stale failure for page {}",
                    page_index
                );
                return;
            }

            let now = state.tick();
            if let Some(entry) = state.entries.get_mut(&page_index) {
                entry.fail(message.clone());
                entry.last_accessed = now;
            }
        }

        warn!(
            "thumbnail cache: generation failed for page {}: {}",
            page_index, message
        );
        self.events.emit_all(vec![
            CacheEvent::Error {
                page_index,
                message,
            },
            CacheEvent::LoadingChanged {
                page_index,
                loading: false,
            },
        ]);
    }

    /// Apply a result delivered by an asynchronous generator
    pub fn handle_outcome(&self, outcome: GenerationOutcome) {
        match outcome {
            GenerationOutcome::Completed {
                page_index,
                thumbnail,
            } => self.on_generation_complete(page_index, thumbnail),
            GenerationOutcome::Failed {
                page_index,
                message,
            } => self.on_generation_failed(page_index, message),
        }
    }

    /// Apply every outcome waiting on `outcomes` without blocking
    ///
    /// Returns the number of outcomes applied.
    pub fn drain_outcomes(&self, outcomes: &Receiver<GenerationOutcome>) -> usize {
        let mut applied = 0;
        for outcome in outcomes.try_iter() {
            self.handle_outcome(outcome);
            applied += 1;
        }
        applied
    }

    // ------------------------------------------------------------------
    // Budgets and render parameters
    // ------------------------------------------------------------------

    /// Update both budgets and evict down to them immediately
    ///
    /// `max_entries` is raised to at least 1 and the memory budget to at
    /// least [`MIN_MEMORY_LIMIT`].
    pub fn set_budget(&self, max_entries: usize, max_memory_bytes: u64) {
        let memory = {
            let mut state = self.state.lock();
            state.max_entries = max_entries.max(1);
            state.max_memory_bytes = max_memory_bytes.max(MIN_MEMORY_LIMIT);

            let evicted = state.evict_to_fit(None);
            info!(
                "thumbnail cache: budget set to {} entries / {} bytes ({} evicted)",
                state.max_entries, state.max_memory_bytes, evicted
            );
            state.memory_used
        };

        self.events.emit_all(vec![
            CacheEvent::MemoryChanged(memory),
            CacheEvent::CacheUpdated,
        ]);
    }

    /// Drop every rendered bitmap but keep entry metadata
    ///
    /// Recency, access counts and error state survive, so a settings change
    /// does not reset what the cache has learned about the access pattern.
    pub fn invalidate_render_parameters(&self) {
        let memory = {
            let mut state = self.state.lock();
            state.release_buffers();
            state.memory_used
        };

        self.events.emit_all(vec![
            CacheEvent::MemoryChanged(memory),
            CacheEvent::CacheUpdated,
        ]);
    }

    /// Change the thumbnail size; rendered thumbnails are invalidated
    pub fn set_thumbnail_size(&self, size: ThumbnailSize) {
        {
            let mut state = self.state.lock();
            if state.thumbnail_size == size {
                return;
            }
            debug!(
                "thumbnail cache: size changed from {}x{} to {}x{}",
                state.thumbnail_size.width, state.thumbnail_size.height, size.width, size.height
            );
            state.thumbnail_size = size;
        }
        self.invalidate_render_parameters();
    }

    /// Change the render quality; rendered thumbnails are invalidated
    pub fn set_quality(&self, quality: f64) {
        {
            let mut state = self.state.lock();
            if (state.quality - quality).abs() <= QUALITY_EPSILON {
                return;
            }
            debug!(
                "thumbnail cache: quality changed from {:.2} to {:.2}",
                state.quality, quality
            );
            state.quality = quality;
        }
        self.invalidate_render_parameters();
    }

    pub fn set_lazy_loading(&self, enabled: bool) {
        self.state.lock().lazy_loading = enabled;
    }

    pub fn set_adaptive_caching(&self, enabled: bool) {
        self.state.lock().adaptive_caching = enabled;
    }

    pub fn set_generation_timeout(&self, timeout: Option<Duration>) {
        self.state.lock().generation_timeout = timeout;
    }

    // ------------------------------------------------------------------
    // Viewport and preloading
    // ------------------------------------------------------------------

    /// Record the visible page range and recompute generation priorities
    pub fn set_viewport_range(&self, start: usize, end: usize, margin: usize) {
        let mut state = self.state.lock();
        let window = ViewportWindow::new(start, end, margin);
        debug!(
            "thumbnail cache: viewport {}..={} margin {} (lazy loading: {})",
            window.start, window.end, window.margin, state.lazy_loading
        );
        state.viewport = Some(window);
        state.recompute_priorities();
    }

    pub fn viewport(&self) -> Option<ViewportWindow> {
        self.state.lock().viewport
    }

    pub fn set_preload_range(&self, range: usize) {
        self.state.lock().preload_range = range;
    }

    /// Queue pages around the visible range for background generation
    pub fn preload_visible_range(&self, first_visible: usize, last_visible: usize) {
        let mut state = self.state.lock();
        let page_count = state.page_count();
        if page_count == 0 {
            return;
        }

        let (first, last) = if first_visible <= last_visible {
            (first_visible, last_visible)
        } else {
            (last_visible, first_visible)
        };
        let start = first.saturating_sub(state.preload_range);
        let end = last.saturating_add(state.preload_range).min(page_count - 1);

        for page in start..=end {
            if state.should_preload(page) {
                state.preload_queue.insert(page);
            }
        }
    }

    /// Process exactly one queued preload, returning the page taken
    pub fn preload_tick(&self) -> Option<usize> {
        let (page, request) = {
            let mut state = self.state.lock();
            let page = state.preload_queue.pop_first()?;
            if !state.should_generate(page) {
                debug!("thumbnail cache: preload of page {} skipped (lazy)", page);
                return Some(page);
            }
            let memory_before = state.memory_used;
            let request = state.begin_generation(page);
            (page, (request, memory_changed(memory_before, state.memory_used)))
        };

        self.dispatch(request);
        Some(page)
    }

    pub fn pending_preloads(&self) -> usize {
        self.state.lock().preload_queue.len()
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Periodic maintenance
    ///
    /// Adapts the entry budget to the observed hit rate, times out stalled
    /// generations, then evicts down to the budgets.
    pub fn cleanup_cache(&self) {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            if state.entries.is_empty() {
                return;
            }

            if state.adaptive_caching {
                let adapted = eviction::adapt_max_entries(
                    state.max_entries,
                    state.efficiency(),
                    state.memory_used,
                    state.max_memory_bytes,
                );
                if adapted != state.max_entries {
                    info!(
                        "thumbnail cache: entry budget adapted {} -> {} (efficiency {:.2})",
                        state.max_entries,
                        adapted,
                        state.efficiency()
                    );
                    state.max_entries = adapted;
                }
            }

            for page_index in state.expire_stalled(Instant::now()) {
                warn!("thumbnail cache: page {} {}", page_index, TIMEOUT_MESSAGE);
                events.push(CacheEvent::Error {
                    page_index,
                    message: TIMEOUT_MESSAGE.to_string(),
                });
                events.push(CacheEvent::LoadingChanged {
                    page_index,
                    loading: false,
                });
            }

            if state.evict_to_fit(None) > 0 {
                events.push(CacheEvent::MemoryChanged(state.memory_used));
            }
            events.push(CacheEvent::CacheUpdated);
        }

        self.events.emit_all(events);
    }

    /// Remove one page and request it again
    pub fn refresh(&self, page_index: usize) {
        let memory = {
            let mut state = self.state.lock();
            if !state.is_valid_page(page_index) {
                return;
            }
            if let Some(entry) = state.entries.remove(&page_index) {
                state.memory_used = state.memory_used.saturating_sub(entry.memory_bytes);
            }
            state.memory_used
        };

        self.request_generation(page_index);
        self.events.emit_all(vec![
            CacheEvent::CacheUpdated,
            CacheEvent::MemoryChanged(memory),
        ]);
    }

    /// Drop everything; equivalent to [`ThumbnailCache::clear`]
    pub fn refresh_all(&self) {
        self.clear();
    }

    /// Drop every entry, the preload queue, access history and counters
    pub fn clear(&self) {
        {
            let mut state = self.state.lock();
            state.entries.clear();
            state.preload_queue.clear();
            state.frequencies.clear();
            state.memory_used = 0;
            state.hits = 0;
            state.misses = 0;
        }

        self.events.emit_all(vec![
            CacheEvent::CacheUpdated,
            CacheEvent::MemoryChanged(0),
        ]);
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn is_loading(&self, page_index: usize) -> bool {
        self.state
            .lock()
            .entries
            .get(&page_index)
            .is_some_and(|entry| entry.is_loading)
    }

    /// Error flag and message of a page
    pub fn has_error(&self, page_index: usize) -> (bool, String) {
        self.state
            .lock()
            .entries
            .get(&page_index)
            .map_or((false, String::new()), |entry| {
                (entry.has_error, entry.error_message.clone())
            })
    }

    pub fn error_message(&self, page_index: usize) -> Option<String> {
        let state = self.state.lock();
        state
            .entries
            .get(&page_index)
            .filter(|entry| entry.has_error)
            .map(|entry| entry.error_message.clone())
    }

    /// Check residency without touching recency or counters
    pub fn has_cached(&self, page_index: usize) -> bool {
        self.state
            .lock()
            .entries
            .get(&page_index)
            .is_some_and(|entry| entry.is_ready())
    }

    pub fn contains(&self, page_index: usize) -> bool {
        self.state.lock().entries.contains_key(&page_index)
    }

    /// Snapshot of a page's entry
    pub fn entry(&self, page_index: usize) -> Option<ThumbnailEntry> {
        self.state.lock().entries.get(&page_index).cloned()
    }

    /// Intrinsic page size, from the entry or the document
    pub fn page_size(&self, page_index: usize) -> Option<PageSize> {
        let state = self.state.lock();
        if !state.is_valid_page(page_index) {
            return None;
        }
        state
            .entries
            .get(&page_index)
            .and_then(|entry| entry.page_size)
            .or_else(|| {
                state
                    .document
                    .as_ref()
                    .and_then(|doc| doc.page_size(page_index))
            })
    }

    pub fn priority(&self, page_index: usize) -> GenerationPriority {
        self.state.lock().priorities.priority(page_index)
    }

    pub fn frequency(&self, page_index: usize) -> u32 {
        self.state.lock().frequencies.get(page_index)
    }

    pub fn last_accessed(&self, page_index: usize) -> Option<u64> {
        self.state
            .lock()
            .entries
            .get(&page_index)
            .map(|entry| entry.last_accessed)
    }

    /// Pages currently holding an entry, ascending
    pub fn cached_pages(&self) -> Vec<usize> {
        let mut pages: Vec<usize> = self.state.lock().entries.keys().copied().collect();
        pages.sort_unstable();
        pages
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn memory_usage(&self) -> u64 {
        self.state.lock().memory_used
    }

    pub fn max_entries(&self) -> usize {
        self.state.lock().max_entries
    }

    pub fn max_memory_bytes(&self) -> u64 {
        self.state.lock().max_memory_bytes
    }

    pub fn thumbnail_size(&self) -> ThumbnailSize {
        self.state.lock().thumbnail_size
    }

    pub fn quality(&self) -> f64 {
        self.state.lock().quality
    }

    /// Current hit rate (1.0 before any access)
    pub fn efficiency(&self) -> f64 {
        self.state.lock().efficiency()
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats()
    }

    /// Forward a request to the generator and announce it, outside the lock
    fn dispatch(&self, (request, memory_changed): (Option<GenerationRequest>, Option<u64>)) {
        let mut events = Vec::new();
        if let Some(memory) = memory_changed {
            events.push(CacheEvent::MemoryChanged(memory));
        }
        if let Some(request) = request {
            let page_index = request.page_index;
            self.generator.generate(request);
            events.push(CacheEvent::LoadingChanged {
                page_index,
                loading: true,
            });
        }
        self.events.emit_all(events);
    }
}

fn memory_changed(before: u64, after: u64) -> Option<u64> {
    (before != after).then_some(after)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pages(usize);

    impl PageSource for Pages {
        fn page_count(&self) -> usize {
            self.0
        }

        fn page_size(&self, _page_index: usize) -> Option<PageSize> {
            Some(PageSize::new(612.0, 792.0))
        }
    }

    #[derive(Default)]
    struct Recorder {
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ThumbnailGenerator for Recorder {
        fn generate(&self, request: GenerationRequest) {
            self.requests.lock().push(request);
        }
    }

    fn cache_with(config: CacheConfig, pages: usize) -> (ThumbnailCache, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let cache = ThumbnailCache::new(config, recorder.clone());
        cache.set_document(Some(Arc::new(Pages(pages))));
        (cache, recorder)
    }

    fn thumb() -> Thumbnail {
        Thumbnail::solid(120, 160, [200, 200, 200, 255])
    }

    #[test]
    fn test_get_miss_requests_then_hit() {
        let (cache, recorder) = cache_with(CacheConfig::default(), 5);

        assert!(cache.get(2).is_none());
        assert!(cache.is_loading(2));
        assert_eq!(recorder.requests.lock().len(), 1);

        cache.on_generation_complete(2, thumb());
        assert!(!cache.is_loading(2));
        assert_eq!(cache.get(2), Some(thumb()));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.memory_used, 120 * 160 * 4);
    }

    #[test]
    fn test_invalid_page_is_ignored() {
        let (cache, recorder) = cache_with(CacheConfig::default(), 3);

        assert!(cache.get(3).is_none());
        cache.request_generation(99);
        cache.refresh(42);

        assert!(cache.is_empty());
        assert!(recorder.requests.lock().is_empty());
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn test_no_document_means_no_pages() {
        let recorder = Arc::new(Recorder::default());
        let cache = ThumbnailCache::new(CacheConfig::default(), recorder.clone());

        assert!(cache.get(0).is_none());
        assert!(recorder.requests.lock().is_empty());
        assert_eq!(cache.page_count(), 0);
    }

    #[test]
    fn test_request_carries_render_parameters() {
        let config = CacheConfig::default().with_thumbnail_size(80, 100);
        let (cache, recorder) = cache_with(config, 50);
        cache.set_quality(0.5);
        cache.set_viewport_range(10, 12, 1);

        cache.request_generation(11);
        cache.request_generation(13);
        cache.request_generation(30);

        let requests = recorder.requests.lock();
        assert_eq!(requests[0].size, ThumbnailSize::new(80, 100));
        assert_eq!(requests[0].quality, 0.5);
        assert_eq!(requests[0].priority, GenerationPriority::Visible);
        assert_eq!(requests[1].priority, GenerationPriority::Margin);
        assert_eq!(requests[2].priority, GenerationPriority::Background);
    }

    #[test]
    fn test_failure_then_retry() {
        let (cache, recorder) = cache_with(CacheConfig::default(), 5);

        cache.request_generation(1);
        cache.on_generation_failed(1, "corrupt page");
        assert_eq!(cache.has_error(1), (true, "corrupt page".to_string()));
        assert!(!cache.is_loading(1));

        assert!(cache.get(1).is_none());
        assert_eq!(cache.has_error(1), (false, String::new()));
        assert!(cache.is_loading(1));
        assert_eq!(recorder.requests.lock().len(), 2);
    }

    #[test]
    fn test_completion_replacing_buffer_keeps_memory_consistent() {
        let (cache, _) = cache_with(CacheConfig::default(), 5);

        cache.request_generation(0);
        cache.on_generation_complete(0, Thumbnail::solid(10, 10, [0; 4]));
        cache.on_generation_complete(0, Thumbnail::solid(20, 10, [0; 4]));

        assert_eq!(cache.memory_usage(), 800);
    }

    #[test]
    fn test_page_size_from_document_without_entry() {
        let (cache, _) = cache_with(CacheConfig::default(), 5);

        assert_eq!(cache.page_size(3), Some(PageSize::new(612.0, 792.0)));
        assert!(!cache.contains(3));
        assert_eq!(cache.page_size(5), None);

        cache.request_generation(3);
        assert_eq!(
            cache.entry(3).and_then(|e| e.page_size),
            Some(PageSize::new(612.0, 792.0))
        );
    }

    #[test]
    fn test_new_entry_respects_entry_budget() {
        let config = CacheConfig::default()
            .with_budget(2, 64 * 1024 * 1024)
            .with_lazy_loading(false);
        let (cache, _) = cache_with(config, 10);

        for page in 0..5 {
            cache.request_generation(page);
            assert!(cache.len() <= 2);
        }
        assert_eq!(cache.cached_pages(), vec![3, 4]);
        assert_eq!(cache.stats().evictions, 3);
    }

    #[test]
    fn test_refresh_rerequests() {
        let (cache, recorder) = cache_with(CacheConfig::default(), 5);

        cache.request_generation(4);
        cache.on_generation_complete(4, thumb());
        cache.refresh(4);

        assert!(cache.is_loading(4));
        assert!(!cache.has_cached(4));
        assert_eq!(cache.memory_usage(), 0);
        assert_eq!(recorder.requests.lock().len(), 2);
    }

    #[test]
    fn test_clear_resets_counters() {
        let (cache, _) = cache_with(CacheConfig::default(), 5);
        cache.get(0);
        cache.on_generation_complete(0, thumb());
        cache.get(0);
        cache.preload_visible_range(0, 1);

        cache.clear();

        let stats = cache.stats();
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.memory_used, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(cache.pending_preloads(), 0);
        assert_eq!(cache.frequency(0), 0);
    }

    #[test]
    fn test_set_document_clears() {
        let (cache, _) = cache_with(CacheConfig::default(), 5);
        cache.request_generation(0);
        cache.on_generation_complete(0, thumb());

        cache.set_document(Some(Arc::new(Pages(2))));
        assert!(cache.is_empty());
        assert_eq!(cache.page_count(), 2);
    }

    #[test]
    fn test_same_size_or_quality_does_not_invalidate() {
        let (cache, _) = cache_with(CacheConfig::default(), 5);
        cache.request_generation(0);
        cache.on_generation_complete(0, thumb());

        cache.set_thumbnail_size(ThumbnailSize::new(120, 160));
        cache.set_quality(1.0005);
        assert!(cache.has_cached(0));

        cache.set_quality(0.8);
        assert!(!cache.has_cached(0));
    }

    #[test]
    fn test_request_range_skips_resident_and_loading() {
        let config = CacheConfig::default().with_lazy_loading(false);
        let (cache, recorder) = cache_with(config, 10);
        cache.request_generation(2);
        cache.request_generation(3);
        cache.on_generation_complete(3, thumb());

        cache.request_range(1, 50);

        let pages: Vec<usize> = recorder
            .requests
            .lock()
            .iter()
            .map(|r| r.page_index)
            .collect();
        assert_eq!(pages, vec![2, 3, 1, 4, 5, 6, 7, 8, 9]);
    }
}
