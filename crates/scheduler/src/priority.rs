//! Priority queue for pending thumbnail renders
//!
//! Jobs are ordered by generation priority (visible pages first), then by
//! insertion order so that jobs of the same class run FIFO.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use parking_lot::Mutex;
use thumbnail_cache::{GenerationPriority, GenerationRequest};

/// Unique job identifier
pub type JobId = u64;

/// A queued render with its scheduling metadata
#[derive(Debug, Clone)]
pub struct GenerationJob {
    /// Unique job identifier
    pub id: JobId,

    /// Render parameters handed to the renderer
    pub request: GenerationRequest,

    /// Insertion order (used for FIFO within same priority)
    insertion_order: u64,
}

impl GenerationJob {
    fn new(id: JobId, request: GenerationRequest, insertion_order: u64) -> Self {
        Self {
            id,
            request,
            insertion_order,
        }
    }

    pub fn page_index(&self) -> usize {
        self.request.page_index
    }

    pub fn priority(&self) -> GenerationPriority {
        self.request.priority
    }
}

impl PartialEq for GenerationJob {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for GenerationJob {}

impl PartialOrd for GenerationJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GenerationJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max heap: the lowest priority value and the
        // earliest insertion must compare greatest
        other
            .priority()
            .cmp(&self.priority())
            .then_with(|| other.insertion_order.cmp(&self.insertion_order))
    }
}

/// Thread-safe render queue
///
/// Holds at most one job per page. Pushing a request for a page that is
/// already queued replaces the older job, which picks up the latest size,
/// quality and priority.
#[derive(Default)]
pub struct JobQueue {
    state: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<GenerationJob>,

    /// Live job id per queued page; heap entries whose id differs are stale
    live: HashMap<usize, JobId>,

    next_job_id: JobId,
    insertion_counter: u64,
}

impl QueueState {
    fn pop_live(&mut self) -> Option<GenerationJob> {
        while let Some(job) = self.heap.pop() {
            if self.live.get(&job.page_index()) == Some(&job.id) {
                self.live.remove(&job.page_index());
                return Some(job);
            }
        }
        None
    }

    fn compact(&mut self) {
        let live = &self.live;
        self.heap
            .retain(|job| live.get(&job.page_index()) == Some(&job.id));
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a render, replacing any pending job for the same page
    ///
    /// Returns the assigned job ID.
    pub fn push(&self, request: GenerationRequest) -> JobId {
        let mut state = self.state.lock();
        state.next_job_id += 1;
        let job_id = state.next_job_id;

        let insertion_order = state.insertion_counter;
        state.insertion_counter += 1;

        let replaced = state.live.insert(request.page_index, job_id).is_some();
        state
            .heap
            .push(GenerationJob::new(job_id, request, insertion_order));

        if replaced && state.heap.len() > state.live.len() * 2 {
            state.compact();
        }

        job_id
    }

    /// Pop the most urgent job
    pub fn pop(&self) -> Option<GenerationJob> {
        self.state.lock().pop_live()
    }

    /// Peek at the most urgent job without removing it
    pub fn peek(&self) -> Option<GenerationJob> {
        let mut state = self.state.lock();
        state.compact();
        state.heap.peek().cloned()
    }

    /// Drop the pending job for a page, if any
    pub fn remove_page(&self, page_index: usize) -> bool {
        let mut state = self.state.lock();
        let removed = state.live.remove(&page_index).is_some();
        if removed && state.heap.len() > state.live.len() * 2 {
            state.compact();
        }
        removed
    }

    /// Check whether a page has a pending job
    pub fn contains_page(&self, page_index: usize) -> bool {
        self.state.lock().live.contains_key(&page_index)
    }

    pub fn len(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().live.is_empty()
    }

    /// Drop every pending job
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.heap.clear();
        state.live.clear();
    }
}
