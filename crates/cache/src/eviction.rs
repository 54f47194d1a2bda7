//! Adaptive LRU/LFU eviction
//!
//! While the cache is working well (hit rate above [`LRU_EFFICIENCY_THRESHOLD`])
//! the least recently used entry is evicted. When the hit rate drops the
//! access pattern is treated as thrashing and the least frequently used entry
//! goes instead, so pages the user keeps coming back to survive.

use std::collections::HashMap;

use crate::entry::ThumbnailEntry;

/// Efficiency above which eviction is pure LRU
pub const LRU_EFFICIENCY_THRESHOLD: f64 = 0.7;

/// Efficiency above which periodic maintenance grows the entry budget
pub const GROW_EFFICIENCY_THRESHOLD: f64 = 0.8;

/// Efficiency below which periodic maintenance shrinks the entry budget
pub const SHRINK_EFFICIENCY_THRESHOLD: f64 = 0.5;

/// Memory utilisation below which the entry budget may grow
pub const GROW_MEMORY_HEADROOM: f64 = 0.8;

pub const ADAPTIVE_GROW_STEP: usize = 10;
pub const ADAPTIVE_SHRINK_STEP: usize = 5;
pub const ADAPTIVE_MAX_ENTRIES: usize = 300;
pub const ADAPTIVE_MIN_ENTRIES: usize = 50;

/// Eviction strategy in effect for one eviction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Oldest access first
    LeastRecentlyUsed,

    /// Lowest access count first, oldest access breaks ties
    LeastFrequentlyUsed,
}

impl EvictionPolicy {
    /// Pick the policy for the current hit rate
    pub fn for_efficiency(efficiency: f64, adaptive: bool) -> Self {
        if !adaptive || efficiency > LRU_EFFICIENCY_THRESHOLD {
            EvictionPolicy::LeastRecentlyUsed
        } else {
            EvictionPolicy::LeastFrequentlyUsed
        }
    }
}

/// Hit rate in 0.0..=1.0, optimistic 1.0 before any access
pub fn efficiency(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        1.0
    } else {
        hits as f64 / total as f64
    }
}

/// Choose the page to evict
///
/// `protected` is never chosen. Returns `None` when no other entry exists.
pub fn select_victim(
    entries: &HashMap<usize, ThumbnailEntry>,
    frequencies: &FrequencyTable,
    policy: EvictionPolicy,
    protected: Option<usize>,
) -> Option<usize> {
    let candidates = entries
        .iter()
        .filter(|(page, _)| Some(**page) != protected);

    match policy {
        EvictionPolicy::LeastRecentlyUsed => candidates
            .min_by_key(|(page, entry)| (entry.last_accessed, **page))
            .map(|(page, _)| *page),
        EvictionPolicy::LeastFrequentlyUsed => candidates
            .min_by_key(|(page, entry)| (frequencies.get(**page), entry.last_accessed, **page))
            .map(|(page, _)| *page),
    }
}

/// New entry budget after one maintenance pass
///
/// Grows by a fixed step while the cache is efficient and has memory headroom,
/// shrinks by a fixed step while it is thrashing. The result never moves
/// against the intended direction, so a budget already outside the adaptive
/// bounds is left alone rather than snapped to them.
pub fn adapt_max_entries(
    current_max: usize,
    efficiency: f64,
    memory_used: u64,
    memory_limit: u64,
) -> usize {
    let headroom = (memory_used as f64) < memory_limit as f64 * GROW_MEMORY_HEADROOM;

    if efficiency > GROW_EFFICIENCY_THRESHOLD && headroom {
        (current_max + ADAPTIVE_GROW_STEP)
            .min(ADAPTIVE_MAX_ENTRIES)
            .max(current_max)
    } else if efficiency < SHRINK_EFFICIENCY_THRESHOLD {
        current_max
            .saturating_sub(ADAPTIVE_SHRINK_STEP)
            .max(ADAPTIVE_MIN_ENTRIES)
            .min(current_max)
    } else {
        current_max
    }
}

/// Access counts per page
///
/// Counts outlive the entries they describe (so a page evicted under LRU
/// keeps its history), which means the table has to be bounded explicitly.
#[derive(Debug, Default, Clone)]
pub struct FrequencyTable {
    counts: HashMap<usize, u32>,
}

impl FrequencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, page_index: usize) -> u32 {
        self.counts.get(&page_index).copied().unwrap_or(0)
    }

    pub fn record(&mut self, page_index: usize) {
        let count = self.counts.entry(page_index).or_insert(0);
        *count = count.saturating_add(1);
    }

    pub fn remove(&mut self, page_index: usize) {
        self.counts.remove(&page_index);
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }

    /// Shrink the table to at most `limit` records
    ///
    /// Single-access records of pages that are no longer resident go first.
    /// If that is not enough, the lowest counts of non-resident pages are
    /// dropped. Resident pages are only trimmed when nothing else is left.
    pub fn enforce_limit<F>(&mut self, limit: usize, is_resident: F)
    where
        F: Fn(usize) -> bool,
    {
        if self.counts.len() <= limit {
            return;
        }

        self.counts
            .retain(|page, count| *count > 1 || is_resident(*page));
        if self.counts.len() <= limit {
            return;
        }

        let mut ranked: Vec<(bool, u32, usize)> = self
            .counts
            .iter()
            .map(|(page, count)| (is_resident(*page), *count, *page))
            .collect();
        ranked.sort_unstable();

        let excess = self.counts.len() - limit;
        for (_, _, page) in ranked.into_iter().take(excess) {
            self.counts.remove(&page);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(last_accessed: u64) -> ThumbnailEntry {
        ThumbnailEntry::new(last_accessed)
    }

    #[test]
    fn test_efficiency_defaults_to_one() {
        assert_eq!(efficiency(0, 0), 1.0);
        assert_eq!(efficiency(8, 2), 0.8);
        assert_eq!(efficiency(2, 8), 0.2);
    }

    #[test]
    fn test_policy_threshold() {
        assert_eq!(
            EvictionPolicy::for_efficiency(0.71, true),
            EvictionPolicy::LeastRecentlyUsed
        );
        assert_eq!(
            EvictionPolicy::for_efficiency(0.7, true),
            EvictionPolicy::LeastFrequentlyUsed
        );
        assert_eq!(
            EvictionPolicy::for_efficiency(0.1, false),
            EvictionPolicy::LeastRecentlyUsed
        );
    }

    #[test]
    fn test_lru_picks_oldest_access() {
        let mut entries = HashMap::new();
        entries.insert(0, entry(5));
        entries.insert(1, entry(2));
        entries.insert(2, entry(9));

        let victim = select_victim(
            &entries,
            &FrequencyTable::new(),
            EvictionPolicy::LeastRecentlyUsed,
            None,
        );
        assert_eq!(victim, Some(1));
    }

    #[test]
    fn test_lfu_breaks_ties_by_age() {
        let mut entries = HashMap::new();
        entries.insert(0, entry(5));
        entries.insert(1, entry(2));
        entries.insert(2, entry(9));

        let mut freq = FrequencyTable::new();
        freq.record(0);
        freq.record(2);
        for _ in 0..3 {
            freq.record(1);
        }

        // Pages 0 and 2 both have one access; 0 is older.
        let victim = select_victim(&entries, &freq, EvictionPolicy::LeastFrequentlyUsed, None);
        assert_eq!(victim, Some(0));
    }

    #[test]
    fn test_protected_page_is_skipped() {
        let mut entries = HashMap::new();
        entries.insert(0, entry(1));
        entries.insert(1, entry(2));

        let victim = select_victim(
            &entries,
            &FrequencyTable::new(),
            EvictionPolicy::LeastRecentlyUsed,
            Some(0),
        );
        assert_eq!(victim, Some(1));

        entries.remove(&1);
        let victim = select_victim(
            &entries,
            &FrequencyTable::new(),
            EvictionPolicy::LeastRecentlyUsed,
            Some(0),
        );
        assert_eq!(victim, None);
    }

    #[test]
    fn test_adapt_grows_with_headroom() {
        assert_eq!(adapt_max_entries(100, 0.9, 10, 100), 110);
        assert_eq!(adapt_max_entries(295, 0.9, 10, 100), 300);
        // No headroom
        assert_eq!(adapt_max_entries(100, 0.9, 90, 100), 100);
    }

    #[test]
    fn test_adapt_shrinks_when_thrashing() {
        assert_eq!(adapt_max_entries(100, 0.3, 10, 100), 95);
        assert_eq!(adapt_max_entries(52, 0.3, 10, 100), 50);
    }

    #[test]
    fn test_adapt_never_moves_against_direction() {
        // Below the adaptive floor already: shrinking must not grow it.
        assert_eq!(adapt_max_entries(3, 0.1, 0, 100), 3);
        // Above the adaptive ceiling already: growing must not shrink it.
        assert_eq!(adapt_max_entries(500, 0.95, 0, 100), 500);
        // In between thresholds nothing changes.
        assert_eq!(adapt_max_entries(100, 0.6, 0, 100), 100);
    }

    #[test]
    fn test_frequency_limit_drops_single_access_first() {
        let mut freq = FrequencyTable::new();
        for page in 0..10 {
            freq.record(page);
        }
        freq.record(3);
        freq.record(4);

        freq.enforce_limit(4, |_| false);
        assert_eq!(freq.len(), 2);
        assert_eq!(freq.get(3), 2);
        assert_eq!(freq.get(4), 2);
    }

    #[test]
    fn test_frequency_limit_prefers_non_resident() {
        let mut freq = FrequencyTable::new();
        for page in 0..6 {
            for _ in 0..3 {
                freq.record(page);
            }
        }

        freq.enforce_limit(3, |page| page < 3);
        assert_eq!(freq.len(), 3);
        for page in 0..3 {
            assert_eq!(freq.get(page), 3);
        }
    }

    #[test]
    fn test_frequency_limit_keeps_new_resident_record() {
        let mut freq = FrequencyTable::new();
        for page in 0..4 {
            freq.record(page);
            freq.record(page);
        }

        // A first access to a resident page must survive a full table
        freq.record(10);
        freq.enforce_limit(4, |page| page == 10);

        assert_eq!(freq.len(), 4);
        assert_eq!(freq.get(10), 1);
        assert_eq!(freq.get(0), 0);
    }
}
