//! Cache usage statistics

use serde::Serialize;

use crate::eviction;

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of entries currently in cache (resident or not)
    pub entry_count: usize,

    /// Number of entries holding a rendered thumbnail
    pub resident_count: usize,

    /// Number of entries with a generation in flight
    pub loading_count: usize,

    /// Total memory used by resident thumbnails (bytes)
    pub memory_used: u64,

    /// Maximum memory allowed (bytes)
    pub memory_limit: u64,

    /// Maximum number of entries
    pub entry_limit: usize,

    /// Number of cache hits
    pub hits: u64,

    /// Number of cache misses
    pub misses: u64,

    /// Number of entries evicted to satisfy a budget
    pub evictions: u64,

    /// Number of requests forwarded to the generator
    pub generation_requests: u64,
}

impl CacheStats {
    /// Hit rate driving the eviction policy (1.0 before any access)
    pub fn efficiency(&self) -> f64 {
        eviction::efficiency(self.hits, self.misses)
    }

    /// Calculate memory utilization (0.0 to 1.0)
    pub fn memory_utilization(&self) -> f64 {
        if self.memory_limit == 0 {
            0.0
        } else {
            self.memory_used as f64 / self.memory_limit as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_efficiency_and_utilization() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            memory_used: 25,
            memory_limit: 100,
            ..Default::default()
        };
        assert_eq!(stats.efficiency(), 0.75);
        assert_eq!(stats.memory_utilization(), 0.25);
        assert_eq!(CacheStats::default().efficiency(), 1.0);
        assert_eq!(CacheStats::default().memory_utilization(), 0.0);
    }
}
