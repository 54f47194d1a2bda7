//! Viewport-aware generation priorities
//!
//! Pages are prioritised by their distance to the visible range:
//! 1. Visible pages (currently on screen) - rendered first
//! 2. Margin pages (just outside the visible range) - for smooth scrolling
//! 3. Everything else - background work

use std::collections::HashMap;

/// Scheduling hint passed to the generator
///
/// Lower numeric values are more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GenerationPriority {
    /// Page is inside the visible range
    Visible = 0,

    /// Page is within the margin around the visible range
    Margin = 1,

    /// Any other page
    Background = 5,
}

impl GenerationPriority {
    /// Numeric priority class (0 = visible, 1 = margin, 5 = background)
    pub fn value(self) -> u8 {
        self as u8
    }
}

/// The visible page range plus its margin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportWindow {
    pub start: usize,
    pub end: usize,
    pub margin: usize,
}

impl ViewportWindow {
    pub fn new(start: usize, end: usize, margin: usize) -> Self {
        // Callers occasionally report the range backwards while scrolling up.
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        Self { start, end, margin }
    }

    /// First page of the expanded window
    pub fn expanded_start(&self) -> usize {
        self.start.saturating_sub(self.margin)
    }

    /// Last page of the expanded window
    pub fn expanded_end(&self) -> usize {
        self.end.saturating_add(self.margin)
    }

    /// True when `page_index` lies in `[start - margin, end + margin]`
    pub fn contains(&self, page_index: usize) -> bool {
        page_index >= self.expanded_start() && page_index <= self.expanded_end()
    }

    pub fn is_visible(&self, page_index: usize) -> bool {
        page_index >= self.start && page_index <= self.end
    }
}

/// Page index → priority for pages near the viewport
///
/// Only visible and margin pages are stored; everything else is implicitly
/// [`GenerationPriority::Background`].
#[derive(Debug, Default, Clone)]
pub struct PriorityTable {
    priorities: HashMap<usize, GenerationPriority>,
}

impl PriorityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the table for `window`, clamped to `page_count` pages
    pub fn recompute(&mut self, window: &ViewportWindow, page_count: usize) {
        self.priorities.clear();
        if page_count == 0 {
            return;
        }

        let last_page = page_count - 1;
        let expanded_end = window.expanded_end().min(last_page);

        for page in window.expanded_start()..=expanded_end {
            let priority = if window.is_visible(page) {
                GenerationPriority::Visible
            } else {
                GenerationPriority::Margin
            };
            self.priorities.insert(page, priority);
        }
    }

    /// Priority for `page_index`, `Background` if not near the viewport
    pub fn priority(&self, page_index: usize) -> GenerationPriority {
        self.priorities
            .get(&page_index)
            .copied()
            .unwrap_or(GenerationPriority::Background)
    }

    pub fn len(&self) -> usize {
        self.priorities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.priorities.is_empty()
    }

    pub fn clear(&mut self) {
        self.priorities.clear();
    }
}
