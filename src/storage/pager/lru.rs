use super::replacer::Replacer;
use crate::storage::page::PageId;
use std::collections::{BTreeMap, HashMap};

/// Least-recently-used replacer. Recency is the moment a page was last
/// released by its final pin.
#[derive(Debug, Default)]
pub struct LruReplacer {
    /// Evictable pages keyed by release tick (oldest first)
    queue: BTreeMap<i64, PageId>,
    /// Release tick of each evictable page
    ticks: HashMap<PageId, i64>,
    clock: i64,
    /// Ticks handed to requeued pages count down from here
    oldest: i64,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Replacer for LruReplacer {
    fn evict(&mut self) -> Option<PageId> {
        let (_, page_id) = self.queue.pop_first()?;
        self.ticks.remove(&page_id);
        Some(page_id)
    }

    fn pin(&mut self, page_id: PageId) {
        if let Some(tick) = self.ticks.remove(&page_id) {
            self.queue.remove(&tick);
        }
    }

    fn unpin(&mut self, page_id: PageId) {
        if self.ticks.contains_key(&page_id) {
            return;
        }
        self.clock += 1;
        self.queue.insert(self.clock, page_id);
        self.ticks.insert(page_id, self.clock);
    }

    fn requeue(&mut self, page_id: PageId) {
        if self.ticks.contains_key(&page_id) {
            return;
        }
        self.oldest -= 1;
        self.queue.insert(self.oldest, page_id);
        self.ticks.insert(page_id, self.oldest);
    }

    fn size(&self) -> usize {
        self.ticks.len()
    }
}
