use crate::storage::page::PageId;
use std::fmt::Debug;

/// Eviction policy over the pages the pager currently holds unpinned.
pub trait Replacer: Send + Debug {
    /// Select a page to evict. Returns None if no page can be evicted.
    fn evict(&mut self) -> Option<PageId>;

    /// Mark a page as pinned (not evictable).
    fn pin(&mut self, page_id: PageId);

    /// Mark a page as unpinned (evictable). Counts as the most recent access.
    fn unpin(&mut self, page_id: PageId);

    /// Put back a page returned by `evict` that could not be evicted. It
    /// becomes the next candidate again.
    fn requeue(&mut self, page_id: PageId);

    /// Get the number of evictable pages.
    fn size(&self) -> usize;
}
