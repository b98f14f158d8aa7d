use crate::access::record::Record;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use crate::storage::pager::Pager;
use log::debug;
use std::collections::VecDeque;

/// Forward scan over the leaf chain.
///
/// One leaf is decoded at a time; its page is pinned only while its records
/// are copied out, so a long scan never holds more than one pin.
pub struct BTreeScan {
    pager: Pager,
    /// Next leaf to load; `None` once the chain is exhausted or an error was
    /// returned.
    next_leaf: Option<PageId>,
    /// Records of the current leaf not yet returned
    buffered: VecDeque<Record>,
    /// Statistics
    leaves_visited: usize,
    records_returned: usize,
}

impl BTreeScan {
    pub(crate) fn new(pager: Pager, first_leaf: PageId) -> Self {
        Self {
            pager,
            next_leaf: Some(first_leaf),
            buffered: VecDeque::new(),
            leaves_visited: 0,
            records_returned: 0,
        }
    }

    pub fn leaves_visited(&self) -> usize {
        self.leaves_visited
    }

    pub fn records_returned(&self) -> usize {
        self.records_returned
    }

    fn load_leaf(&mut self, page_id: PageId) -> StorageResult<()> {
        self.leaves_visited += 1;
        // A chain longer than the file must loop back on itself.
        if self.leaves_visited > self.pager.page_count() as usize {
            return Err(StorageError::Corrupted(format!(
                "leaf chain revisits pages (reached page {})",
                page_id
            )));
        }

        let pinned = self.pager.get_page(page_id)?;
        let page = pinned.read();
        let node = page.node();
        self.buffered.extend(node.records()?);
        self.next_leaf = node.next_sibling()?;
        Ok(())
    }
}

impl Iterator for BTreeScan {
    type Item = StorageResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffered.pop_front() {
                self.records_returned += 1;
                return Some(Ok(record));
            }

            let page_id = self.next_leaf.take()?;
            if let Err(e) = self.load_leaf(page_id) {
                self.next_leaf = None;
                self.buffered.clear();
                return Some(Err(e));
            }
            if self.next_leaf.is_none() {
                debug!(
                    "scan reached the last leaf after {} leaves",
                    self.leaves_visited
                );
            }
        }
    }
}
