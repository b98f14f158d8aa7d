//! B+tree over the pages of a single file, rooted at page 0.
//!
//! Leaves hold [`Record`]s keyed by row id and are chained through next and
//! previous sibling pointers. Internal nodes hold `(separator, child)` cells
//! plus a rightmost child: a key smaller than a separator belongs to that
//! separator's child, anything at or above the last separator belongs to the
//! rightmost child.
//!
//! The root never moves. When it splits, both halves go to fresh pages and
//! the root is rewritten in place as an internal node over them.

pub mod iterator;

pub use self::iterator::BTreeScan;

use crate::access::record::{Record, RowId};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::node_page::INTERNAL_CELL_SIZE;
use crate::storage::page::{NodeKind, Page, PageId, SearchResult, ROOT_PAGE_ID};
use crate::storage::pager::{Pager, PinnedPage};
use log::{debug, info};

/// A separator pushed up to the parent after `left` was split in two.
#[derive(Debug, Clone, Copy)]
struct Promotion {
    separator: RowId,
    left: PageId,
    right: PageId,
}

/// Cells destined for one side of a split.
enum NodeContents {
    Leaf(Vec<Record>),
    Internal(Vec<(RowId, PageId)>, PageId),
}

impl NodeContents {
    /// Rebuild `page` to hold exactly these cells. Sibling pointers only
    /// apply to leaves.
    fn write_to(
        &self,
        page: &mut Page,
        prev: Option<PageId>,
        next: Option<PageId>,
    ) -> StorageResult<()> {
        let mut node = page.node_mut();
        match self {
            NodeContents::Leaf(records) => {
                node.init(NodeKind::Leaf);
                for record in records {
                    node.insert_record(record)?;
                }
                node.set_prev_sibling(prev)?;
                node.set_next_sibling(next)?;
            }
            NodeContents::Internal(entries, rightmost) => {
                node.init(NodeKind::Internal);
                for &(separator, child) in entries {
                    node.insert_child(separator, child)?;
                }
                node.set_rightmost_child(*rightmost)?;
            }
        }
        page.mark_dirty();
        Ok(())
    }
}

pub struct BTree {
    pager: Pager,
}

impl BTree {
    /// Open the tree stored in `pager`, writing an empty root leaf into a
    /// freshly created file.
    pub fn open(pager: Pager) -> StorageResult<Self> {
        let root = pager.get_page(ROOT_PAGE_ID)?;
        let uninitialized = root.read().node().is_uninitialized();

        if uninitialized {
            let header = pager.file_header()?;
            if pager.page_count() != 1 || header.next_row_id != 0 {
                return Err(StorageError::Corrupted(
                    "root node is missing from a non-empty file".into(),
                ));
            }
            let mut page = root.write();
            page.node_mut().init(NodeKind::Leaf);
            page.mark_dirty();
            info!("initialised empty root leaf");
        } else {
            root.read().node().validate()?;
        }
        drop(root);

        Ok(Self { pager })
    }

    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    /// Insert a record under the next row id and return it as stored.
    ///
    /// The row id counter only advances when the insert succeeds. If a split
    /// would need more pages than the page budget allows, the insert is
    /// rejected before any page is modified.
    pub fn insert(&mut self, username: &str, email: &str) -> StorageResult<Record> {
        let key = self.pager.file_header()?.next_row_id;
        if key == RowId::MAX {
            return Err(StorageError::RowIdExhausted);
        }
        let record = Record::new(key, username, email);

        let mut path = self.descend(key)?;
        let Some(leaf) = path.last() else {
            return Err(StorageError::Corrupted("descent found no leaf".into()));
        };

        let result = {
            let mut page = leaf.write();
            let result = page.node_mut().insert_record(&record);
            if result.is_ok() {
                page.mark_dirty();
            }
            result
        };

        match result {
            Ok(_) => {}
            Err(e) if e.is_overflow() => {
                let needed = Self::pages_needed_for_split(&path)?;
                self.pager.ensure_available(needed)?;
                self.split_and_insert(&mut path, &record)?;
            }
            Err(e) => return Err(e),
        }
        drop(path);

        self.pager
            .update_file_header(|header| header.next_row_id = key + 1)?;
        Ok(record)
    }

    /// Point lookup. A missing key is `Ok(None)`.
    pub fn lookup(&self, key: RowId) -> StorageResult<Option<Record>> {
        let mut path = self.descend(key)?;
        let Some(leaf) = path.pop() else {
            return Ok(None);
        };
        drop(path);

        let page = leaf.read();
        let node = page.node();
        match node.binary_search_key(key)? {
            SearchResult::Found(slot) => Ok(Some(node.read_cell(slot)?)),
            SearchResult::NotFound(_) => Ok(None),
        }
    }

    /// Every record in ascending key order. Each call starts over from the
    /// leftmost leaf.
    pub fn scan(&self) -> StorageResult<BTreeScan> {
        let (leftmost, _) = self.leftmost_leaf()?;
        Ok(BTreeScan::new(self.pager.clone(), leftmost))
    }

    /// Number of levels, counting the root. A lone root leaf has height 1.
    pub fn height(&self) -> StorageResult<usize> {
        Ok(self.leftmost_leaf()?.1)
    }

    /// Walk the whole tree and check that every node is well formed, keys
    /// respect their separators, all leaves sit at the same depth and the
    /// sibling chain visits the leaves in key order.
    pub fn verify(&self) -> StorageResult<()> {
        let page_count = self.pager.page_count() as usize;
        let mut stack = vec![(ROOT_PAGE_ID, None::<RowId>, None::<RowId>, 1usize)];
        let mut leaf_depth = None;
        let mut leaves = Vec::new();
        let mut visited = 0;

        while let Some((page_id, lower, upper, depth)) = stack.pop() {
            visited += 1;
            if visited > page_count {
                return Err(StorageError::Corrupted(format!(
                    "tree reaches more nodes than the {} pages in the file",
                    page_count
                )));
            }

            let pinned = self.pager.get_page(page_id)?;
            let page = pinned.read();
            let node = page.node();
            node.validate()?;

            let in_range =
                |key: RowId| lower.map_or(true, |l| key >= l) && upper.map_or(true, |u| key < u);
            let out_of_range = |key: RowId| {
                StorageError::Corrupted(format!(
                    "key {} on page {} is outside its parent's range",
                    key, page_id
                ))
            };

            if node.is_leaf()? {
                for slot in 0..node.cell_count()? {
                    let key = node.key_at(slot)?;
                    if !in_range(key) {
                        return Err(out_of_range(key));
                    }
                }
                match leaf_depth {
                    None => leaf_depth = Some(depth),
                    Some(expected) if expected != depth => {
                        return Err(StorageError::Corrupted(format!(
                            "leaf page {} is at depth {} but other leaves are at {}",
                            page_id, depth, expected
                        )))
                    }
                    Some(_) => {}
                }
                leaves.push(page_id);
            } else {
                let (entries, rightmost) = node.children()?;
                let mut children = Vec::with_capacity(entries.len() + 1);
                let mut child_lower = lower;
                for (separator, child) in entries {
                    if !in_range(separator) {
                        return Err(out_of_range(separator));
                    }
                    children.push((child, child_lower, Some(separator)));
                    child_lower = Some(separator);
                }
                children.push((rightmost, child_lower, upper));

                // Reversed so the leftmost child is visited first.
                for (child, lower, upper) in children.into_iter().rev() {
                    stack.push((child, lower, upper, depth + 1));
                }
            }
        }

        let mut prev = None;
        let mut cursor = leaves.first().copied();
        let mut chained = 0;
        while let Some(page_id) = cursor {
            if leaves.get(chained) != Some(&page_id) {
                return Err(StorageError::Corrupted(format!(
                    "leaf chain reaches page {} out of tree order",
                    page_id
                )));
            }
            let pinned = self.pager.get_page(page_id)?;
            let page = pinned.read();
            let node = page.node();
            if node.prev_sibling()? != prev {
                return Err(StorageError::Corrupted(format!(
                    "leaf page {} has a stale previous-sibling pointer",
                    page_id
                )));
            }
            chained += 1;
            prev = Some(page_id);
            cursor = node.next_sibling()?;
        }
        if chained != leaves.len() {
            return Err(StorageError::Corrupted(format!(
                "leaf chain visits {} of {} leaves",
                chained,
                leaves.len()
            )));
        }

        Ok(())
    }

    /// Pin every node from the root down to the leaf whose range holds `key`.
    fn descend(&self, key: RowId) -> StorageResult<Vec<PinnedPage>> {
        let page_count = self.pager.page_count() as usize;
        let mut path = Vec::new();
        let mut current = self.pager.get_page(ROOT_PAGE_ID)?;

        loop {
            let child = {
                let page = current.read();
                let node = page.node();
                if node.is_leaf()? {
                    None
                } else {
                    Some(node.child_for(key)?)
                }
            };
            path.push(current);

            let Some(child) = child else {
                return Ok(path);
            };
            if path.len() >= page_count {
                return Err(StorageError::Corrupted(format!(
                    "descent for key {} is deeper than the file",
                    key
                )));
            }
            current = self.pager.get_page(child)?;
        }
    }

    /// Leftmost leaf and the depth at which it sits.
    fn leftmost_leaf(&self) -> StorageResult<(PageId, usize)> {
        let page_count = self.pager.page_count() as usize;
        let mut page_id = ROOT_PAGE_ID;
        let mut depth = 1;

        loop {
            let pinned = self.pager.get_page(page_id)?;
            let page = pinned.read();
            let node = page.node();
            if node.is_leaf()? {
                return Ok((page_id, depth));
            }
            page_id = node.leftmost_child()?;
            depth += 1;
            if depth > page_count {
                return Err(StorageError::Corrupted(
                    "leftmost descent is deeper than the file".into(),
                ));
            }
        }
    }

    /// Pages a split of the leaf at the end of `path` will allocate. Each
    /// full non-root level takes one page; a full root takes two.
    fn pages_needed_for_split(path: &[PinnedPage]) -> StorageResult<u32> {
        let mut needed = 0;
        for (depth, pinned) in path.iter().enumerate().rev() {
            let is_leaf_level = depth + 1 == path.len();
            if !is_leaf_level && pinned.read().node().can_fit(INTERNAL_CELL_SIZE)? {
                break;
            }
            needed += if pinned.page_id().is_root() { 2 } else { 1 };
        }
        Ok(needed)
    }

    /// Split the full leaf at the end of `path` and push separators up the
    /// pinned ancestors until one of them has room.
    fn split_and_insert(&self, path: &mut Vec<PinnedPage>, record: &Record) -> StorageResult<()> {
        let Some(leaf) = path.pop() else {
            return Err(StorageError::Corrupted("split requested on an empty path".into()));
        };
        let mut promoted = self.split_leaf(&leaf, record)?;
        drop(leaf);

        while let Some(promotion) = promoted {
            let Some(parent) = path.pop() else {
                return Err(StorageError::Corrupted(format!(
                    "page {} split without a parent",
                    promotion.left
                )));
            };
            promoted = self.insert_separator(&parent, promotion)?;
        }
        Ok(())
    }

    fn split_leaf(&self, leaf: &PinnedPage, record: &Record) -> StorageResult<Option<Promotion>> {
        let (records, prev, next) = {
            let page = leaf.read();
            let node = page.node();
            (node.records()?, node.prev_sibling()?, node.next_sibling()?)
        };
        if records.len() < 2 {
            return Err(StorageError::Corrupted(format!(
                "leaf page {} overflowed with {} cells",
                leaf.page_id(),
                records.len()
            )));
        }

        let mid = records.len() / 2;
        let separator = records[mid].key;
        let mut lower = records[..mid].to_vec();
        let mut upper = records[mid..].to_vec();
        if record.key >= separator {
            insert_sorted(&mut upper, record);
        } else {
            insert_sorted(&mut lower, record);
        }

        if leaf.page_id().is_root() {
            self.split_root(
                leaf,
                separator,
                NodeContents::Leaf(lower),
                NodeContents::Leaf(upper),
            )?;
            return Ok(None);
        }

        let right = self.pager.allocate_page()?;
        let (left_id, right_id) = (leaf.page_id(), right.page_id());
        NodeContents::Leaf(upper).write_to(&mut right.write(), Some(left_id), next)?;
        NodeContents::Leaf(lower).write_to(&mut leaf.write(), prev, Some(right_id))?;

        if let Some(next_id) = next {
            let next_page = self.pager.get_page(next_id)?;
            let mut page = next_page.write();
            page.node_mut().set_prev_sibling(Some(right_id))?;
            page.mark_dirty();
        }

        debug!(
            "split leaf page {} at key {} into page {}",
            left_id, separator, right_id
        );
        Ok(Some(Promotion {
            separator,
            left: left_id,
            right: right_id,
        }))
    }

    /// Record that `promotion.left` now only covers keys below the separator
    /// and `promotion.right` covers the rest of its old range.
    fn insert_separator(
        &self,
        parent: &PinnedPage,
        promotion: Promotion,
    ) -> StorageResult<Option<Promotion>> {
        {
            let mut page = parent.write();
            if page.node().can_fit(INTERNAL_CELL_SIZE)? {
                let mut node = page.node_mut();
                node.redirect_child(promotion.left, promotion.right)?;
                node.insert_child(promotion.separator, promotion.left)?;
                page.mark_dirty();
                return Ok(None);
            }
        }

        let (mut entries, mut rightmost) = parent.read().node().children()?;
        if rightmost == promotion.left {
            rightmost = promotion.right;
        } else if let Some(entry) = entries.iter_mut().find(|(_, child)| *child == promotion.left) {
            entry.1 = promotion.right;
        } else {
            return Err(StorageError::Corrupted(format!(
                "internal page {} has no entry for child {}",
                parent.page_id(),
                promotion.left
            )));
        }
        entries.push((promotion.separator, promotion.left));
        entries.sort_by_key(|&(separator, _)| separator);

        let mid = entries.len() / 2;
        let (separator, middle_child) = entries[mid];
        let left = NodeContents::Internal(entries[..mid].to_vec(), middle_child);
        let right = NodeContents::Internal(entries[mid + 1..].to_vec(), rightmost);

        if parent.page_id().is_root() {
            self.split_root(parent, separator, left, right)?;
            return Ok(None);
        }

        let right_page = self.pager.allocate_page()?;
        let (left_id, right_id) = (parent.page_id(), right_page.page_id());
        right.write_to(&mut right_page.write(), None, None)?;
        left.write_to(&mut parent.write(), None, None)?;

        debug!(
            "split internal page {} at key {} into page {}",
            left_id, separator, right_id
        );
        Ok(Some(Promotion {
            separator,
            left: left_id,
            right: right_id,
        }))
    }

    /// Move both halves of the root to fresh pages and rewrite the root as an
    /// internal node over them. The tree grows by one level.
    fn split_root(
        &self,
        root: &PinnedPage,
        separator: RowId,
        left: NodeContents,
        right: NodeContents,
    ) -> StorageResult<()> {
        let left_page = self.pager.allocate_page()?;
        let right_page = self.pager.allocate_page()?;
        let (left_id, right_id) = (left_page.page_id(), right_page.page_id());

        left.write_to(&mut left_page.write(), None, Some(right_id))?;
        right.write_to(&mut right_page.write(), Some(left_id), None)?;
        NodeContents::Internal(vec![(separator, left_id)], right_id)
            .write_to(&mut root.write(), None, None)?;

        debug!(
            "split root at key {} into pages {} and {}",
            separator, left_id, right_id
        );
        Ok(())
    }
}

fn insert_sorted(records: &mut Vec<Record>, record: &Record) {
    let position = records.partition_point(|r| r.key < record.key);
    records.insert(position, record.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use crate::storage::disk::PageManager;
    use crate::storage::page::MIN_PAGE_SIZE;
    use anyhow::Result;
    use tempfile::{tempdir, TempDir};

    // Four leaf cells fit on every page at this size.
    const SMALL_PAGE: usize = MIN_PAGE_SIZE;

    fn create_test_tree(config: DbConfig) -> Result<(BTree, TempDir)> {
        let dir = tempdir()?;
        let path = dir.path().join("test.db");
        let page_manager =
            PageManager::open_or_create(&path, config.page_size)?.with_sync_writes(false);
        let pager = Pager::open(page_manager, &config)?;
        Ok((BTree::open(pager)?, dir))
    }

    fn small_tree() -> Result<(BTree, TempDir)> {
        create_test_tree(DbConfig::default().with_page_size(SMALL_PAGE))
    }

    fn insert_users(tree: &mut BTree, count: u32) -> Result<()> {
        for i in 0..count {
            tree.insert(&format!("user{}", i), &format!("user{}@example.com", i))?;
        }
        Ok(())
    }

    fn scanned_keys(tree: &BTree) -> Result<Vec<RowId>> {
        Ok(tree
            .scan()?
            .map(|r| r.map(|record| record.key))
            .collect::<StorageResult<Vec<_>>>()?)
    }

    #[test]
    fn test_empty_tree() -> Result<()> {
        let (tree, _dir) = small_tree()?;
        assert_eq!(tree.height()?, 1);
        assert!(scanned_keys(&tree)?.is_empty());
        assert_eq!(tree.lookup(0)?, None);
        tree.verify()?;
        Ok(())
    }

    #[test]
    fn test_insert_assigns_sequential_keys() -> Result<()> {
        let (mut tree, _dir) = small_tree()?;

        let first = tree.insert("alice", "alice@example.com")?;
        let second = tree.insert("bob", "bob@example.com")?;
        assert_eq!(first.key, 0);
        assert_eq!(second.key, 1);
        assert_eq!(tree.pager().file_header()?.next_row_id, 2);

        assert_eq!(tree.lookup(1)?, Some(second));
        assert_eq!(tree.lookup(0)?, Some(first));
        assert_eq!(tree.lookup(2)?, None);
        Ok(())
    }

    #[test]
    fn test_root_leaf_split() -> Result<()> {
        let (mut tree, _dir) = small_tree()?;
        insert_users(&mut tree, 5)?;

        assert_eq!(tree.height()?, 2);
        assert_eq!(tree.pager().page_count(), 3);

        let root = tree.pager().get_page(ROOT_PAGE_ID)?;
        let (entries, rightmost) = root.read().node().children()?;
        assert_eq!(entries, vec![(2, PageId(1))]);
        assert_eq!(rightmost, PageId(2));
        drop(root);

        let left = tree.pager().get_page(PageId(1))?;
        let left_keys: Vec<_> = left.read().node().records()?.iter().map(|r| r.key).collect();
        assert_eq!(left_keys, vec![0, 1]);
        assert_eq!(left.read().node().next_sibling()?, Some(PageId(2)));

        let right = tree.pager().get_page(PageId(2))?;
        let right_keys: Vec<_> = right.read().node().records()?.iter().map(|r| r.key).collect();
        assert_eq!(right_keys, vec![2, 3, 4]);
        assert_eq!(right.read().node().prev_sibling()?, Some(PageId(1)));

        assert_eq!(scanned_keys(&tree)?, (0..5).collect::<Vec<_>>());
        tree.verify()?;
        Ok(())
    }

    #[test]
    fn test_split_keeps_sibling_chain() -> Result<()> {
        let (mut tree, _dir) = small_tree()?;
        insert_users(&mut tree, 40)?;

        tree.verify()?;
        assert_eq!(scanned_keys(&tree)?, (0..40).collect::<Vec<_>>());
        for key in 0..40 {
            let record = tree.lookup(key)?.expect("inserted key is present");
            assert_eq!(record.username, format!("user{}", key));
        }
        Ok(())
    }

    #[test]
    fn test_internal_splits_grow_the_tree() -> Result<()> {
        let (mut tree, _dir) = create_test_tree(
            DbConfig::default()
                .with_page_size(SMALL_PAGE)
                .with_cache_capacity(16),
        )?;
        insert_users(&mut tree, 3000)?;

        assert!(tree.height()? >= 3, "root internal node should have split");
        tree.verify()?;
        assert_eq!(scanned_keys(&tree)?, (0..3000).collect::<Vec<_>>());
        assert!(tree.pager().cached_pages() <= 16 + 4);

        for key in [0, 1, 999, 1500, 2998, 2999] {
            assert_eq!(tree.lookup(key)?.map(|r| r.key), Some(key));
        }
        assert_eq!(tree.lookup(3000)?, None);
        Ok(())
    }

    #[test]
    fn test_scan_is_restartable() -> Result<()> {
        let (mut tree, _dir) = small_tree()?;
        insert_users(&mut tree, 12)?;

        let first: Vec<_> = scanned_keys(&tree)?;
        let mut partial = tree.scan()?;
        partial.next();
        partial.next();
        drop(partial);
        assert_eq!(scanned_keys(&tree)?, first);
        Ok(())
    }

    #[test]
    fn test_page_budget_rejects_split_without_changes() -> Result<()> {
        let (mut tree, _dir) = create_test_tree(
            DbConfig::default()
                .with_page_size(SMALL_PAGE)
                .with_max_pages(Some(1)),
        )?;
        insert_users(&mut tree, 4)?;

        let err = tree.insert("late", "late@example.com").unwrap_err();
        assert!(err.is_overflow());
        assert_eq!(tree.pager().page_count(), 1);
        assert_eq!(tree.pager().file_header()?.next_row_id, 4);
        assert_eq!(scanned_keys(&tree)?, vec![0, 1, 2, 3]);
        tree.verify()?;
        Ok(())
    }

    #[test]
    fn test_page_budget_counts_every_level() -> Result<()> {
        // Root split needs two pages; three pages total is not enough.
        let (mut tree, _dir) = create_test_tree(
            DbConfig::default()
                .with_page_size(SMALL_PAGE)
                .with_max_pages(Some(2)),
        )?;
        insert_users(&mut tree, 4)?;
        assert!(tree.insert("x", "y").unwrap_err().is_overflow());
        assert_eq!(tree.height()?, 1);
        Ok(())
    }

    #[test]
    fn test_reopen_existing_tree() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.db");
        let config = DbConfig::default()
            .with_page_size(SMALL_PAGE)
            .with_sync_writes(false);

        {
            let pager = Pager::open(PageManager::open_or_create(&path, SMALL_PAGE)?, &config)?;
            let mut tree = BTree::open(pager)?;
            insert_users(&mut tree, 25)?;
            tree.pager().flush_all()?;
        }

        let pager = Pager::open(PageManager::open(&path, SMALL_PAGE)?, &config)?;
        let mut tree = BTree::open(pager)?;
        assert_eq!(scanned_keys(&tree)?, (0..25).collect::<Vec<_>>());
        assert_eq!(tree.insert("next", "next@example.com")?.key, 25);
        tree.verify()?;
        Ok(())
    }

    #[test]
    fn test_missing_root_in_used_file_is_corruption() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.db");
        let config = DbConfig::default().with_sync_writes(false);

        let pager = Pager::open(PageManager::open_or_create(&path, config.page_size)?, &config)?;
        pager.update_file_header(|header| header.next_row_id = 5)?;
        assert!(matches!(
            BTree::open(pager),
            Err(StorageError::Corrupted(_))
        ));
        Ok(())
    }

    #[test]
    fn test_row_id_exhausted() -> Result<()> {
        let (mut tree, _dir) = small_tree()?;
        tree.pager()
            .update_file_header(|header| header.next_row_id = RowId::MAX)?;
        assert!(matches!(
            tree.insert("a", "b"),
            Err(StorageError::RowIdExhausted)
        ));
        Ok(())
    }

    #[test]
    fn test_sibling_cycle_is_reported() -> Result<()> {
        let (mut tree, _dir) = small_tree()?;
        insert_users(&mut tree, 5)?;

        {
            let right = tree.pager().get_page(PageId(2))?;
            let mut page = right.write();
            page.node_mut().set_next_sibling(Some(PageId(1)))?;
        }

        let results: Vec<_> = tree.scan()?.collect();
        assert!(matches!(
            results.last(),
            Some(Err(StorageError::Corrupted(_)))
        ));
        assert!(tree.verify().is_err());
        Ok(())
    }
}
