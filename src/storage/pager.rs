//! Buffer pool: the single source of truth for which pages are in memory.
//!
//! The page table maps page numbers to cached pages and is guarded by one
//! mutex, held only while a lookup, insert or eviction touches the table.
//! Callers get a [`PinnedPage`] back; the page cannot be evicted until every
//! handle to it is dropped. Page 0 holds the file header and is never evicted.

pub mod lru;
pub mod replacer;

use crate::config::DbConfig;
use crate::storage::disk::PageManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{FileHeader, Page, PageId, ROOT_PAGE_ID};
use log::{debug, info};
use lru::LruReplacer;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use replacer::Replacer;
use std::collections::HashMap;
use std::sync::Arc;

struct Frame {
    page: Arc<RwLock<Page>>,
    pin_count: u32,
}

struct PageTable {
    frames: HashMap<PageId, Frame>,
    replacer: Box<dyn Replacer>,
    page_count: u32,
}

struct PagerInner {
    table: Mutex<PageTable>,
    page_manager: Mutex<PageManager>,
    page_size: usize,
    capacity: usize,
    max_pages: Option<u32>,
}

impl PagerInner {
    fn unpin(&self, page_id: PageId) {
        let mut table = self.table.lock();
        let released = match table.frames.get_mut(&page_id) {
            Some(frame) if frame.pin_count > 0 => {
                frame.pin_count -= 1;
                frame.pin_count == 0
            }
            _ => false,
        };
        if released && !page_id.is_root() {
            table.replacer.unpin(page_id);
        }
    }
}

#[derive(Clone)]
pub struct Pager {
    inner: Arc<PagerInner>,
}

impl Pager {
    /// Open a pager over `page_manager` with an LRU replacer. A file whose
    /// header was never written gets a fresh header on page 0.
    pub fn open(page_manager: PageManager, config: &DbConfig) -> StorageResult<Self> {
        Self::with_replacer(page_manager, config, Box::new(LruReplacer::new()))
    }

    pub fn with_replacer(
        mut page_manager: PageManager,
        config: &DbConfig,
        replacer: Box<dyn Replacer>,
    ) -> StorageResult<Self> {
        let page_size = page_manager.page_size();
        let mut data = vec![0u8; page_size].into_boxed_slice();
        page_manager.read_page(ROOT_PAGE_ID, &mut data)?;

        let fresh = FileHeader::is_blank(&data);
        let page_count = if fresh {
            FileHeader::new(page_size, config.cache_capacity).encode(&mut data)?;
            info!("initialised file header with page size {}", page_size);
            1
        } else {
            let header = FileHeader::decode(&data)?;
            if header.page_size() != page_size {
                return Err(StorageError::InvalidHeader(format!(
                    "file declares page size {} but was opened with {}",
                    header.page_size(),
                    page_size
                )));
            }
            if header.page_count == 0 {
                return Err(StorageError::Corrupted(
                    "file header records zero pages".into(),
                ));
            }
            header.page_count
        };

        let mut root = Page::from_bytes(ROOT_PAGE_ID, data);
        if fresh {
            root.mark_dirty();
        }

        let mut frames = HashMap::with_capacity(config.cache_capacity);
        frames.insert(
            ROOT_PAGE_ID,
            Frame {
                page: Arc::new(RwLock::new(root)),
                pin_count: 0,
            },
        );

        Ok(Self {
            inner: Arc::new(PagerInner {
                table: Mutex::new(PageTable {
                    frames,
                    replacer,
                    page_count,
                }),
                page_manager: Mutex::new(page_manager),
                page_size,
                capacity: config.cache_capacity,
                max_pages: config.max_pages,
            }),
        })
    }

    /// Pin page `page_id`, loading it from disk on a miss.
    pub fn get_page(&self, page_id: PageId) -> StorageResult<PinnedPage> {
        let mut table = self.inner.table.lock();
        if page_id.0 >= table.page_count {
            return Err(StorageError::PageNotFound(page_id));
        }

        if let Some(frame) = table.frames.get_mut(&page_id) {
            frame.pin_count += 1;
            let page = Arc::clone(&frame.page);
            if !page_id.is_root() {
                table.replacer.pin(page_id);
            }
            return Ok(self.pinned(page_id, page));
        }

        self.make_room(&mut table)?;

        let mut data = vec![0u8; self.inner.page_size].into_boxed_slice();
        self.inner.page_manager.lock().read_page(page_id, &mut data)?;
        let page = Arc::new(RwLock::new(Page::from_bytes(page_id, data)));
        table.frames.insert(
            page_id,
            Frame {
                page: Arc::clone(&page),
                pin_count: 1,
            },
        );
        debug!("loaded page {} from disk", page_id);

        Ok(self.pinned(page_id, page))
    }

    /// Register a zero-filled, dirty page numbered after the current last
    /// page and record the new page count in the file header.
    ///
    /// Takes a write latch on page 0, so callers must not hold a guard on the
    /// root while allocating.
    pub fn allocate_page(&self) -> StorageResult<PinnedPage> {
        let pinned = {
            let mut table = self.inner.table.lock();
            self.check_budget(&table, 1)?;
            self.make_room(&mut table)?;

            let page_id = PageId(table.page_count);
            table.page_count += 1;

            let mut page = Page::new(page_id, self.inner.page_size);
            page.mark_dirty();
            let page = Arc::new(RwLock::new(page));
            table.frames.insert(
                page_id,
                Frame {
                    page: Arc::clone(&page),
                    pin_count: 1,
                },
            );
            self.pinned(page_id, page)
        };

        let page_count = pinned.page_id().0 + 1;
        self.update_file_header(|header| header.page_count = header.page_count.max(page_count))?;
        debug!("allocated page {}", pinned.page_id());

        Ok(pinned)
    }

    /// Fail unless `pages` more pages can be allocated within the page budget.
    pub fn ensure_available(&self, pages: u32) -> StorageResult<()> {
        let table = self.inner.table.lock();
        self.check_budget(&table, pages)
    }

    pub fn mark_dirty(&self, page: &PinnedPage) {
        page.write().mark_dirty();
    }

    /// Write page `page_id` if it is cached and dirty.
    pub fn flush_page(&self, page_id: PageId) -> StorageResult<()> {
        let page = {
            let table = self.inner.table.lock();
            table.frames.get(&page_id).map(|frame| Arc::clone(&frame.page))
        };
        if let Some(page) = page {
            self.write_back(page_id, &page)?;
        }
        Ok(())
    }

    /// Write every dirty page, bumping the change counter first.
    pub fn flush_all(&self) -> StorageResult<()> {
        let mut pages: Vec<(PageId, Arc<RwLock<Page>>)> = {
            let table = self.inner.table.lock();
            table
                .frames
                .iter()
                .map(|(page_id, frame)| (*page_id, Arc::clone(&frame.page)))
                .collect()
        };
        pages.sort_by_key(|(page_id, _)| *page_id);

        if !pages.iter().any(|(_, page)| page.read().is_dirty()) {
            return Ok(());
        }

        self.update_file_header(|header| {
            header.change_counter = header.change_counter.wrapping_add(1);
            header.version_valid_for = header.change_counter;
        })?;

        let mut written = 0;
        for (page_id, page) in &pages {
            if self.write_back(*page_id, page)? {
                written += 1;
            }
        }
        debug!("flushed {} dirty pages", written);

        Ok(())
    }

    pub fn file_header(&self) -> StorageResult<FileHeader> {
        let root = self.get_page(ROOT_PAGE_ID)?;
        let page = root.read();
        let header = FileHeader::decode(page.data())?;
        Ok(header)
    }

    /// Apply `update` to the file header on page 0 and mark the page dirty.
    pub fn update_file_header<F>(&self, update: F) -> StorageResult<FileHeader>
    where
        F: FnOnce(&mut FileHeader),
    {
        let root = self.get_page(ROOT_PAGE_ID)?;
        let mut page = root.write();
        let mut header = FileHeader::decode(page.data())?;
        update(&mut header);
        header.encode(page.data_mut())?;
        page.mark_dirty();
        Ok(header)
    }

    pub fn page_size(&self) -> usize {
        self.inner.page_size
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn page_count(&self) -> u32 {
        self.inner.table.lock().page_count
    }

    pub fn cached_pages(&self) -> usize {
        self.inner.table.lock().frames.len()
    }

    pub fn is_cached(&self, page_id: PageId) -> bool {
        self.inner.table.lock().frames.contains_key(&page_id)
    }

    /// Dirty flag of a cached page; `None` if the page is not cached.
    pub fn is_dirty(&self, page_id: PageId) -> Option<bool> {
        let page = {
            let table = self.inner.table.lock();
            table.frames.get(&page_id).map(|frame| Arc::clone(&frame.page))
        };
        page.map(|page| page.read().is_dirty())
    }

    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let table = self.inner.table.lock();
        table.frames.get(&page_id).map(|frame| frame.pin_count)
    }

    fn pinned(&self, page_id: PageId, page: Arc<RwLock<Page>>) -> PinnedPage {
        PinnedPage {
            inner: Arc::clone(&self.inner),
            page_id,
            page,
        }
    }

    fn check_budget(&self, table: &PageTable, pages: u32) -> StorageResult<()> {
        if let Some(max_pages) = self.inner.max_pages {
            if table.page_count.saturating_add(pages) > max_pages {
                return Err(StorageError::PageLimitReached { max_pages });
            }
        }
        Ok(())
    }

    /// Evict until there is room for one more page. When every cached page is
    /// pinned the cache runs over capacity and is trimmed on a later miss.
    fn make_room(&self, table: &mut PageTable) -> StorageResult<()> {
        while table.frames.len() >= self.inner.capacity {
            if !self.evict_one(table)? {
                debug!(
                    "all {} cached pages are pinned, running over capacity {}",
                    table.frames.len(),
                    self.inner.capacity
                );
                break;
            }
        }
        Ok(())
    }

    /// Evict the least recently used unpinned page, writing it first if dirty.
    /// On a failed write the page stays cached and remains the oldest.
    fn evict_one(&self, table: &mut PageTable) -> StorageResult<bool> {
        let Some(victim) = table.replacer.evict() else {
            return Ok(false);
        };

        if let Some(frame) = table.frames.get(&victim) {
            let mut page = frame.page.write();
            if page.is_dirty() {
                if let Err(e) = self
                    .inner
                    .page_manager
                    .lock()
                    .write_page(victim, page.data())
                {
                    table.replacer.requeue(victim);
                    return Err(e);
                }
                page.clear_dirty();
            }
        }

        table.frames.remove(&victim);
        debug!("evicted page {}", victim);
        Ok(true)
    }

    fn write_back(&self, page_id: PageId, page: &RwLock<Page>) -> StorageResult<bool> {
        let mut page = page.write();
        if !page.is_dirty() {
            return Ok(false);
        }
        self.inner
            .page_manager
            .lock()
            .write_page(page_id, page.data())?;
        page.clear_dirty();
        Ok(true)
    }
}

/// A pinned page. The pager will not evict it while this handle lives.
pub struct PinnedPage {
    inner: Arc<PagerInner>,
    page_id: PageId,
    page: Arc<RwLock<Page>>,
}

impl PinnedPage {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write()
    }
}

impl Drop for PinnedPage {
    fn drop(&mut self) {
        self.inner.unpin(self.page_id);
    }
}
