//! Database configuration.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE};

pub const DEFAULT_CACHE_CAPACITY: usize = 500;

/// Options controlling page size, caching and durability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    /// Size of each page in bytes. Only used when creating a file; an existing
    /// file keeps the page size recorded in its header.
    pub page_size: usize,
    /// Number of pages the pager keeps in memory.
    pub cache_capacity: usize,
    /// Upper bound on the number of pages in the file. `None` means unbounded.
    pub max_pages: Option<u32>,
    /// Whether every page write is followed by `sync_data`.
    pub sync_writes: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            max_pages: None,
            sync_writes: true,
        }
    }
}

impl DbConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity;
        self
    }

    pub fn with_max_pages(mut self, max_pages: Option<u32>) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    pub fn validate(&self) -> StorageResult<()> {
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(StorageError::InvalidConfig(format!(
                "page size {} must be between {} and {}",
                self.page_size, MIN_PAGE_SIZE, MAX_PAGE_SIZE
            )));
        }
        if self.cache_capacity == 0 {
            return Err(StorageError::InvalidConfig(
                "cache capacity must be at least 1".into(),
            ));
        }
        if self.max_pages == Some(0) {
            return Err(StorageError::InvalidConfig(
                "max pages must leave room for the root page".into(),
            ));
        }
        Ok(())
    }
}
