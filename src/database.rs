use crate::access::{BTree, BTreeScan, Record, RowId};
use crate::config::DbConfig;
use crate::storage::disk::PageManager;
use crate::storage::error::StorageResult;
use crate::storage::pager::Pager;
use log::{info, warn};
use std::path::{Path, PathBuf};

/// High-level database interface over a single file
pub struct Database {
    btree: BTree,
    path: PathBuf,
}

impl Database {
    /// Open the database at `path` with default settings, creating the file
    /// if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::open_with_config(path, DbConfig::default())
    }

    pub fn open_with_config(path: impl AsRef<Path>, config: DbConfig) -> StorageResult<Self> {
        config.validate()?;
        let path = path.as_ref();

        // An existing file keeps the page size it was created with.
        let page_size = match PageManager::read_file_header(path)? {
            Some(header) => {
                if header.page_size() != config.page_size {
                    warn!(
                        "{} was created with page size {}, ignoring configured {}",
                        path.display(),
                        header.page_size(),
                        config.page_size
                    );
                }
                header.page_size()
            }
            None => config.page_size,
        };

        let page_manager =
            PageManager::open_or_create(path, page_size)?.with_sync_writes(config.sync_writes);
        let pager = Pager::open(page_manager, &config)?;
        let btree = BTree::open(pager)?;

        info!(
            "opened {} ({} pages of {} bytes)",
            path.display(),
            btree.pager().page_count(),
            page_size
        );

        Ok(Self {
            btree,
            path: path.to_path_buf(),
        })
    }

    /// Insert a record under the next row id.
    pub fn insert(&mut self, username: &str, email: &str) -> StorageResult<Record> {
        self.btree.insert(username, email)
    }

    pub fn lookup(&self, key: RowId) -> StorageResult<Option<Record>> {
        self.btree.lookup(key)
    }

    pub fn scan(&self) -> StorageResult<BTreeScan> {
        self.btree.scan()
    }

    /// Every record in key order.
    pub fn select_all(&self) -> StorageResult<Vec<Record>> {
        self.btree.scan()?.collect()
    }

    pub fn height(&self) -> StorageResult<usize> {
        self.btree.height()
    }

    /// Check the structure of the whole tree.
    pub fn verify(&self) -> StorageResult<()> {
        self.btree.verify()
    }

    /// Flush all dirty pages to disk
    pub fn flush(&self) -> StorageResult<()> {
        self.btree.pager().flush_all()?;
        info!("flushed {}", self.path.display());
        Ok(())
    }

    /// Flush and close, reporting any write failure.
    pub fn close(self) -> StorageResult<()> {
        self.flush()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pager(&self) -> &Pager {
        self.btree.pager()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        // Best effort flush on drop
        if let Err(e) = self.btree.pager().flush_all() {
            warn!("failed to flush {} on drop: {}", self.path.display(), e);
        }
    }
}
