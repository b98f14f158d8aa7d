//! Storage layer error types.

use crate::storage::page::PageId;
use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Page overflow: page {page_id} requires {required} bytes but only {available} available")]
    PageOverflow {
        page_id: PageId,
        required: usize,
        available: usize,
    },

    #[error("Page limit reached: the file may hold at most {max_pages} pages")]
    PageLimitReached { max_pages: u32 },

    #[error("Invalid file header: {0}")]
    InvalidHeader(String),

    #[error("Corrupted page: {0}")]
    Corrupted(String),

    #[error("Page not found: {0}")]
    PageNotFound(PageId),

    #[error("Invalid slot {slot} on page {page_id} (cell count: {cell_count})")]
    InvalidSlot {
        page_id: PageId,
        slot: usize,
        cell_count: u16,
    },

    #[error("Duplicate key {key} on page {page_id}")]
    DuplicateKey { page_id: PageId, key: u32 },

    #[error("Row id space exhausted")]
    RowIdExhausted,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// True when an insert was rejected for lack of space and nothing was changed.
    pub fn is_overflow(&self) -> bool {
        matches!(
            self,
            StorageError::PageOverflow { .. } | StorageError::PageLimitReached { .. }
        )
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
