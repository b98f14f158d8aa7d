//! Storage layer for leafdb.
//!
//! Everything below the tree lives here:
//!
//! - **PageManager**: reads and writes whole pages of the database file, no caching
//! - **Pager**: buffer pool mapping page numbers to cached pages, with LRU eviction
//!   and dirty tracking
//! - **FileHeader / NodePage**: byte-exact codecs for the file header on page 0 and
//!   the slotted node layout shared by every page
//!
//! There is no write-ahead log: a page is durable once the pager has flushed it.

pub mod disk;
pub mod error;
pub mod page;
pub mod pager;

pub use disk::PageManager;
pub use error::{StorageError, StorageResult};
pub use page::{Page, PageId, DEFAULT_PAGE_SIZE, ROOT_PAGE_ID};
pub use pager::{Pager, PinnedPage};
