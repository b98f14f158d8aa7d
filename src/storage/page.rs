//! In-memory page representation and the on-page codecs.
//!
//! A page is a fixed-size byte buffer addressed by its [`PageId`]. Page 0 carries
//! the 100-byte [`FileHeader`] followed by the root node; every other page starts
//! directly with a node header. The node body is a slotted array handled by
//! [`NodePage`].

pub mod file_header;
pub mod node_page;

use std::fmt;

pub use file_header::{FileHeader, FILE_HEADER_SIZE};
pub use node_page::{NodeHeader, NodeKind, NodePage, SearchResult, NODE_HEADER_SIZE};

pub const DEFAULT_PAGE_SIZE: usize = 4096;
pub const MIN_PAGE_SIZE: usize = 1024;
pub const MAX_PAGE_SIZE: usize = 32768;

/// The root of the tree always lives on page 0.
pub const ROOT_PAGE_ID: PageId = PageId(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u32);

impl PageId {
    pub fn is_root(self) -> bool {
        self == ROOT_PAGE_ID
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A cached page: its bytes plus the dirty flag the pager flushes on.
#[derive(Debug)]
pub struct Page {
    page_id: PageId,
    data: Box<[u8]>,
    dirty: bool,
}

impl Page {
    /// A zero-filled page.
    pub fn new(page_id: PageId, page_size: usize) -> Self {
        Self {
            page_id,
            data: vec![0u8; page_size].into_boxed_slice(),
            dirty: false,
        }
    }

    pub fn from_bytes(page_id: PageId, data: Box<[u8]>) -> Self {
        Self {
            page_id,
            data,
            dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Read-only view of the node stored on this page.
    pub fn node(&self) -> NodePage<&[u8]> {
        NodePage::new(self.page_id, &self.data[..])
    }

    /// Mutable view of the node stored on this page.
    pub fn node_mut(&mut self) -> NodePage<&mut [u8]> {
        NodePage::new(self.page_id, &mut self.data[..])
    }
}
