//! Node header and slotted-array codec shared by leaf and internal pages.
//!
//! Layout of a node, starting at byte 100 on page 0 and byte 0 elsewhere:
//!
//! ```text
//! +-------------+------------------------+-------------+-------------------+
//! | node header | cell pointers (2 bytes) | free space  | cells (grow down) |
//! |  20 bytes   | sorted by key, grow up  |             |                   |
//! +-------------+------------------------+-------------+-------------------+
//! ```
//!
//! Leaf cells are full records (see [`Record`]); internal cells are
//! `[separator_key:4][child_pointer:4]`. An internal node routes keys smaller
//! than a separator to that separator's child and everything else to the
//! rightmost child kept in the header.

use crate::access::record::{Record, RowId, LEAF_CELL_SIZE, LEAF_KEY_OFFSET};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::file_header::FILE_HEADER_SIZE;
use crate::storage::page::{PageId, ROOT_PAGE_ID};
use byteorder::{BigEndian, ByteOrder};

pub const NODE_HEADER_SIZE: usize = 20;
pub const CELL_POINTER_SIZE: usize = 2;
pub const KEY_SIZE: usize = 4;
pub const INTERNAL_CELL_SIZE: usize = KEY_SIZE + 4;

const PAGE_NUMBER_OFFSET: usize = 0;
const FLAGS_OFFSET: usize = 4;
const CELL_COUNT_OFFSET: usize = 5;
const CELL_CONTENT_OFFSET: usize = 7;
const FREE_BYTES_OFFSET: usize = 9;
const RIGHT_POINTER_OFFSET: usize = 11;
const PREV_SIBLING_OFFSET: usize = 15;

const LEAF_FLAG: u8 = 0x01;
const INTERNAL_FLAG: u8 = 0x00;

/// Byte offset of the node header within a page.
pub fn node_offset(page_id: PageId) -> usize {
    if page_id == ROOT_PAGE_ID {
        FILE_HEADER_SIZE
    } else {
        0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    Internal,
}

impl NodeKind {
    pub fn cell_size(self) -> usize {
        match self {
            NodeKind::Leaf => LEAF_CELL_SIZE,
            NodeKind::Internal => INTERNAL_CELL_SIZE,
        }
    }

    fn flag(self) -> u8 {
        match self {
            NodeKind::Leaf => LEAF_FLAG,
            NodeKind::Internal => INTERNAL_FLAG,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    pub page_number: u32,
    pub kind: NodeKind,
    pub cell_count: u16,
    pub cell_content_offset: u16,
    pub free_bytes: u16,
    /// Next sibling on a leaf, rightmost child on an internal node. 0 means none.
    pub right_pointer: u32,
    /// Previous sibling on a leaf. 0 means none.
    pub prev_sibling: u32,
}

impl NodeHeader {
    pub fn decode(buf: &[u8]) -> StorageResult<Self> {
        if buf.len() < NODE_HEADER_SIZE {
            return Err(StorageError::Corrupted(format!(
                "node header needs {} bytes, got {}",
                NODE_HEADER_SIZE,
                buf.len()
            )));
        }
        let kind = match buf[FLAGS_OFFSET] {
            LEAF_FLAG => NodeKind::Leaf,
            INTERNAL_FLAG => NodeKind::Internal,
            other => {
                return Err(StorageError::Corrupted(format!(
                    "unknown node flags 0x{:02x}",
                    other
                )))
            }
        };

        Ok(Self {
            page_number: BigEndian::read_u32(&buf[PAGE_NUMBER_OFFSET..]),
            kind,
            cell_count: BigEndian::read_u16(&buf[CELL_COUNT_OFFSET..]),
            cell_content_offset: BigEndian::read_u16(&buf[CELL_CONTENT_OFFSET..]),
            free_bytes: BigEndian::read_u16(&buf[FREE_BYTES_OFFSET..]),
            right_pointer: BigEndian::read_u32(&buf[RIGHT_POINTER_OFFSET..]),
            prev_sibling: BigEndian::read_u32(&buf[PREV_SIBLING_OFFSET..]),
        })
    }

    pub fn encode(&self, buf: &mut [u8]) {
        BigEndian::write_u32(&mut buf[PAGE_NUMBER_OFFSET..], self.page_number);
        buf[FLAGS_OFFSET] = self.kind.flag();
        BigEndian::write_u16(&mut buf[CELL_COUNT_OFFSET..], self.cell_count);
        BigEndian::write_u16(&mut buf[CELL_CONTENT_OFFSET..], self.cell_content_offset);
        BigEndian::write_u16(&mut buf[FREE_BYTES_OFFSET..], self.free_bytes);
        BigEndian::write_u32(&mut buf[RIGHT_POINTER_OFFSET..], self.right_pointer);
        BigEndian::write_u32(&mut buf[PREV_SIBLING_OFFSET..], self.prev_sibling);
        buf[NODE_HEADER_SIZE - 1] = 0;
    }
}

/// Outcome of a key search over the pointer array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    Found(usize),
    NotFound(usize),
}

/// A view of the node stored in a page buffer.
pub struct NodePage<B> {
    page_id: PageId,
    base: usize,
    data: B,
}

impl<B: AsRef<[u8]>> NodePage<B> {
    pub fn new(page_id: PageId, data: B) -> Self {
        Self {
            page_id,
            base: node_offset(page_id),
            data,
        }
    }

    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn page_size(&self) -> usize {
        self.bytes().len()
    }

    fn pointer_array_start(&self) -> usize {
        self.base + NODE_HEADER_SIZE
    }

    /// A node whose header was never written has a zero content offset.
    pub fn is_uninitialized(&self) -> bool {
        let offset = self.base + CELL_CONTENT_OFFSET;
        BigEndian::read_u16(&self.bytes()[offset..]) == 0
    }

    pub fn header(&self) -> StorageResult<NodeHeader> {
        NodeHeader::decode(&self.bytes()[self.base..])
    }

    pub fn kind(&self) -> StorageResult<NodeKind> {
        Ok(self.header()?.kind)
    }

    pub fn is_leaf(&self) -> StorageResult<bool> {
        Ok(self.kind()? == NodeKind::Leaf)
    }

    pub fn cell_count(&self) -> StorageResult<usize> {
        Ok(self.header()?.cell_count as usize)
    }

    /// Total bytes occupied by cells, derived from the content offset.
    pub fn cell_content_bytes(&self) -> StorageResult<usize> {
        let header = self.header()?;
        Ok(self
            .page_size()
            .saturating_sub(header.cell_content_offset as usize))
    }

    /// Bytes between the end of the pointer array and the start of cell content.
    pub fn free_space(&self) -> StorageResult<usize> {
        let header = self.header()?;
        let pointer_end = self.pointer_array_start() + CELL_POINTER_SIZE * header.cell_count as usize;
        Ok((header.cell_content_offset as usize).saturating_sub(pointer_end))
    }

    /// Whether one more cell of `cell_size` bytes and its pointer fit.
    pub fn can_fit(&self, cell_size: usize) -> StorageResult<bool> {
        Ok(self.free_space()? >= cell_size + CELL_POINTER_SIZE)
    }

    pub fn cell_offset(&self, slot: usize) -> StorageResult<usize> {
        let header = self.header()?;
        if slot >= header.cell_count as usize {
            return Err(StorageError::InvalidSlot {
                page_id: self.page_id,
                slot,
                cell_count: header.cell_count,
            });
        }

        let pointer = self.pointer_array_start() + CELL_POINTER_SIZE * slot;
        let offset = BigEndian::read_u16(&self.bytes()[pointer..]) as usize;
        let cell_size = header.kind.cell_size();
        if offset < header.cell_content_offset as usize || offset + cell_size > self.page_size() {
            return Err(StorageError::Corrupted(format!(
                "cell {} on page {} points outside the content area (offset {})",
                slot, self.page_id, offset
            )));
        }
        Ok(offset)
    }

    fn cell_bytes(&self, slot: usize) -> StorageResult<&[u8]> {
        let offset = self.cell_offset(slot)?;
        let size = self.kind()?.cell_size();
        Ok(&self.bytes()[offset..offset + size])
    }

    pub fn key_at(&self, slot: usize) -> StorageResult<RowId> {
        let kind = self.kind()?;
        let cell = self.cell_bytes(slot)?;
        let key = match kind {
            NodeKind::Leaf => BigEndian::read_u32(&cell[LEAF_KEY_OFFSET..]),
            NodeKind::Internal => BigEndian::read_u32(cell),
        };
        Ok(key)
    }

    pub fn binary_search_key(&self, key: RowId) -> StorageResult<SearchResult> {
        let mut left = 0;
        let mut right = self.cell_count()?;

        while left < right {
            let mid = left + (right - left) / 2;
            let mid_key = self.key_at(mid)?;
            match mid_key.cmp(&key) {
                std::cmp::Ordering::Less => left = mid + 1,
                std::cmp::Ordering::Equal => return Ok(SearchResult::Found(mid)),
                std::cmp::Ordering::Greater => right = mid,
            }
        }

        Ok(SearchResult::NotFound(left))
    }

    pub fn read_cell(&self, slot: usize) -> StorageResult<Record> {
        self.expect_kind(NodeKind::Leaf)?;
        Record::from_cell(self.cell_bytes(slot)?)
    }

    pub fn records(&self) -> StorageResult<Vec<Record>> {
        (0..self.cell_count()?)
            .map(|slot| self.read_cell(slot))
            .collect()
    }

    /// Separator key and child of an internal cell.
    pub fn read_child(&self, slot: usize) -> StorageResult<(RowId, PageId)> {
        self.expect_kind(NodeKind::Internal)?;
        let cell = self.cell_bytes(slot)?;
        Ok((
            BigEndian::read_u32(cell),
            PageId(BigEndian::read_u32(&cell[KEY_SIZE..])),
        ))
    }

    /// All separator entries in key order, plus the rightmost child.
    pub fn children(&self) -> StorageResult<(Vec<(RowId, PageId)>, PageId)> {
        let entries = (0..self.cell_count()?)
            .map(|slot| self.read_child(slot))
            .collect::<StorageResult<Vec<_>>>()?;
        Ok((entries, self.rightmost_child()?))
    }

    pub fn rightmost_child(&self) -> StorageResult<PageId> {
        let header = self.header()?;
        self.expect_kind(NodeKind::Internal)?;
        if header.right_pointer == 0 {
            return Err(StorageError::Corrupted(format!(
                "internal page {} has no rightmost child",
                self.page_id
            )));
        }
        Ok(PageId(header.right_pointer))
    }

    pub fn leftmost_child(&self) -> StorageResult<PageId> {
        if self.cell_count()? > 0 {
            Ok(self.read_child(0)?.1)
        } else {
            self.rightmost_child()
        }
    }

    /// Child whose key range contains `key`.
    pub fn child_for(&self, key: RowId) -> StorageResult<PageId> {
        let index = match self.binary_search_key(key)? {
            SearchResult::Found(slot) => slot + 1,
            SearchResult::NotFound(slot) => slot,
        };
        if index < self.cell_count()? {
            Ok(self.read_child(index)?.1)
        } else {
            self.rightmost_child()
        }
    }

    pub fn next_sibling(&self) -> StorageResult<Option<PageId>> {
        let header = self.header()?;
        self.expect_kind(NodeKind::Leaf)?;
        Ok(non_zero(header.right_pointer))
    }

    pub fn prev_sibling(&self) -> StorageResult<Option<PageId>> {
        let header = self.header()?;
        self.expect_kind(NodeKind::Leaf)?;
        Ok(non_zero(header.prev_sibling))
    }

    fn expect_kind(&self, kind: NodeKind) -> StorageResult<()> {
        let actual = self.kind()?;
        if actual != kind {
            return Err(StorageError::Corrupted(format!(
                "page {} is {:?}, expected {:?}",
                self.page_id, actual, kind
            )));
        }
        Ok(())
    }

    /// Check the structural invariants of the node.
    pub fn validate(&self) -> StorageResult<()> {
        let header = self.header()?;
        if header.page_number != self.page_id.0 {
            return Err(StorageError::Corrupted(format!(
                "page {} records page number {}",
                self.page_id, header.page_number
            )));
        }

        let pointer_end = self.pointer_array_start() + CELL_POINTER_SIZE * header.cell_count as usize;
        let content = header.cell_content_offset as usize;
        if pointer_end > content || content > self.page_size() {
            return Err(StorageError::Corrupted(format!(
                "page {}: pointer array ends at {} but cell content starts at {}",
                self.page_id, pointer_end, content
            )));
        }
        if header.free_bytes as usize != content - pointer_end {
            return Err(StorageError::Corrupted(format!(
                "page {}: free byte count {} does not match layout",
                self.page_id, header.free_bytes
            )));
        }
        if header.kind == NodeKind::Internal && header.right_pointer == 0 {
            return Err(StorageError::Corrupted(format!(
                "internal page {} has no rightmost child",
                self.page_id
            )));
        }

        let mut prev_key: Option<RowId> = None;
        for slot in 0..header.cell_count as usize {
            let key = self.key_at(slot)?;
            if let Some(prev) = prev_key {
                if prev >= key {
                    return Err(StorageError::Corrupted(format!(
                        "page {}: keys not in ascending order at slot {}",
                        self.page_id, slot
                    )));
                }
            }
            prev_key = Some(key);
        }

        Ok(())
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> NodePage<B> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    /// Reset the node area to an empty node of `kind`. Bytes before the node
    /// header (the file header on page 0) are left untouched.
    pub fn init(&mut self, kind: NodeKind) {
        let base = self.base;
        let page_size = self.page_size();
        self.bytes_mut()[base..].fill(0);

        let header = NodeHeader {
            page_number: self.page_id.0,
            kind,
            cell_count: 0,
            cell_content_offset: page_size as u16,
            free_bytes: (page_size - base - NODE_HEADER_SIZE) as u16,
            right_pointer: 0,
            prev_sibling: 0,
        };
        self.set_header(&header);
    }

    pub fn set_header(&mut self, header: &NodeHeader) {
        let base = self.base;
        header.encode(&mut self.bytes_mut()[base..base + NODE_HEADER_SIZE]);
    }

    /// Place `cell` in the content area and its pointer at the sorted position
    /// for `key`. Nothing is written when the cell does not fit.
    pub fn insert_cell(&mut self, key: RowId, cell: &[u8]) -> StorageResult<usize> {
        let mut header = self.header()?;
        let count = header.cell_count as usize;
        let content = header.cell_content_offset as usize;
        let pointer_offset = self.pointer_array_start() + CELL_POINTER_SIZE * count;

        if content < cell.len() || content - cell.len() < pointer_offset + CELL_POINTER_SIZE {
            return Err(StorageError::PageOverflow {
                page_id: self.page_id,
                required: cell.len() + CELL_POINTER_SIZE,
                available: content.saturating_sub(pointer_offset),
            });
        }

        let slot = match self.binary_search_key(key)? {
            SearchResult::Found(_) => {
                return Err(StorageError::DuplicateKey {
                    page_id: self.page_id,
                    key,
                })
            }
            SearchResult::NotFound(slot) => slot,
        };

        let tuple_offset = content - cell.len();
        self.bytes_mut()[tuple_offset..content].copy_from_slice(cell);

        let slot_start = self.pointer_array_start() + CELL_POINTER_SIZE * slot;
        self.bytes_mut()
            .copy_within(slot_start..pointer_offset, slot_start + CELL_POINTER_SIZE);
        BigEndian::write_u16(&mut self.bytes_mut()[slot_start..], tuple_offset as u16);

        header.cell_count += 1;
        header.cell_content_offset = tuple_offset as u16;
        header.free_bytes = (tuple_offset - (pointer_offset + CELL_POINTER_SIZE)) as u16;
        self.set_header(&header);

        Ok(slot)
    }

    pub fn insert_record(&mut self, record: &Record) -> StorageResult<usize> {
        self.expect_kind(NodeKind::Leaf)?;
        self.insert_cell(record.key, &record.to_cell())
    }

    pub fn insert_child(&mut self, separator: RowId, child: PageId) -> StorageResult<usize> {
        self.expect_kind(NodeKind::Internal)?;
        let mut cell = [0u8; INTERNAL_CELL_SIZE];
        BigEndian::write_u32(&mut cell, separator);
        BigEndian::write_u32(&mut cell[KEY_SIZE..], child.0);
        self.insert_cell(separator, &cell)
    }

    pub fn set_next_sibling(&mut self, next: Option<PageId>) -> StorageResult<()> {
        self.expect_kind(NodeKind::Leaf)?;
        let mut header = self.header()?;
        header.right_pointer = next.map_or(0, |p| p.0);
        self.set_header(&header);
        Ok(())
    }

    pub fn set_prev_sibling(&mut self, prev: Option<PageId>) -> StorageResult<()> {
        self.expect_kind(NodeKind::Leaf)?;
        let mut header = self.header()?;
        header.prev_sibling = prev.map_or(0, |p| p.0);
        self.set_header(&header);
        Ok(())
    }

    pub fn set_rightmost_child(&mut self, child: PageId) -> StorageResult<()> {
        self.expect_kind(NodeKind::Internal)?;
        let mut header = self.header()?;
        header.right_pointer = child.0;
        self.set_header(&header);
        Ok(())
    }

    /// Repoint whichever entry references `from` (a cell or the rightmost
    /// child) to `to`.
    pub fn redirect_child(&mut self, from: PageId, to: PageId) -> StorageResult<()> {
        if self.rightmost_child()? == from {
            return self.set_rightmost_child(to);
        }
        for slot in 0..self.cell_count()? {
            if self.read_child(slot)?.1 == from {
                let offset = self.cell_offset(slot)?;
                BigEndian::write_u32(&mut self.bytes_mut()[offset + KEY_SIZE..], to.0);
                return Ok(());
            }
        }
        Err(StorageError::Corrupted(format!(
            "internal page {} has no entry for child {}",
            self.page_id, from
        )))
    }
}

fn non_zero(pointer: u32) -> Option<PageId> {
    if pointer == 0 {
        None
    } else {
        Some(PageId(pointer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::record::{EMAIL_SIZE, USERNAME_SIZE};
    use crate::storage::page::DEFAULT_PAGE_SIZE;
    use proptest::prelude::*;

    fn leaf(page_id: PageId, page_size: usize) -> Vec<u8> {
        let mut data = vec![0u8; page_size];
        NodePage::new(page_id, &mut data[..]).init(NodeKind::Leaf);
        data
    }

    fn record(key: RowId) -> Record {
        Record::new(key, &format!("user{}", key), &format!("user{}@example.com", key))
    }

    #[test]
    fn test_header_encoding() -> StorageResult<()> {
        let header = NodeHeader {
            page_number: 9,
            kind: NodeKind::Internal,
            cell_count: 3,
            cell_content_offset: 4000,
            free_bytes: 3954,
            right_pointer: 12,
            prev_sibling: 0,
        };
        let mut buf = [0u8; NODE_HEADER_SIZE];
        header.encode(&mut buf);

        assert_eq!(&buf[0..4], &[0, 0, 0, 9]);
        assert_eq!(buf[4], 0x00);
        assert_eq!(&buf[5..7], &[0, 3]);
        assert_eq!(NodeHeader::decode(&buf)?, header);
        Ok(())
    }

    #[test]
    fn test_unknown_flags_rejected() {
        let mut buf = [0u8; NODE_HEADER_SIZE];
        buf[FLAGS_OFFSET] = 0x7f;
        assert!(matches!(
            NodeHeader::decode(&buf),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn test_init_root_leaves_file_header_alone() -> StorageResult<()> {
        let mut data = vec![0xAAu8; DEFAULT_PAGE_SIZE];
        let mut node = NodePage::new(ROOT_PAGE_ID, &mut data[..]);
        node.init(NodeKind::Leaf);

        let header = node.header()?;
        assert_eq!(header.page_number, 0);
        assert_eq!(header.kind, NodeKind::Leaf);
        assert_eq!(header.cell_content_offset as usize, DEFAULT_PAGE_SIZE);
        assert_eq!(
            header.free_bytes as usize,
            DEFAULT_PAGE_SIZE - FILE_HEADER_SIZE - NODE_HEADER_SIZE
        );
        node.validate()?;
        assert!(data[..FILE_HEADER_SIZE].iter().all(|&b| b == 0xAA));
        Ok(())
    }

    #[test]
    fn test_insert_and_read_cells() -> StorageResult<()> {
        let mut data = leaf(PageId(3), DEFAULT_PAGE_SIZE);
        let mut node = NodePage::new(PageId(3), &mut data[..]);

        for key in 0..5 {
            assert_eq!(node.insert_record(&record(key))?, key as usize);
        }

        assert_eq!(node.cell_count()?, 5);
        assert_eq!(node.read_cell(2)?, record(2));
        assert_eq!(node.cell_content_bytes()?, 5 * LEAF_CELL_SIZE);
        assert_eq!(
            node.cell_offset(0)?,
            DEFAULT_PAGE_SIZE - LEAF_CELL_SIZE,
            "first cell sits at the end of the page"
        );
        node.validate()?;
        Ok(())
    }

    #[test]
    fn test_out_of_order_insert_keeps_pointer_array_sorted() -> StorageResult<()> {
        let mut data = leaf(PageId(1), DEFAULT_PAGE_SIZE);
        let mut node = NodePage::new(PageId(1), &mut data[..]);

        for key in [5, 1, 9, 3] {
            node.insert_record(&record(key))?;
        }

        let keys: Vec<_> = node.records()?.into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec![1, 3, 5, 9]);
        node.validate()?;
        Ok(())
    }

    #[test]
    fn test_duplicate_key_rejected() -> StorageResult<()> {
        let mut data = leaf(PageId(1), DEFAULT_PAGE_SIZE);
        let mut node = NodePage::new(PageId(1), &mut data[..]);
        node.insert_record(&record(4))?;
        assert!(matches!(
            node.insert_record(&record(4)),
            Err(StorageError::DuplicateKey { key: 4, .. })
        ));
        assert_eq!(node.cell_count()?, 1);
        Ok(())
    }

    #[test]
    fn test_overflow_leaves_page_untouched() -> StorageResult<()> {
        let mut data = leaf(ROOT_PAGE_ID, DEFAULT_PAGE_SIZE);
        let capacity = (DEFAULT_PAGE_SIZE - FILE_HEADER_SIZE - NODE_HEADER_SIZE)
            / (LEAF_CELL_SIZE + CELL_POINTER_SIZE);

        {
            let mut node = NodePage::new(ROOT_PAGE_ID, &mut data[..]);
            for key in 0..capacity as u32 {
                node.insert_record(&record(key))?;
            }
        }
        let before = data.clone();

        let mut node = NodePage::new(ROOT_PAGE_ID, &mut data[..]);
        let err = node.insert_record(&record(capacity as u32)).unwrap_err();
        assert!(err.is_overflow());
        drop(node);
        assert_eq!(data, before);
        Ok(())
    }

    #[test]
    fn test_binary_search() -> StorageResult<()> {
        let mut data = leaf(PageId(2), DEFAULT_PAGE_SIZE);
        let mut node = NodePage::new(PageId(2), &mut data[..]);
        for key in [10, 20, 30] {
            node.insert_record(&record(key))?;
        }

        assert_eq!(node.binary_search_key(20)?, SearchResult::Found(1));
        assert_eq!(node.binary_search_key(5)?, SearchResult::NotFound(0));
        assert_eq!(node.binary_search_key(25)?, SearchResult::NotFound(2));
        assert_eq!(node.binary_search_key(99)?, SearchResult::NotFound(3));
        Ok(())
    }

    #[test]
    fn test_empty_search() -> StorageResult<()> {
        let data = leaf(PageId(2), DEFAULT_PAGE_SIZE);
        let node = NodePage::new(PageId(2), &data[..]);
        assert_eq!(node.binary_search_key(0)?, SearchResult::NotFound(0));
        Ok(())
    }

    #[test]
    fn test_invalid_slot() {
        let data = leaf(PageId(2), DEFAULT_PAGE_SIZE);
        let node = NodePage::new(PageId(2), &data[..]);
        assert!(matches!(
            node.read_cell(0),
            Err(StorageError::InvalidSlot { slot: 0, .. })
        ));
    }

    #[test]
    fn test_internal_routing() -> StorageResult<()> {
        let mut data = vec![0u8; DEFAULT_PAGE_SIZE];
        let mut node = NodePage::new(PageId(5), &mut data[..]);
        node.init(NodeKind::Internal);
        node.insert_child(10, PageId(1))?;
        node.insert_child(20, PageId(2))?;
        node.set_rightmost_child(PageId(3))?;
        node.validate()?;

        assert_eq!(node.child_for(0)?, PageId(1));
        assert_eq!(node.child_for(9)?, PageId(1));
        assert_eq!(node.child_for(10)?, PageId(2));
        assert_eq!(node.child_for(19)?, PageId(2));
        assert_eq!(node.child_for(20)?, PageId(3));
        assert_eq!(node.child_for(1000)?, PageId(3));
        assert_eq!(node.leftmost_child()?, PageId(1));
        Ok(())
    }

    #[test]
    fn test_redirect_child() -> StorageResult<()> {
        let mut data = vec![0u8; DEFAULT_PAGE_SIZE];
        let mut node = NodePage::new(PageId(5), &mut data[..]);
        node.init(NodeKind::Internal);
        node.insert_child(10, PageId(1))?;
        node.set_rightmost_child(PageId(2))?;

        node.redirect_child(PageId(1), PageId(7))?;
        node.redirect_child(PageId(2), PageId(8))?;
        let (entries, rightmost) = node.children()?;
        assert_eq!(entries, vec![(10, PageId(7))]);
        assert_eq!(rightmost, PageId(8));

        assert!(node.redirect_child(PageId(42), PageId(1)).is_err());
        Ok(())
    }

    #[test]
    fn test_sibling_pointers() -> StorageResult<()> {
        let mut data = leaf(PageId(4), DEFAULT_PAGE_SIZE);
        let mut node = NodePage::new(PageId(4), &mut data[..]);
        assert_eq!(node.next_sibling()?, None);
        assert_eq!(node.prev_sibling()?, None);

        node.set_next_sibling(Some(PageId(6)))?;
        node.set_prev_sibling(Some(PageId(2)))?;
        assert_eq!(node.next_sibling()?, Some(PageId(6)));
        assert_eq!(node.prev_sibling()?, Some(PageId(2)));

        node.set_next_sibling(None)?;
        assert_eq!(node.next_sibling()?, None);
        Ok(())
    }

    #[test]
    fn test_kind_mismatch_is_reported() {
        let mut data = leaf(PageId(4), DEFAULT_PAGE_SIZE);
        let mut node = NodePage::new(PageId(4), &mut data[..]);
        assert!(node.insert_child(1, PageId(2)).is_err());
        assert!(node.rightmost_child().is_err());
    }

    #[test]
    fn test_validate_detects_bad_pointer() {
        let mut data = leaf(PageId(1), DEFAULT_PAGE_SIZE);
        NodePage::new(PageId(1), &mut data[..])
            .insert_record(&record(1))
            .unwrap();
        // Point the first cell into the pointer array.
        data[NODE_HEADER_SIZE] = 0;
        data[NODE_HEADER_SIZE + 1] = 4;
        assert!(NodePage::new(PageId(1), &data[..]).validate().is_err());
    }

    #[test]
    fn test_validate_detects_wrong_page_number() {
        let data = leaf(PageId(1), DEFAULT_PAGE_SIZE);
        assert!(NodePage::new(PageId(2), &data[..]).validate().is_err());
    }

    fn field(max: usize) -> impl Strategy<Value = String> {
        proptest::string::string_regex(&format!("[a-zA-Z0-9@._-]{{0,{}}}", max)).unwrap()
    }

    /// Slots in the order their cells were placed: content grows down, so the
    /// highest offset was written first.
    fn placement_order<B: AsRef<[u8]>>(node: &NodePage<B>) -> Vec<usize> {
        let mut slots: Vec<usize> = (0..node.cell_count().unwrap()).collect();
        slots.sort_by_key(|&slot| std::cmp::Reverse(node.cell_offset(slot).unwrap()));
        slots
    }

    fn shuffled_rows() -> impl Strategy<Value = (Vec<(String, String)>, Vec<RowId>)> {
        proptest::collection::vec((field(USERNAME_SIZE), field(EMAIL_SIZE)), 0..17).prop_flat_map(
            |rows| {
                let keys: Vec<RowId> = (0..rows.len() as RowId).map(|k| k * 7 + 1).collect();
                (Just(rows), Just(keys).prop_shuffle())
            },
        )
    }

    fn shuffled_children() -> impl Strategy<Value = Vec<(RowId, u32)>> {
        proptest::collection::btree_map(any::<RowId>(), 1u32..10_000, 0..300)
            .prop_flat_map(|entries| Just(entries.into_iter().collect::<Vec<_>>()).prop_shuffle())
    }

    proptest! {
        #[test]
        fn leaf_bytes_survive_decode_encode(
            (rows, keys) in shuffled_rows(),
            is_root in any::<bool>(),
        ) {
            let page_id = if is_root { ROOT_PAGE_ID } else { PageId(3) };
            let mut data = leaf(page_id, DEFAULT_PAGE_SIZE);
            {
                let mut node = NodePage::new(page_id, &mut data[..]);
                for (&key, (username, email)) in keys.iter().zip(rows.iter()) {
                    node.insert_record(&Record::new(key, username, email)).unwrap();
                }
            }

            // Decode everything, then encode it into a fresh buffer.
            let node = NodePage::new(page_id, &data[..]);
            node.validate().unwrap();
            let header = node.header().unwrap();
            let records = node.records().unwrap();
            let mut expected: Vec<Record> = keys
                .iter()
                .zip(rows.iter())
                .map(|(&key, (username, email))| Record::new(key, username, email))
                .collect();
            expected.sort_by_key(|r| r.key);
            prop_assert_eq!(&records, &expected);

            let mut rebuilt = vec![0u8; DEFAULT_PAGE_SIZE];
            rebuilt[..node_offset(page_id)].copy_from_slice(&data[..node_offset(page_id)]);
            let mut copy = NodePage::new(page_id, &mut rebuilt[..]);
            copy.init(NodeKind::Leaf);
            for slot in placement_order(&node) {
                copy.insert_record(&records[slot]).unwrap();
            }
            prop_assert_eq!(copy.header().unwrap(), header);
            prop_assert_eq!(&rebuilt, &data);
        }

        #[test]
        fn internal_bytes_survive_decode_encode(
            entries in shuffled_children(),
            rightmost in 1u32..10_000,
            is_root in any::<bool>(),
        ) {
            let page_id = if is_root { ROOT_PAGE_ID } else { PageId(3) };
            let mut data = vec![0u8; DEFAULT_PAGE_SIZE];
            {
                let mut node = NodePage::new(page_id, &mut data[..]);
                node.init(NodeKind::Internal);
                for &(separator, child) in &entries {
                    node.insert_child(separator, PageId(child)).unwrap();
                }
                node.set_rightmost_child(PageId(rightmost)).unwrap();
            }

            let node = NodePage::new(page_id, &data[..]);
            node.validate().unwrap();
            let header = node.header().unwrap();
            let (children, last) = node.children().unwrap();
            let mut expected = entries
                .iter()
                .map(|&(separator, child)| (separator, PageId(child)))
                .collect::<Vec<_>>();
            expected.sort_by_key(|&(separator, _)| separator);
            prop_assert_eq!(&children, &expected);
            prop_assert_eq!(last, PageId(rightmost));

            let mut rebuilt = vec![0u8; DEFAULT_PAGE_SIZE];
            let mut copy = NodePage::new(page_id, &mut rebuilt[..]);
            copy.init(NodeKind::Internal);
            for slot in placement_order(&node) {
                let (separator, child) = children[slot];
                copy.insert_child(separator, child).unwrap();
            }
            copy.set_rightmost_child(last).unwrap();
            prop_assert_eq!(copy.header().unwrap(), header);
            prop_assert_eq!(&rebuilt, &data);
        }
    }
}
