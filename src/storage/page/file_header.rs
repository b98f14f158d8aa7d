//! The 100-byte database header stored at the start of page 0.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use byteorder::{BigEndian, ByteOrder};

pub const FILE_HEADER_SIZE: usize = 100;
pub const MAGIC: &[u8; 16] = b"LeafDB format 1\0";

pub const WRITE_VERSION: u8 = 1;
pub const READ_VERSION: u8 = 1;
pub const SCHEMA_FORMAT: u32 = 4;
pub const TEXT_ENCODING_UTF8: u32 = 1;
pub const VERSION_NUMBER: u32 = 1_000;

const MAGIC_OFFSET: usize = 0;
const PAGE_SIZE_OFFSET: usize = 16;
const WRITE_VERSION_OFFSET: usize = 18;
const READ_VERSION_OFFSET: usize = 19;
const RESERVED_SPACE_OFFSET: usize = 20;
const MAX_PAYLOAD_FRACTION_OFFSET: usize = 21;
const MIN_PAYLOAD_FRACTION_OFFSET: usize = 22;
const LEAF_PAYLOAD_FRACTION_OFFSET: usize = 23;
const CHANGE_COUNTER_OFFSET: usize = 24;
const PAGE_COUNT_OFFSET: usize = 28;
const FREELIST_TRUNK_OFFSET: usize = 32;
const FREELIST_COUNT_OFFSET: usize = 36;
const SCHEMA_COOKIE_OFFSET: usize = 40;
const SCHEMA_FORMAT_OFFSET: usize = 44;
const DEFAULT_CACHE_SIZE_OFFSET: usize = 48;
const TEXT_ENCODING_OFFSET: usize = 52;
const USER_VERSION_OFFSET: usize = 56;
const APPLICATION_ID_OFFSET: usize = 60;
const NEXT_ROW_ID_OFFSET: usize = 64;
const RESERVED_OFFSET: usize = 68;
const VERSION_VALID_FOR_OFFSET: usize = 92;
const VERSION_NUMBER_OFFSET: usize = 96;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub page_size: u16,
    pub write_version: u8,
    pub read_version: u8,
    pub reserved_space: u8,
    pub max_payload_fraction: u8,
    pub min_payload_fraction: u8,
    pub leaf_payload_fraction: u8,
    pub change_counter: u32,
    pub page_count: u32,
    pub freelist_trunk: u32,
    pub freelist_count: u32,
    pub schema_cookie: u32,
    pub schema_format: u32,
    pub default_cache_size: u32,
    pub text_encoding: u32,
    pub user_version: u32,
    pub application_id: u32,
    /// Row id handed to the next insert; global across the whole tree.
    pub next_row_id: u32,
    pub version_valid_for: u32,
    pub version_number: u32,
}

impl FileHeader {
    /// Header for a freshly created file holding only the root page.
    pub fn new(page_size: usize, cache_size_hint: usize) -> Self {
        Self {
            page_size: page_size as u16,
            write_version: WRITE_VERSION,
            read_version: READ_VERSION,
            reserved_space: 0,
            max_payload_fraction: 64,
            min_payload_fraction: 32,
            leaf_payload_fraction: 32,
            change_counter: 0,
            page_count: 1,
            freelist_trunk: 0,
            freelist_count: 0,
            schema_cookie: 0,
            schema_format: SCHEMA_FORMAT,
            default_cache_size: cache_size_hint.min(u32::MAX as usize) as u32,
            text_encoding: TEXT_ENCODING_UTF8,
            user_version: 0,
            application_id: 0,
            next_row_id: 0,
            version_valid_for: 0,
            version_number: VERSION_NUMBER,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size as usize
    }

    /// True when the header area has never been written.
    pub fn is_blank(buf: &[u8]) -> bool {
        buf.len() < FILE_HEADER_SIZE || buf[..FILE_HEADER_SIZE].iter().all(|&b| b == 0)
    }

    pub fn decode(buf: &[u8]) -> StorageResult<Self> {
        if buf.len() < FILE_HEADER_SIZE {
            return Err(StorageError::InvalidHeader(format!(
                "header needs {} bytes, got {}",
                FILE_HEADER_SIZE,
                buf.len()
            )));
        }
        if &buf[MAGIC_OFFSET..MAGIC_OFFSET + MAGIC.len()] != MAGIC {
            return Err(StorageError::InvalidHeader("bad magic string".into()));
        }

        let read_version = buf[READ_VERSION_OFFSET];
        if read_version > READ_VERSION {
            return Err(StorageError::InvalidHeader(format!(
                "unsupported read version {}",
                read_version
            )));
        }

        let page_size = BigEndian::read_u16(&buf[PAGE_SIZE_OFFSET..]);
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&(page_size as usize)) {
            return Err(StorageError::InvalidHeader(format!(
                "declared page size {} out of range",
                page_size
            )));
        }

        Ok(Self {
            page_size,
            write_version: buf[WRITE_VERSION_OFFSET],
            read_version,
            reserved_space: buf[RESERVED_SPACE_OFFSET],
            max_payload_fraction: buf[MAX_PAYLOAD_FRACTION_OFFSET],
            min_payload_fraction: buf[MIN_PAYLOAD_FRACTION_OFFSET],
            leaf_payload_fraction: buf[LEAF_PAYLOAD_FRACTION_OFFSET],
            change_counter: BigEndian::read_u32(&buf[CHANGE_COUNTER_OFFSET..]),
            page_count: BigEndian::read_u32(&buf[PAGE_COUNT_OFFSET..]),
            freelist_trunk: BigEndian::read_u32(&buf[FREELIST_TRUNK_OFFSET..]),
            freelist_count: BigEndian::read_u32(&buf[FREELIST_COUNT_OFFSET..]),
            schema_cookie: BigEndian::read_u32(&buf[SCHEMA_COOKIE_OFFSET..]),
            schema_format: BigEndian::read_u32(&buf[SCHEMA_FORMAT_OFFSET..]),
            default_cache_size: BigEndian::read_u32(&buf[DEFAULT_CACHE_SIZE_OFFSET..]),
            text_encoding: BigEndian::read_u32(&buf[TEXT_ENCODING_OFFSET..]),
            user_version: BigEndian::read_u32(&buf[USER_VERSION_OFFSET..]),
            application_id: BigEndian::read_u32(&buf[APPLICATION_ID_OFFSET..]),
            next_row_id: BigEndian::read_u32(&buf[NEXT_ROW_ID_OFFSET..]),
            version_valid_for: BigEndian::read_u32(&buf[VERSION_VALID_FOR_OFFSET..]),
            version_number: BigEndian::read_u32(&buf[VERSION_NUMBER_OFFSET..]),
        })
    }

    /// Writes the header into the first 100 bytes of `buf`. Reserved bytes are zeroed.
    pub fn encode(&self, buf: &mut [u8]) -> StorageResult<()> {
        if buf.len() < FILE_HEADER_SIZE {
            return Err(StorageError::InvalidHeader(format!(
                "header needs {} bytes, got {}",
                FILE_HEADER_SIZE,
                buf.len()
            )));
        }

        buf[MAGIC_OFFSET..MAGIC_OFFSET + MAGIC.len()].copy_from_slice(MAGIC);
        BigEndian::write_u16(&mut buf[PAGE_SIZE_OFFSET..], self.page_size);
        buf[WRITE_VERSION_OFFSET] = self.write_version;
        buf[READ_VERSION_OFFSET] = self.read_version;
        buf[RESERVED_SPACE_OFFSET] = self.reserved_space;
        buf[MAX_PAYLOAD_FRACTION_OFFSET] = self.max_payload_fraction;
        buf[MIN_PAYLOAD_FRACTION_OFFSET] = self.min_payload_fraction;
        buf[LEAF_PAYLOAD_FRACTION_OFFSET] = self.leaf_payload_fraction;
        BigEndian::write_u32(&mut buf[CHANGE_COUNTER_OFFSET..], self.change_counter);
        BigEndian::write_u32(&mut buf[PAGE_COUNT_OFFSET..], self.page_count);
        BigEndian::write_u32(&mut buf[FREELIST_TRUNK_OFFSET..], self.freelist_trunk);
        BigEndian::write_u32(&mut buf[FREELIST_COUNT_OFFSET..], self.freelist_count);
        BigEndian::write_u32(&mut buf[SCHEMA_COOKIE_OFFSET..], self.schema_cookie);
        BigEndian::write_u32(&mut buf[SCHEMA_FORMAT_OFFSET..], self.schema_format);
        BigEndian::write_u32(&mut buf[DEFAULT_CACHE_SIZE_OFFSET..], self.default_cache_size);
        BigEndian::write_u32(&mut buf[TEXT_ENCODING_OFFSET..], self.text_encoding);
        BigEndian::write_u32(&mut buf[USER_VERSION_OFFSET..], self.user_version);
        BigEndian::write_u32(&mut buf[APPLICATION_ID_OFFSET..], self.application_id);
        BigEndian::write_u32(&mut buf[NEXT_ROW_ID_OFFSET..], self.next_row_id);
        buf[RESERVED_OFFSET..VERSION_VALID_FOR_OFFSET].fill(0);
        BigEndian::write_u32(&mut buf[VERSION_VALID_FOR_OFFSET..], self.version_valid_for);
        BigEndian::write_u32(&mut buf[VERSION_NUMBER_OFFSET..], self.version_number);

        Ok(())
    }
}
