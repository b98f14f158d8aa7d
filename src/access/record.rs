//! Fixed-width user records and their leaf-cell encoding.
//!
//! A leaf cell is `[payload_size:2][key:4][username:32][email:179]`, every
//! integer big-endian and every string NUL padded to its field width.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::node_page::KEY_SIZE;
use byteorder::{BigEndian, ByteOrder};
use std::fmt;

/// Monotonically increasing key assigned to each inserted record.
pub type RowId = u32;

pub const USERNAME_SIZE: usize = 32;
pub const EMAIL_SIZE: usize = 179;

const PAYLOAD_SIZE_FIELD: usize = 2;
pub const LEAF_KEY_OFFSET: usize = PAYLOAD_SIZE_FIELD;
const USERNAME_OFFSET: usize = LEAF_KEY_OFFSET + KEY_SIZE;
const EMAIL_OFFSET: usize = USERNAME_OFFSET + USERNAME_SIZE;

pub const LEAF_PAYLOAD_SIZE: usize = KEY_SIZE + USERNAME_SIZE + EMAIL_SIZE;
pub const LEAF_CELL_SIZE: usize = PAYLOAD_SIZE_FIELD + LEAF_PAYLOAD_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: RowId,
    pub username: String,
    pub email: String,
}

impl Record {
    /// Builds a record, truncating each field to its width on a UTF-8
    /// character boundary. Trailing NULs are dropped, since they read back
    /// as padding.
    pub fn new(key: RowId, username: &str, email: &str) -> Self {
        Self {
            key,
            username: truncate_field(username, USERNAME_SIZE).to_string(),
            email: truncate_field(email, EMAIL_SIZE).to_string(),
        }
    }

    pub fn to_cell(&self) -> [u8; LEAF_CELL_SIZE] {
        let mut cell = [0u8; LEAF_CELL_SIZE];
        BigEndian::write_u16(&mut cell, LEAF_PAYLOAD_SIZE as u16);
        BigEndian::write_u32(&mut cell[LEAF_KEY_OFFSET..], self.key);

        let username = truncate_field(&self.username, USERNAME_SIZE).as_bytes();
        cell[USERNAME_OFFSET..USERNAME_OFFSET + username.len()].copy_from_slice(username);
        let email = truncate_field(&self.email, EMAIL_SIZE).as_bytes();
        cell[EMAIL_OFFSET..EMAIL_OFFSET + email.len()].copy_from_slice(email);

        cell
    }

    pub fn from_cell(cell: &[u8]) -> StorageResult<Self> {
        if cell.len() < LEAF_CELL_SIZE {
            return Err(StorageError::Corrupted(format!(
                "leaf cell needs {} bytes, got {}",
                LEAF_CELL_SIZE,
                cell.len()
            )));
        }
        let payload_size = BigEndian::read_u16(cell) as usize;
        if payload_size != LEAF_PAYLOAD_SIZE {
            return Err(StorageError::Corrupted(format!(
                "unexpected leaf payload size {}",
                payload_size
            )));
        }

        Ok(Self {
            key: BigEndian::read_u32(&cell[LEAF_KEY_OFFSET..]),
            username: decode_field(&cell[USERNAME_OFFSET..EMAIL_OFFSET])?,
            email: decode_field(&cell[EMAIL_OFFSET..LEAF_CELL_SIZE])?,
        })
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Key: {}, Username: {}, Email: {}",
            self.key, self.username, self.email
        )
    }
}

fn truncate_field(value: &str, width: usize) -> &str {
    let mut end = value.len().min(width);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].trim_end_matches('\0')
}

fn decode_field(bytes: &[u8]) -> StorageResult<String> {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    String::from_utf8(bytes[..end].to_vec())
        .map_err(|e| StorageError::Corrupted(format!("field is not valid UTF-8: {}", e)))
}
