//! Access layer: records and the B+tree that orders them.
//!
//! - **Record**: fixed-width user row and its leaf-cell encoding
//! - **BTree**: insert with split-on-overflow, point lookup and ordered scans

pub mod btree;
pub mod record;

pub use btree::{BTree, BTreeScan};
pub use record::{Record, RowId};
