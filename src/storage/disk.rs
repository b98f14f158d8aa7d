//! Raw page I/O against the database file.

pub mod page_manager;

pub use page_manager::PageManager;
