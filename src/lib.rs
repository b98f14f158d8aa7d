pub mod access;
pub mod config;
pub mod database;
pub mod shell;
pub mod storage;
