//! DocDB - An embedded, versioned document store in Rust
//!
//! This crate provides:
//! - Schemaless records in named tables, with secondary indexes
//! - Declared schema versions and forward migrations between them
//! - Declarative queries planned onto key, index or full scans
//! - MVCC transactions over per-table locks
//! - Pluggable storage engines (in-memory, append-only log file)

pub mod db;
pub mod error;
pub mod schema;
pub mod storage;
pub mod types;

pub use db::{Database, Scan, Table, Tx, TxTable, migration::State, query::Predicate};
pub use error::{Error, Result};
pub use schema::{SchemaRegistry, TableDef};
pub use types::{Record, Value};
