//! Byte-level storage: the key/value medium, its order-preserving key
//! encoding and snapshot-isolated transactions on top of it.

pub mod disk;
pub mod engine;
pub mod keycode;
pub mod memory;
pub mod mvcc;
