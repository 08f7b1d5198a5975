use std::ops::{Bound, RangeBounds};

use crate::error::Result;

/// Abstract key/value medium (byte-level operations)
///
/// Different from db::engine::Transaction which operates on tables and records.
pub trait Engine {
    type EngineIterator<'a>: EngineIterator
    where
        Self: 'a;

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()>;
    fn get(&mut self, key: Vec<u8>) -> Result<Option<Vec<u8>>>;
    fn delete(&mut self, key: Vec<u8>) -> Result<()>;
    fn scan(&mut self, range: impl RangeBounds<Vec<u8>>) -> Self::EngineIterator<'_>;

    /// Prefix scan using lexicographic ordering
    ///
    /// Converts prefix scan to range scan by incrementing the last byte that
    /// is not 0xff. For example, prefix "apple" becomes range ["apple", "applf").
    fn scan_prefix(&mut self, prefix: Vec<u8>) -> Self::EngineIterator<'_> {
        let start = Bound::Included(prefix.clone());
        let mut bound_prefix = prefix;
        while bound_prefix.last() == Some(&0xff) {
            bound_prefix.pop();
        }
        let end = match bound_prefix.last_mut() {
            Some(last) => {
                *last += 1;
                Bound::Excluded(bound_prefix)
            }
            None => Bound::Unbounded,
        };
        self.scan((start, end))
    }

    /// Makes previous writes durable, a no-op for volatile engines
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Storage engine iterator trait (supports reverse traversal)
pub trait EngineIterator: DoubleEndedIterator<Item = Result<(Vec<u8>, Vec<u8>)>> {}
