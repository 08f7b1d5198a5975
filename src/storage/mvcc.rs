use std::{
    collections::{BTreeMap, HashSet},
    ops::Bound,
    sync::{Arc, Mutex, MutexGuard},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    storage::{
        engine::Engine,
        keycode::{deserialize_key, serialize_key},
    },
};

/// Transaction version number type
pub type Version = u64;

/// Snapshot-isolated transactions over a key/value medium
///
/// Every write is stored under `(key, version)`; a transaction sees the
/// latest version that was committed before it began, plus its own writes.
pub struct Mvcc<E: Engine> {
    engine: Arc<Mutex<E>>,
}

impl<E: Engine> Clone for Mvcc<E> {
    fn clone(&self) -> Self {
        Self { engine: self.engine.clone() }
    }
}

impl<E: Engine> Mvcc<E> {
    /// Wraps the medium, rolling back transactions a previous process left active
    pub fn new(eng: E) -> Result<Self> {
        let engine = Arc::new(Mutex::new(eng));
        {
            let mut guard = engine.lock()?;
            let abandoned = MvccTransaction::scan_active(&mut guard)?;
            for version in abandoned {
                warn!(version, "rolling back abandoned transaction");
                MvccTransaction::rollback_version(&mut guard, version)?;
            }
        }
        Ok(Self { engine })
    }

    pub fn begin(&self) -> Result<MvccTransaction<E>> {
        MvccTransaction::begin(self.engine.clone())
    }

    /// Flushes the underlying medium
    pub fn flush(&self) -> Result<()> {
        self.engine.lock()?.flush()
    }
}

/// MVCC transaction
pub struct MvccTransaction<E: Engine> {
    engine: Arc<Mutex<E>>,
    state: TransactionState,
}

/// Transaction state for MVCC visibility checks
pub struct TransactionState {
    pub version: Version,
    pub active_versions: HashSet<Version>,
}

impl TransactionState {
    fn is_visible(&self, version: Version) -> bool {
        if self.active_versions.contains(&version) {
            return false;
        }
        version <= self.version
    }
}

/// MVCC key types for storage operations
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub enum MvccKey {
    /// Next version counter
    NextVersion,
    /// Active transaction marker
    TxnActive(Version),
    /// Write set entry for rollback
    TxnWrite(Version, #[serde(with = "serde_bytes")] Vec<u8>),
    /// Versioned data key
    Version(#[serde(with = "serde_bytes")] Vec<u8>, Version),
}

impl MvccKey {
    /// Serializes the key to bytes for storage
    pub fn encode(&self) -> Result<Vec<u8>> {
        serialize_key(&self)
    }

    /// Deserializes bytes back to a key
    pub fn decode(data: Vec<u8>) -> Result<Self> {
        deserialize_key(&data)
    }
}

/// MVCC key prefix types for prefix scanning
///
/// Variant indices line up with [`MvccKey`], so an encoded prefix is a byte
/// prefix of every key it covers.
#[derive(Debug, Serialize, Deserialize)]
pub enum MvccKeyPrefix {
    NextVersion,
    TxnActive,
    TxnWrite(Version),
    Version(#[serde(with = "serde_bytes")] Vec<u8>),
}

impl MvccKeyPrefix {
    pub fn encode(&self) -> Result<Vec<u8>> {
        serialize_key(&self)
    }
}

fn unexpected_key(key: Vec<u8>) -> Error {
    Error::Internal(format!("unexpected key: {:?}", String::from_utf8_lossy(&key)))
}

impl<E: Engine> MvccTransaction<E> {
    /// Begins a new transaction
    pub fn begin(eng: Arc<Mutex<E>>) -> Result<Self> {
        let mut engine = eng.lock()?;

        let next_version = match engine.get(MvccKey::NextVersion.encode()?)? {
            Some(value) => bincode::deserialize(&value)?,
            None => 1,
        };

        engine.set(
            MvccKey::NextVersion.encode()?,
            bincode::serialize(&(next_version + 1))?,
        )?;

        let active_versions = Self::scan_active(&mut engine)?;

        engine.set(MvccKey::TxnActive(next_version).encode()?, vec![])?;
        debug!(version = next_version, active = active_versions.len(), "begin transaction");

        Ok(Self {
            engine: eng.clone(),
            state: TransactionState {
                version: next_version,
                active_versions,
            },
        })
    }

    pub fn version(&self) -> Version {
        self.state.version
    }

    /// Commits the transaction: drops the write set and the active marker,
    /// which makes every write visible at once
    pub fn commit(&self) -> Result<()> {
        let mut engine = self.engine.lock()?;

        let mut delete_keys = Vec::new();
        let mut iter = engine.scan_prefix(MvccKeyPrefix::TxnWrite(self.state.version).encode()?);
        while let Some((key, _)) = iter.next().transpose()? {
            delete_keys.push(key);
        }
        drop(iter);

        for key in delete_keys.into_iter() {
            engine.delete(key)?;
        }

        engine.delete(MvccKey::TxnActive(self.state.version).encode()?)?;
        engine.flush()?;
        debug!(version = self.state.version, "commit transaction");
        Ok(())
    }

    /// Rolls back the transaction (deletes all data and metadata)
    pub fn rollback(&self) -> Result<()> {
        let mut engine = self.engine.lock()?;
        Self::rollback_version(&mut engine, self.state.version)?;
        debug!(version = self.state.version, "rollback transaction");
        Ok(())
    }

    fn rollback_version(engine: &mut MutexGuard<E>, version: Version) -> Result<()> {
        let mut delete_keys = Vec::new();

        let mut iter = engine.scan_prefix(MvccKeyPrefix::TxnWrite(version).encode()?);
        while let Some((key, _)) = iter.next().transpose()? {
            match MvccKey::decode(key.clone())? {
                MvccKey::TxnWrite(_, raw_key) => {
                    delete_keys.push(MvccKey::Version(raw_key, version).encode()?);
                }
                _ => return Err(unexpected_key(key)),
            }
            delete_keys.push(key);
        }
        drop(iter);

        for key in delete_keys.into_iter() {
            engine.delete(key)?;
        }

        engine.delete(MvccKey::TxnActive(version).encode()?)
    }

    pub fn set(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.write_inner(key, Some(value))
    }

    pub fn delete(&self, key: Vec<u8>) -> Result<()> {
        self.write_inner(key, None)
    }

    /// Gets the value for a key respecting MVCC visibility
    pub fn get(&self, key: Vec<u8>) -> Result<Option<Vec<u8>>> {
        let mut engine = self.engine.lock()?;

        let from = MvccKey::Version(key.clone(), 0).encode()?;
        let to = MvccKey::Version(key.clone(), self.state.version).encode()?;
        let mut iter = engine.scan(from..=to).rev();

        while let Some((key, value)) = iter.next().transpose()? {
            match MvccKey::decode(key.clone())? {
                MvccKey::Version(_, version) => {
                    if self.state.is_visible(version) {
                        return Ok(bincode::deserialize(&value)?);
                    }
                }
                _ => return Err(unexpected_key(key)),
            }
        }
        Ok(None)
    }

    /// Scans keys with prefix, returning latest visible version per key
    pub fn scan_prefix(&self, prefix: Vec<u8>) -> Result<Vec<ScanResult>> {
        let mut enc_prefix = MvccKeyPrefix::Version(prefix).encode()?;
        // Drop the string terminator so the prefix matches longer keys.
        enc_prefix.truncate(enc_prefix.len() - 2);

        let mut eng = self.engine.lock()?;
        let iter = eng.scan_prefix(enc_prefix);
        self.collect_visible(iter)
    }

    /// Scans a raw key range, returning latest visible version per key
    pub fn scan(&self, range: (Bound<Vec<u8>>, Bound<Vec<u8>>)) -> Result<Vec<ScanResult>> {
        let start = match range.0 {
            Bound::Included(k) => Bound::Included(MvccKey::Version(k, 0).encode()?),
            Bound::Excluded(k) => Bound::Excluded(MvccKey::Version(k, Version::MAX).encode()?),
            Bound::Unbounded => Bound::Included(MvccKeyPrefix::Version(vec![]).encode()?),
        };
        let end = match range.1 {
            Bound::Included(k) => Bound::Included(MvccKey::Version(k, Version::MAX).encode()?),
            Bound::Excluded(k) => Bound::Excluded(MvccKey::Version(k, 0).encode()?),
            Bound::Unbounded => {
                let mut end = MvccKeyPrefix::Version(vec![]).encode()?;
                end.truncate(1);
                end[0] += 1;
                Bound::Excluded(end)
            }
        };

        let mut eng = self.engine.lock()?;
        let iter = eng.scan((start, end));
        self.collect_visible(iter)
    }

    fn collect_visible(
        &self,
        mut iter: impl Iterator<Item = Result<(Vec<u8>, Vec<u8>)>>,
    ) -> Result<Vec<ScanResult>> {
        let mut results = BTreeMap::new();
        while let Some((key, value)) = iter.next().transpose()? {
            match MvccKey::decode(key.clone())? {
                MvccKey::Version(raw_key, version) => {
                    if self.state.is_visible(version) {
                        match bincode::deserialize(&value)? {
                            Some(raw_value) => results.insert(raw_key, raw_value),
                            None => results.remove(&raw_key),
                        };
                    }
                }
                _ => return Err(unexpected_key(key)),
            }
        }

        Ok(results
            .into_iter()
            .map(|(key, value)| ScanResult { key, value })
            .collect())
    }

    fn write_inner(&self, key: Vec<u8>, value: Option<Vec<u8>>) -> Result<()> {
        let mut engine = self.engine.lock()?;

        let from = MvccKey::Version(
            key.clone(),
            self.state
                .active_versions
                .iter()
                .min()
                .copied()
                .unwrap_or(self.state.version + 1),
        )
        .encode()?;
        let to = MvccKey::Version(key.clone(), Version::MAX).encode()?;

        // Conflict detection: a newer or concurrent version already exists
        if let Some((k, _)) = engine.scan(from..=to).last().transpose()? {
            match MvccKey::decode(k.clone())? {
                MvccKey::Version(_, version) => {
                    if !self.state.is_visible(version) {
                        return Err(Error::WriteConflict);
                    }
                }
                _ => return Err(unexpected_key(k)),
            }
        }

        engine.set(MvccKey::TxnWrite(self.state.version, key.clone()).encode()?, vec![])?;

        engine.set(
            MvccKey::Version(key, self.state.version).encode()?,
            bincode::serialize(&value)?,
        )?;

        Ok(())
    }

    fn scan_active(engine: &mut MutexGuard<E>) -> Result<HashSet<Version>> {
        let mut active_versions = HashSet::new();
        let mut iter = engine.scan_prefix(MvccKeyPrefix::TxnActive.encode()?);

        while let Some((key, _)) = iter.next().transpose()? {
            match MvccKey::decode(key.clone())? {
                MvccKey::TxnActive(version) => {
                    active_versions.insert(version);
                }
                _ => return Err(unexpected_key(key)),
            }
        }
        Ok(active_versions)
    }
}

/// Scan result containing key-value pair
#[derive(Debug, PartialEq)]
pub struct ScanResult {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}
