//! Document database layer
//!
//! This module provides:
//! - `engine`: table and record operations over MVCC transactions
//! - `lock`: per-table locks taken by transactions
//! - `migration`: schema version upgrades
//! - `query`: predicate trees
//! - `plan`: access path selection for predicates
//! - `executor`: predicate evaluation and bulk record operations

use std::{
    ops::Bound,
    sync::{Mutex, MutexGuard, RwLock},
};

use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    schema::{SchemaRegistry, TableDef},
    storage::engine::Engine as StorageEngine,
    types::{Record, Value},
};

use self::{
    engine::{
        Transaction, ValueRange,
        kv::{KVEngine, KVTransaction},
    },
    lock::{TableLockGuard, TableLocks},
    migration::{MigrationRunner, State},
    query::Predicate,
};

pub mod engine;
pub mod executor;
pub mod lock;
pub mod migration;
pub mod plan;
pub mod query;

/// A versioned document store
///
/// Built from a storage medium and a schema registry, then opened at a
/// schema version. Every record operation requires the store to be open.
pub struct Database<E: StorageEngine> {
    engine: KVEngine<E>,
    registry: SchemaRegistry,
    runner: Mutex<MigrationRunner>,
    locks: TableLocks,
    /// Held shared by transactions and reads, exclusively by open and close,
    /// so the state cannot change under running work
    gate: RwLock<()>,
}

impl<E: StorageEngine> Database<E> {
    /// Wraps a medium, recovering transactions a crash left behind
    pub fn new(engine: E, registry: SchemaRegistry) -> Result<Self> {
        Ok(Self {
            engine: KVEngine::new(engine)?,
            registry,
            runner: Mutex::new(MigrationRunner::new()),
            locks: TableLocks::new(),
            gate: RwLock::new(()),
        })
    }

    /// Opens the store at `version`, running pending migrations first
    ///
    /// Waits for running transactions to finish, and calls from other threads
    /// wait until opening has finished. Must not be called from inside a
    /// transaction.
    pub fn open(&self, version: u32) -> Result<()> {
        let _gate = self.gate.write()?;
        self.runner.lock()?.open(&self.engine, &self.locks, &self.registry, version)
    }

    /// Opens the store at the highest registered version
    pub fn open_latest(&self) -> Result<()> {
        let latest = self
            .registry
            .latest()
            .ok_or_else(|| Error::InvalidSchema("no schema versions registered".into()))?;
        self.open(latest)
    }

    /// Closes the store once running transactions have finished
    ///
    /// A failed store can be opened again afterwards.
    pub fn close(&self) -> Result<()> {
        let _gate = self.gate.write()?;
        self.runner.lock()?.close();
        self.engine.kv.flush()
    }

    pub fn state(&self) -> Result<State> {
        Ok(self.runner.lock()?.state())
    }

    /// Schema version the store was last brought to
    pub fn version(&self) -> Result<u32> {
        Ok(self.runner.lock()?.version())
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    fn ensure_open(&self) -> Result<MutexGuard<'_, MigrationRunner>> {
        let runner = self.runner.lock()?;
        match runner.state() {
            State::Open => Ok(runner),
            _ => Err(Error::NotOpen),
        }
    }

    /// Live table definitions
    pub fn tables(&self) -> Result<Vec<TableDef>> {
        self.read(|txn| txn.list_tables())
    }

    /// Handle for single-operation calls on a table
    pub fn table(&self, name: &str) -> Table<'_, E> {
        Table { db: self, name: name.to_string() }
    }

    /// Runs `f` in a transaction over the given tables
    ///
    /// The tables are locked for the whole transaction. Writes become visible
    /// when `f` returns `Ok`; on `Err` (or a panic) they are rolled back.
    pub fn transaction<F, R>(&self, tables: &[&str], f: F) -> Result<R>
    where
        F: FnOnce(&mut Tx<'_, E>) -> Result<R>,
    {
        let _gate = self.gate.read()?;
        drop(self.ensure_open()?);
        let names = tables.iter().map(|t| t.to_string()).collect::<Vec<_>>();
        let guard = self.locks.acquire(&names);
        let mut tx = Tx { txn: self.engine.begin()?, guard, finished: false };
        debug!(tables = ?names, "begin transaction");

        match f(&mut tx) {
            Ok(result) => {
                tx.txn
                    .commit()
                    .map_err(|err| Error::TransactionAborted(format!("commit failed: {}", err)))?;
                tx.finished = true;
                debug!(tables = ?names, "commit transaction");
                Ok(result)
            }
            Err(err) => {
                warn!(tables = ?names, error = %err, "transaction rolled back");
                tx.finished = true;
                tx.txn.rollback()?;
                Err(err)
            }
        }
    }

    /// Runs `f` against a read-only snapshot, without taking table locks
    fn read<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&KVTransaction<E>) -> Result<R>,
    {
        let _gate = self.gate.read()?;
        drop(self.ensure_open()?);
        let txn = self.engine.begin()?;
        let result = f(&txn);
        txn.rollback()?;
        result
    }
}

/// An open transaction, see [`Database::transaction`]
pub struct Tx<'a, E: StorageEngine> {
    txn: KVTransaction<E>,
    guard: TableLockGuard<'a>,
    finished: bool,
}

impl<'a, E: StorageEngine> Tx<'a, E> {
    /// Record operations on one of the transaction's tables
    pub fn table(&mut self, name: &str) -> Result<TxTable<'_, E>> {
        if !self.guard.contains(name) {
            return Err(Error::TransactionAborted(format!(
                "table {} is not part of the transaction",
                name
            )));
        }
        let def = self.txn.must_get_table(name)?;
        Ok(TxTable { txn: &mut self.txn, def })
    }
}

impl<'a, E: StorageEngine> Drop for Tx<'a, E> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("transaction dropped before completion, rolling back");
            if let Err(err) = self.txn.rollback() {
                warn!(error = %err, "rollback failed");
            }
        }
    }
}

/// Record operations on a table inside a transaction
pub struct TxTable<'t, E: StorageEngine> {
    txn: &'t mut KVTransaction<E>,
    def: TableDef,
}

impl<'t, E: StorageEngine> TxTable<'t, E> {
    pub fn def(&self) -> &TableDef {
        &self.def
    }

    /// Inserts or replaces a record, returning its primary key
    pub fn put(&mut self, record: Record) -> Result<Value> {
        self.txn.put(&self.def, record)
    }

    /// Inserts a record, failing if its primary key is already taken
    pub fn add(&mut self, record: Record) -> Result<Value> {
        self.txn.add(&self.def, record)
    }

    pub fn bulk_put(&mut self, records: impl IntoIterator<Item = Record>) -> Result<Vec<Value>> {
        records.into_iter().map(|r| self.put(r)).collect()
    }

    pub fn bulk_add(&mut self, records: impl IntoIterator<Item = Record>) -> Result<Vec<Value>> {
        records.into_iter().map(|r| self.add(r)).collect()
    }

    pub fn get(&self, key: impl Into<Value>) -> Result<Record> {
        get_record(&*self.txn, &self.def, key.into())
    }

    pub fn delete(&mut self, key: impl Into<Value>) -> Result<bool> {
        self.txn.delete(&self.def, &key.into())
    }

    /// Removes every record, returning how many there were
    pub fn clear(&mut self) -> Result<usize> {
        self.txn.clear(&self.def)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.txn.scan_keys(&self.def, (Bound::Unbounded, Bound::Unbounded))?.len())
    }

    /// Records ordered by `index` (primary key when `None`), within `range`
    pub fn scan(&self, index: Option<&str>, range: ValueRange) -> Result<Scan<'_, KVTransaction<E>>> {
        let keys = scan_keys(&*self.txn, &self.def, index, range)?;
        Ok(Scan::new(Snapshot::Borrowed(&*self.txn), self.def.clone(), keys))
    }

    pub fn each(&self, predicate: &Predicate, visitor: impl FnMut(&Record)) -> Result<usize> {
        executor::each(&*self.txn, &self.def, predicate, visitor)
    }

    pub fn to_vec(&self, predicate: &Predicate) -> Result<Vec<Record>> {
        executor::to_vec(&*self.txn, &self.def, predicate)
    }

    pub fn first(&self, predicate: &Predicate) -> Result<Option<Record>> {
        executor::first(&*self.txn, &self.def, predicate)
    }

    pub fn count_where(&self, predicate: &Predicate) -> Result<usize> {
        executor::count(&*self.txn, &self.def, predicate)
    }

    /// Overwrites the fields in `patch` on every match, returning the count
    pub fn modify(&mut self, predicate: &Predicate, patch: &Record) -> Result<usize> {
        executor::modify(&mut *self.txn, &self.def, predicate, patch)
    }

    pub fn delete_where(&mut self, predicate: &Predicate) -> Result<usize> {
        executor::delete(&mut *self.txn, &self.def, predicate)
    }
}

/// Table handle running each call in its own transaction
pub struct Table<'db, E: StorageEngine> {
    db: &'db Database<E>,
    name: String,
}

impl<'db, E: StorageEngine> Table<'db, E> {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn write<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut TxTable<'_, E>) -> Result<R>,
    {
        self.db.transaction(&[self.name.as_str()], |tx| f(&mut tx.table(&self.name)?))
    }

    fn read<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&KVTransaction<E>, &TableDef) -> Result<R>,
    {
        self.db.read(|txn| f(txn, &txn.must_get_table(&self.name)?))
    }

    pub fn put(&self, record: Record) -> Result<Value> {
        self.write(|t| t.put(record))
    }

    pub fn add(&self, record: Record) -> Result<Value> {
        self.write(|t| t.add(record))
    }

    /// Puts all records atomically
    pub fn bulk_put(&self, records: impl IntoIterator<Item = Record>) -> Result<Vec<Value>> {
        self.write(|t| t.bulk_put(records))
    }

    /// Adds all records atomically; one duplicate key rejects the batch
    pub fn bulk_add(&self, records: impl IntoIterator<Item = Record>) -> Result<Vec<Value>> {
        self.write(|t| t.bulk_add(records))
    }

    pub fn get(&self, key: impl Into<Value>) -> Result<Record> {
        let key = key.into();
        self.read(|txn, def| get_record(txn, def, key))
    }

    pub fn delete(&self, key: impl Into<Value>) -> Result<bool> {
        let key = key.into();
        self.write(|t| t.delete(key))
    }

    pub fn clear(&self) -> Result<usize> {
        self.write(|t| t.clear())
    }

    pub fn count(&self) -> Result<usize> {
        self.read(|txn, def| Ok(txn.scan_keys(def, (Bound::Unbounded, Bound::Unbounded))?.len()))
    }

    /// Records ordered by `index` (primary key when `None`), within `range`
    ///
    /// The scan reads from a snapshot taken now and can be iterated any
    /// number of times.
    pub fn scan(&self, index: Option<&str>, range: ValueRange) -> Result<Scan<'db, KVTransaction<E>>> {
        let _gate = self.db.gate.read()?;
        drop(self.db.ensure_open()?);
        let txn = self.db.engine.begin()?;
        let prepared = txn
            .must_get_table(&self.name)
            .and_then(|def| Ok((scan_keys(&txn, &def, index, range)?, def)));
        match prepared {
            Ok((keys, def)) => Ok(Scan::new(Snapshot::Owned(txn), def, keys)),
            Err(err) => {
                txn.rollback()?;
                Err(err)
            }
        }
    }

    pub fn each(&self, predicate: &Predicate, visitor: impl FnMut(&Record)) -> Result<usize> {
        self.read(|txn, def| executor::each(txn, def, predicate, visitor))
    }

    pub fn to_vec(&self, predicate: &Predicate) -> Result<Vec<Record>> {
        self.read(|txn, def| executor::to_vec(txn, def, predicate))
    }

    pub fn first(&self, predicate: &Predicate) -> Result<Option<Record>> {
        self.read(|txn, def| executor::first(txn, def, predicate))
    }

    pub fn count_where(&self, predicate: &Predicate) -> Result<usize> {
        self.read(|txn, def| executor::count(txn, def, predicate))
    }

    pub fn modify(&self, predicate: &Predicate, patch: &Record) -> Result<usize> {
        self.write(|t| t.modify(predicate, patch))
    }

    pub fn delete_where(&self, predicate: &Predicate) -> Result<usize> {
        self.write(|t| t.delete_where(predicate))
    }
}

fn get_record<T: Transaction>(txn: &T, def: &TableDef, key: Value) -> Result<Record> {
    match txn.get(def, &key)? {
        Some(record) => Ok(record),
        None => Err(Error::NotFound { table: def.name.clone(), key: key.to_string() }),
    }
}

fn scan_keys<T: Transaction>(
    txn: &T,
    def: &TableDef,
    index: Option<&str>,
    range: ValueRange,
) -> Result<Vec<Value>> {
    match index {
        None => txn.scan_keys(def, range),
        Some(field) if field == def.primary_key => txn.scan_keys(def, range),
        Some(field) if def.has_index(field) => Ok(txn
            .scan_index(def, field, range)?
            .into_iter()
            .map(|(_, key)| key)
            .collect()),
        Some(field) => Err(Error::InvalidSchema(format!(
            "field {} is not indexed in table {}",
            field, def.name
        ))),
    }
}

enum Snapshot<'a, T: Transaction> {
    Borrowed(&'a T),
    Owned(T),
}

/// Ordered scan result, reading each record on demand
pub struct Scan<'a, T: Transaction> {
    snapshot: Snapshot<'a, T>,
    table: TableDef,
    keys: Vec<Value>,
}

impl<'a, T: Transaction> Scan<'a, T> {
    fn new(snapshot: Snapshot<'a, T>, table: TableDef, keys: Vec<Value>) -> Self {
        Self { snapshot, table, keys }
    }

    fn txn(&self) -> &T {
        match &self.snapshot {
            Snapshot::Borrowed(txn) => *txn,
            Snapshot::Owned(txn) => txn,
        }
    }

    /// Primary keys in scan order
    pub fn keys(&self) -> &[Value] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterates the records from the start
    pub fn iter(&self) -> ScanIter<'_, 'a, T> {
        ScanIter { scan: self, pos: 0 }
    }
}

impl<'a, T: Transaction> Drop for Scan<'a, T> {
    fn drop(&mut self) {
        if let Snapshot::Owned(txn) = &self.snapshot {
            if let Err(err) = txn.rollback() {
                warn!(error = %err, "failed to release scan snapshot");
            }
        }
    }
}

pub struct ScanIter<'s, 'a, T: Transaction> {
    scan: &'s Scan<'a, T>,
    pos: usize,
}

impl<'s, 'a, T: Transaction> Iterator for ScanIter<'s, 'a, T> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.scan.keys.get(self.pos)?;
        self.pos += 1;
        Some(get_record(self.scan.txn(), &self.scan.table, key.clone()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.scan.keys.len() - self.pos;
        (remaining, Some(remaining))
    }
}

impl<'s, 'a, T: Transaction> IntoIterator for &'s Scan<'a, T> {
    type Item = Result<Record>;
    type IntoIter = ScanIter<'s, 'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        ops::Bound,
        sync::{Arc, mpsc},
        thread,
        time::Duration,
    };

    use crate::{
        error::{Error, Result},
        record,
        schema::SchemaRegistry,
        storage::memory::MemoryEngine,
        types::{Record, Value},
    };

    use super::{Database, migration::State, query::Predicate};

    fn open_db() -> Result<Database<MemoryEngine>> {
        let mut registry = SchemaRegistry::new();
        registry.stores(1, &[("users", "++id,name,account"), ("group", "++id,name")])?;
        let db = Database::new(MemoryEngine::new(), registry)?;
        db.open(1)?;
        Ok(db)
    }

    fn names(records: impl IntoIterator<Item = Result<Record>>) -> Result<Vec<String>> {
        records
            .into_iter()
            .map(|r| Ok(r?.get("name").and_then(Value::as_str).unwrap_or_default().to_string()))
            .collect()
    }

    #[test]
    fn test_not_open() -> Result<()> {
        let db = open_db()?;
        db.close()?;
        assert_eq!(db.state()?, State::Closed);
        assert_eq!(db.table("users").put(record! { "name" => "Peter Cheng" }), Err(Error::NotOpen));
        assert_eq!(db.table("users").count(), Err(Error::NotOpen));
        assert!(matches!(db.transaction(&["users"], |_| Ok(())), Err(Error::NotOpen)));

        db.open(1)?;
        assert_eq!(db.table("users").count()?, 0);
        Ok(())
    }

    #[test]
    fn test_get_delete() -> Result<()> {
        let db = open_db()?;
        let users = db.table("users");
        let id = users.put(record! { "name" => "Peter Cheng", "account" => "T00052" })?;
        assert_eq!(users.get(id.clone())?.get("account"), Some(&Value::from("T00052")));

        assert!(users.delete(id.clone())?);
        assert!(!users.delete(id.clone())?);
        assert_eq!(
            users.get(id),
            Err(Error::NotFound { table: "users".into(), key: "1".into() })
        );
        assert!(matches!(db.table("orders").count(), Err(Error::TableNotFound(_))));
        Ok(())
    }

    #[test]
    fn test_scan() -> Result<()> {
        let db = open_db()?;
        let users = db.table("users");
        users.bulk_put(
            ["Peter Cheng", "Tom Cheng", "John Cheng", "Joe Cheng"]
                .into_iter()
                .map(|name| record! { "name" => name }),
        )?;

        let scan = users.scan(None, (Bound::Unbounded, Bound::Unbounded))?;
        assert_eq!(scan.keys(), &[Value::Integer(1), 2.into(), 3.into(), 4.into()]);

        // the snapshot ignores later writes and can be walked again
        users.delete(2)?;
        assert_eq!(names(&scan)?, vec!["Peter Cheng", "Tom Cheng", "John Cheng", "Joe Cheng"]);
        assert_eq!(names(scan.iter())?.len(), 4);

        let by_name = users.scan(Some("name"), (Bound::Included("J".into()), Bound::Excluded("K".into())))?;
        assert_eq!(names(&by_name)?, vec!["Joe Cheng", "John Cheng"]);

        assert!(matches!(
            users.scan(Some("password"), (Bound::Unbounded, Bound::Unbounded)),
            Err(Error::InvalidSchema(_))
        ));
        Ok(())
    }

    #[test]
    fn test_transaction_rollback() -> Result<()> {
        let db = open_db()?;
        let result = db.transaction(&["users", "group"], |tx| {
            let group = tx.table("group")?.put(record! { "name" => "staff" })?;
            tx.table("users")?.put(record! { "name" => "Peter Cheng", "groupId" => group })?;
            tx.table("users")?.add(record! { "id" => 1, "name" => "Tom Cheng" })?;
            Ok(())
        });
        assert!(matches!(result, Err(Error::ConstraintViolation(_))));
        assert_eq!(db.table("users").count()?, 0);
        assert_eq!(db.table("group").count()?, 0);

        let result = db.transaction(&["users"], |tx| {
            tx.table("users")?.put(record! { "name" => "Peter Cheng" })?;
            tx.table("group")?.put(record! { "name" => "staff" })
        });
        assert!(matches!(result, Err(Error::TransactionAborted(_))));
        assert_eq!(db.table("users").count()?, 0);
        Ok(())
    }

    #[test]
    fn test_transaction_panic_rolls_back() -> Result<()> {
        let db = open_db()?;
        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = db.transaction(&["users"], |tx| -> Result<()> {
                tx.table("users")?.put(record! { "name" => "Peter Cheng" })?;
                panic!("boom");
            });
        }));
        assert!(caught.is_err());
        assert_eq!(db.table("users").count()?, 0);
        db.table("users").put(record! { "name" => "Tom Cheng" })?;
        assert_eq!(db.table("users").count()?, 1);
        Ok(())
    }

    #[test]
    fn test_concurrent_transactions() -> Result<()> {
        let db = Arc::new(open_db()?);
        let mut handles = Vec::new();
        for i in 0..8 {
            let db = db.clone();
            handles.push(thread::spawn(move || -> Result<()> {
                let table = if i % 2 == 0 { "users" } else { "group" };
                for n in 0..10 {
                    db.table(table).put(record! { "name" => format!("{}-{}", i, n) })?;
                }
                Ok(())
            }));
        }
        for handle in handles {
            handle.join().expect("writer panicked")?;
        }
        assert_eq!(db.table("users").count()?, 40);
        assert_eq!(db.table("group").count()?, 40);
        assert_eq!(db.table("users").count_where(&Predicate::above("id", 35))?, 5);
        Ok(())
    }

    #[test]
    fn test_open_waits_for_running_transaction() -> Result<()> {
        let mut registry = SchemaRegistry::new();
        registry.stores(1, &[("users", "++id,name")])?;
        registry.stores(2, &[("users", "++id,name,groupId")])?;
        let db = Arc::new(Database::new(MemoryEngine::new(), registry)?);
        db.open(1)?;

        let (started, wait_started) = mpsc::channel();
        let writer = {
            let db = db.clone();
            thread::spawn(move || {
                db.transaction(&["users"], |tx| {
                    tx.table("users")?.put(record! { "name" => "Peter Cheng", "groupId" => 5 })?;
                    started.send(()).expect("test thread gone");
                    thread::sleep(Duration::from_millis(20));
                    Ok(())
                })
            })
        };
        wait_started.recv().expect("writer did not start");

        // the upgrade to 2 builds the groupId index only after the writer commits
        db.close()?;
        db.open(2)?;
        writer.join().expect("writer panicked")?;

        let users = db.table("users");
        assert_eq!(users.count()?, 1);
        assert_eq!(users.count_where(&Predicate::equals("groupId", 5))?, 1);
        Ok(())
    }

    #[test]
    fn test_mixed_numeric_keys() -> Result<()> {
        let mut registry = SchemaRegistry::new();
        registry.stores(1, &[("readings", "id,score")])?;
        let db = Database::new(MemoryEngine::new(), registry)?;
        db.open(1)?;

        let readings = db.table("readings");
        readings.put(record! { "id" => 3, "score" => 3.0 })?;
        readings.put(record! { "id" => 2.5, "score" => 2.5 })?;
        readings.put(record! { "id" => 1, "score" => 2 })?;
        readings.put(record! { "id" => 4, "score" => 7 })?;

        let scan = readings.scan(None, (Bound::Unbounded, Bound::Unbounded))?;
        assert_eq!(scan.keys(), &[Value::Integer(1), Value::Float(2.5), 3.into(), 4.into()]);

        let mut seen = Vec::new();
        readings.each(&Predicate::above("id", 0), |r| seen.push(r["id"].clone()))?;
        assert_eq!(seen, scan.keys());

        let by_score = readings.scan(Some("score"), (Bound::Included(2.into()), Bound::Included(3.into())))?;
        assert_eq!(by_score.keys(), &[Value::Integer(1), Value::Float(2.5), 3.into()]);
        let by_score = readings.scan(Some("score"), (Bound::Excluded(2.into()), Bound::Excluded(3.into())))?;
        assert_eq!(by_score.keys(), &[Value::Float(2.5)]);

        let keys = |r: Vec<Record>| r.into_iter().map(|r| r["id"].clone()).collect::<Vec<_>>();
        assert_eq!(keys(readings.to_vec(&Predicate::above("id", 2))?), vec![Value::Float(2.5), 3.into(), 4.into()]);
        assert_eq!(keys(readings.to_vec(&Predicate::equals("id", 3.0))?), vec![Value::Integer(3)]);
        assert_eq!(keys(readings.to_vec(&Predicate::equals("score", 3))?), vec![Value::Integer(3)]);
        assert_eq!(
            keys(readings.to_vec(&Predicate::below_or_equal("score", 3))?),
            vec![Value::Integer(1), Value::Float(2.5), 3.into()]
        );

        // a string anywhere in the index is a mismatch, even outside the range
        readings.put(record! { "id" => 5, "score" => "high" })?;
        assert!(matches!(
            readings.to_vec(&Predicate::above("score", 1)),
            Err(Error::ConstraintViolation(_))
        ));
        Ok(())
    }
}
