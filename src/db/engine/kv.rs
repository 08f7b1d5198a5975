use std::ops::Bound;

use tracing::debug;

use crate::{
    error::{Error, Result},
    schema::TableDef,
    storage::{
        engine::Engine as StorageEngine,
        keycode::{deserialize_key, serialize_key},
        mvcc::{Mvcc, MvccTransaction},
    },
    types::{Record, Value},
};

use super::{Key, KeyPrefix, Transaction, ValueRange, prefix_end, value_prefix};

type RawRange = (Bound<Vec<u8>>, Bound<Vec<u8>>);

/// Key-value store backed document engine
pub struct KVEngine<E: StorageEngine> {
    pub kv: Mvcc<E>,
}

impl<E: StorageEngine> Clone for KVEngine<E> {
    fn clone(&self) -> Self {
        Self { kv: self.kv.clone() }
    }
}

impl<E: StorageEngine> KVEngine<E> {
    pub fn new(engine: E) -> Result<Self> {
        Ok(Self { kv: Mvcc::new(engine)? })
    }

    pub fn begin(&self) -> Result<KVTransaction<E>> {
        Ok(KVTransaction::new(self.kv.begin()?))
    }
}

/// Key-value transaction (wrapper around MVCC transaction)
pub struct KVTransaction<E: StorageEngine> {
    txn: MvccTransaction<E>,
}

impl<E: StorageEngine> KVTransaction<E> {
    pub fn new(txn: MvccTransaction<E>) -> Self {
        Self { txn }
    }

    fn set_key(&self, key: Key, value: Vec<u8>) -> Result<()> {
        self.txn.set(key.encode()?, value)
    }

    fn delete_key(&self, key: Key) -> Result<()> {
        self.txn.delete(key.encode()?)
    }

    /// Resolves the record's primary key, generating one for auto-increment tables
    fn assign_key(&mut self, table: &TableDef, record: &mut Record) -> Result<Value> {
        match table.key_of(record).cloned() {
            Some(key) => {
                if let (true, Value::Integer(explicit)) = (table.auto_increment, &key) {
                    if *explicit > self.sequence(table)? {
                        self.set_key(Key::Sequence(table.name.clone()), bincode::serialize(explicit)?)?;
                    }
                }
                Ok(key)
            }
            None if table.auto_increment => {
                let next = self.sequence(table)? + 1;
                self.set_key(Key::Sequence(table.name.clone()), bincode::serialize(&next)?)?;
                record.insert(table.primary_key.clone(), Value::Integer(next));
                Ok(Value::Integer(next))
            }
            None => Err(Error::ConstraintViolation(format!(
                "record for table {} has no primary key {}",
                table.name, table.primary_key
            ))),
        }
    }

    /// Last assigned auto-increment value
    fn sequence(&self, table: &TableDef) -> Result<i64> {
        Ok(match self.txn.get(Key::Sequence(table.name.clone()).encode()?)? {
            Some(v) => bincode::deserialize(&v)?,
            None => 0,
        })
    }

    fn write_record(&self, table: &TableDef, key: &Value, record: &Record) -> Result<()> {
        self.set_key(
            Key::Record(table.name.clone(), key.clone()),
            bincode::serialize(record)?,
        )?;
        for field in table.indexes.iter() {
            if let Some(value) = record.get(field).filter(|v| !v.is_null()) {
                self.set_key(
                    Key::Index(table.name.clone(), field.clone(), value.clone(), key.clone()),
                    vec![],
                )?;
            }
        }
        Ok(())
    }

    fn delete_record(&self, table: &TableDef, key: &Value, record: &Record) -> Result<()> {
        for field in table.indexes.iter() {
            if let Some(value) = record.get(field).filter(|v| !v.is_null()) {
                self.delete_key(Key::Index(
                    table.name.clone(),
                    field.clone(),
                    value.clone(),
                    key.clone(),
                ))?;
            }
        }
        self.delete_key(Key::Record(table.name.clone(), key.clone()))
    }

    fn delete_index(&self, table: &TableDef, field: &str) -> Result<()> {
        let prefix = KeyPrefix::Index(table.name.clone(), field.to_string()).encode()?;
        for entry in self.txn.scan_prefix(prefix)? {
            self.txn.delete(entry.key)?;
        }
        Ok(())
    }

    fn record_range(table: &TableDef, range: ValueRange) -> Result<RawRange> {
        let prefix = KeyPrefix::Record(table.name.clone()).encode()?;
        Self::value_range(prefix, range)
    }

    fn index_range(table: &TableDef, field: &str, range: ValueRange) -> Result<RawRange> {
        let prefix = KeyPrefix::Index(table.name.clone(), field.to_string()).encode()?;
        Self::value_range(prefix, range)
    }

    /// Raw range of the keys under `prefix` whose next component lies in `range`
    ///
    /// Keys holding a value v (or a number equal to it) all start with
    /// `at(v)`, so exclusive starts and inclusive ends skip past that whole
    /// prefix.
    fn value_range(prefix: Vec<u8>, range: ValueRange) -> Result<RawRange> {
        let at = |v: &Value| -> Result<Vec<u8>> {
            let mut key = prefix.clone();
            key.extend(value_prefix(v)?);
            Ok(key)
        };
        let start = match range.0 {
            Bound::Included(v) => Bound::Included(at(&v)?),
            Bound::Excluded(v) => match prefix_end(&at(&v)?) {
                Bound::Excluded(end) => Bound::Included(end),
                _ => Bound::Unbounded,
            },
            Bound::Unbounded => Bound::Included(prefix.clone()),
        };
        let end = match range.1 {
            Bound::Included(v) => prefix_end(&at(&v)?),
            Bound::Excluded(v) => Bound::Excluded(at(&v)?),
            Bound::Unbounded => prefix_end(&prefix),
        };
        Ok((start, end))
    }

    /// First key under `prefix` whose next component has another variant tag than `value`
    fn first_of_other_type(&self, prefix: Vec<u8>, value: &Value) -> Result<Option<Key>> {
        let tag = serialize_key(value)?
            .first()
            .copied()
            .ok_or_else(|| Error::Internal("empty value encoding".into()))?;
        let mut band = prefix.clone();
        band.push(tag);

        let below = (Bound::Included(prefix.clone()), Bound::Excluded(band.clone()));
        let above = match prefix_end(&band) {
            Bound::Excluded(start) => (Bound::Included(start), prefix_end(&prefix)),
            _ => return Ok(None),
        };
        for range in [below, above] {
            if let Some(result) = self.txn.scan(range)?.into_iter().next() {
                return Ok(Some(deserialize_key::<Key>(&result.key)?));
            }
        }
        Ok(None)
    }
}

impl<E: StorageEngine> Transaction for KVTransaction<E> {
    fn commit(&self) -> Result<()> {
        self.txn.commit()
    }

    fn rollback(&self) -> Result<()> {
        self.txn.rollback()
    }

    fn schema_version(&self) -> Result<u32> {
        Ok(match self.txn.get(Key::SchemaVersion.encode()?)? {
            Some(v) => bincode::deserialize(&v)?,
            None => 0,
        })
    }

    fn set_schema_version(&mut self, version: u32) -> Result<()> {
        self.set_key(Key::SchemaVersion, bincode::serialize(&version)?)
    }

    fn create_table(&mut self, table: TableDef) -> Result<()> {
        if self.get_table(&table.name)?.is_some() {
            return Err(Error::ConstraintViolation(format!(
                "table {} already exists",
                table.name
            )));
        }
        table.validate()?;

        debug!(table = %table.name, "create table");
        self.set_key(Key::Table(table.name.clone()), bincode::serialize(&table)?)
    }

    fn drop_table(&mut self, table_name: &str) -> Result<()> {
        let table = self.must_get_table(table_name)?;
        let removed = self.clear(&table)?;
        self.delete_key(Key::Sequence(table.name.clone()))?;
        self.delete_key(Key::Table(table.name.clone()))?;
        debug!(table = %table.name, records = removed, "drop table");
        Ok(())
    }

    fn alter_table(&mut self, table: TableDef) -> Result<()> {
        let current = self.must_get_table(&table.name)?;
        if current.primary_key != table.primary_key || current.auto_increment != table.auto_increment {
            return Err(Error::ConstraintViolation(format!(
                "cannot change primary key of table {}",
                table.name
            )));
        }
        table.validate()?;

        for field in current.indexes.iter().filter(|f| !table.has_index(f)) {
            debug!(table = %table.name, field = %field, "remove index");
            self.delete_index(&current, field)?;
        }

        let added = table
            .indexes
            .iter()
            .filter(|f| !current.has_index(f))
            .collect::<Vec<_>>();
        if !added.is_empty() {
            for (key, record) in self.scan(&current, (Bound::Unbounded, Bound::Unbounded))? {
                for field in added.iter() {
                    if let Some(value) = record.get(*field).filter(|v| !v.is_null()) {
                        self.set_key(
                            Key::Index(table.name.clone(), field.to_string(), value.clone(), key.clone()),
                            vec![],
                        )?;
                    }
                }
            }
            debug!(table = %table.name, fields = ?added, "build indexes");
        }

        self.set_key(Key::Table(table.name.clone()), bincode::serialize(&table)?)
    }

    fn get_table(&self, table_name: &str) -> Result<Option<TableDef>> {
        let key = Key::Table(table_name.to_string());
        Ok(self
            .txn
            .get(key.encode()?)?
            .map(|v| bincode::deserialize(&v))
            .transpose()?)
    }

    fn list_tables(&self) -> Result<Vec<TableDef>> {
        self.txn
            .scan_prefix(KeyPrefix::Table.encode()?)?
            .into_iter()
            .map(|r| -> Result<TableDef> { Ok(bincode::deserialize(&r.value)?) })
            .collect()
    }

    fn put(&mut self, table: &TableDef, mut record: Record) -> Result<Value> {
        let key = self.assign_key(table, &mut record)?;
        if let Some(old) = self.get(table, &key)? {
            self.delete_record(table, &key, &old)?;
        }
        self.write_record(table, &key, &record)?;
        Ok(key)
    }

    fn add(&mut self, table: &TableDef, mut record: Record) -> Result<Value> {
        let key = self.assign_key(table, &mut record)?;
        if self.get(table, &key)?.is_some() {
            return Err(Error::ConstraintViolation(format!(
                "duplicate primary key {} in table {}",
                key, table.name
            )));
        }
        self.write_record(table, &key, &record)?;
        Ok(key)
    }

    fn get(&self, table: &TableDef, key: &Value) -> Result<Option<Record>> {
        let key = Key::Record(table.name.clone(), key.clone());
        Ok(self
            .txn
            .get(key.encode()?)?
            .map(|v| bincode::deserialize(&v))
            .transpose()?)
    }

    fn delete(&mut self, table: &TableDef, key: &Value) -> Result<bool> {
        match self.get(table, key)? {
            Some(record) => {
                self.delete_record(table, key, &record)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn clear(&mut self, table: &TableDef) -> Result<usize> {
        let records = self.scan(table, (Bound::Unbounded, Bound::Unbounded))?;
        for (key, record) in records.iter() {
            self.delete_record(table, key, record)?;
        }
        Ok(records.len())
    }

    fn scan(&self, table: &TableDef, range: ValueRange) -> Result<Vec<(Value, Record)>> {
        let results = self.txn.scan(Self::record_range(table, range)?)?;
        let mut records = Vec::with_capacity(results.len());
        for result in results {
            match deserialize_key::<Key>(&result.key)? {
                Key::Record(_, key) => records.push((key, bincode::deserialize(&result.value)?)),
                key => return Err(Error::Internal(format!("unexpected key {:?}", key))),
            }
        }
        Ok(records)
    }

    fn scan_keys(&self, table: &TableDef, range: ValueRange) -> Result<Vec<Value>> {
        self.txn
            .scan(Self::record_range(table, range)?)?
            .into_iter()
            .map(|result| -> Result<_> {
                match deserialize_key::<Key>(&result.key)? {
                    Key::Record(_, key) => Ok(key),
                    key => Err(Error::Internal(format!("unexpected key {:?}", key))),
                }
            })
            .collect()
    }

    fn scan_index(&self, table: &TableDef, field: &str, range: ValueRange) -> Result<Vec<(Value, Value)>> {
        self.txn
            .scan(Self::index_range(table, field, range)?)?
            .into_iter()
            .map(|result| -> Result<_> {
                match deserialize_key::<Key>(&result.key)? {
                    Key::Index(_, _, value, key) => Ok((value, key)),
                    key => Err(Error::Internal(format!("unexpected key {:?}", key))),
                }
            })
            .collect()
    }

    fn lookup_index(&self, table: &TableDef, field: &str, value: &Value) -> Result<Vec<Value>> {
        self.txn
            .scan_prefix(KeyPrefix::index_value(&table.name, field, value)?)?
            .into_iter()
            .map(|result| -> Result<_> {
                match deserialize_key::<Key>(&result.key)? {
                    Key::Index(_, _, _, key) => Ok(key),
                    key => Err(Error::Internal(format!("unexpected key {:?}", key))),
                }
            })
            .collect()
    }

    fn key_of_other_type(&self, table: &TableDef, value: &Value) -> Result<Option<Value>> {
        let prefix = KeyPrefix::Record(table.name.clone()).encode()?;
        match self.first_of_other_type(prefix, value)? {
            Some(Key::Record(_, key)) => Ok(Some(key)),
            Some(key) => Err(Error::Internal(format!("unexpected key {:?}", key))),
            None => Ok(None),
        }
    }

    fn index_value_of_other_type(&self, table: &TableDef, field: &str, value: &Value) -> Result<Option<Value>> {
        let prefix = KeyPrefix::Index(table.name.clone(), field.to_string()).encode()?;
        match self.first_of_other_type(prefix, value)? {
            Some(Key::Index(_, _, indexed, _)) => Ok(Some(indexed)),
            Some(key) => Err(Error::Internal(format!("unexpected key {:?}", key))),
            None => Ok(None),
        }
    }
}
