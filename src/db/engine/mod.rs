use std::ops::Bound;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    schema::TableDef,
    storage::keycode::serialize_key,
    types::{Record, Value},
};

pub mod kv;

/// Range over field values, used by ordered scans
pub type ValueRange = (Bound<Value>, Bound<Value>);

/// Document transaction (catalogue and record operations)
///
/// Backed by the MVCC key/value layer. Record operations keep secondary
/// indexes in step with the records they touch.
pub trait Transaction {
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;

    /// Stored schema version, 0 for a fresh store
    fn schema_version(&self) -> Result<u32>;
    fn set_schema_version(&mut self, version: u32) -> Result<()>;

    fn create_table(&mut self, table: TableDef) -> Result<()>;
    /// Drops a table with its records, index entries and sequence
    fn drop_table(&mut self, table_name: &str) -> Result<()>;
    /// Replaces a table definition, building added indexes and dropping removed ones
    fn alter_table(&mut self, table: TableDef) -> Result<()>;
    fn get_table(&self, table_name: &str) -> Result<Option<TableDef>>;
    fn list_tables(&self) -> Result<Vec<TableDef>>;
    /// Returns table info, returns error if table doesn't exist
    fn must_get_table(&self, table_name: &str) -> Result<TableDef> {
        self.get_table(table_name)?
            .ok_or_else(|| Error::TableNotFound(table_name.to_string()))
    }

    /// Upserts a record, returning its primary key
    fn put(&mut self, table: &TableDef, record: Record) -> Result<Value>;
    /// Inserts a record, failing if its primary key is taken
    fn add(&mut self, table: &TableDef, record: Record) -> Result<Value>;
    fn get(&self, table: &TableDef, key: &Value) -> Result<Option<Record>>;
    /// Deletes a record and its index entries, false if it did not exist
    fn delete(&mut self, table: &TableDef, key: &Value) -> Result<bool>;
    /// Deletes every record of a table, returning how many were removed
    fn clear(&mut self, table: &TableDef) -> Result<usize>;

    /// Records in primary-key order, restricted to a key range
    fn scan(&self, table: &TableDef, range: ValueRange) -> Result<Vec<(Value, Record)>>;
    /// Primary keys in primary-key order, restricted to a key range
    fn scan_keys(&self, table: &TableDef, range: ValueRange) -> Result<Vec<Value>>;
    /// Index entries `(field value, primary key)` in index order
    fn scan_index(&self, table: &TableDef, field: &str, range: ValueRange) -> Result<Vec<(Value, Value)>>;
    /// Primary keys whose indexed field equals `value`, integers and floats
    /// matching numerically
    fn lookup_index(&self, table: &TableDef, field: &str, value: &Value) -> Result<Vec<Value>>;

    /// Some primary key of a different type family than `value`, if any
    fn key_of_other_type(&self, table: &TableDef, value: &Value) -> Result<Option<Value>>;
    /// Some indexed value of `field` of a different type family than `value`, if any
    fn index_value_of_other_type(&self, table: &TableDef, field: &str, value: &Value) -> Result<Option<Value>>;
}

/// Key types for document storage
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub enum Key {
    SchemaVersion,
    Table(String),
    Sequence(String),
    Record(String, Value),
    Index(String, String, Value, Value),
}

impl Key {
    pub fn encode(&self) -> Result<Vec<u8>> {
        serialize_key(self)
    }
}

/// Key prefix types for prefix scanning
///
/// Variant indices line up with [`Key`].
#[derive(Debug, Serialize, Deserialize)]
pub enum KeyPrefix {
    SchemaVersion,
    Table,
    Sequence,
    Record(String),
    Index(String, String),
}

impl KeyPrefix {
    pub fn encode(&self) -> Result<Vec<u8>> {
        serialize_key(self)
    }

    /// Prefix of the index entries of `field` holding `value`
    pub fn index_value(table: &str, field: &str, value: &Value) -> Result<Vec<u8>> {
        let mut prefix = KeyPrefix::Index(table.to_string(), field.to_string()).encode()?;
        prefix.extend(value_prefix(value)?);
        Ok(prefix)
    }
}

/// Encoded value without the integer/float kind byte
///
/// Every value numerically equal to `value` is encoded with this prefix.
pub fn value_prefix(value: &Value) -> Result<Vec<u8>> {
    let mut encoded = serialize_key(value)?;
    if matches!(value, Value::Integer(_) | Value::Float(_)) {
        encoded.pop();
    }
    Ok(encoded)
}

/// Smallest key greater than every key starting with `prefix`
pub fn prefix_end(prefix: &[u8]) -> Bound<Vec<u8>> {
    let mut end = prefix.to_vec();
    while end.last() == Some(&0xff) {
        end.pop();
    }
    match end.last_mut() {
        Some(last) => {
            *last += 1;
            Bound::Excluded(end)
        }
        None => Bound::Unbounded,
    }
}
