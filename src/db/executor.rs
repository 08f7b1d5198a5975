use std::{collections::BTreeMap, ops::Bound};

use tracing::debug;

use crate::{
    error::{Error, Result},
    schema::TableDef,
    storage::keycode::serialize_key,
    types::{Record, Value},
};

use super::{
    engine::Transaction,
    plan::{Node, Plan},
    query::Predicate,
};

/// Matching primary keys, ordered by their encoded form (primary-key order)
pub type KeySet = BTreeMap<Vec<u8>, Value>;

/// Evaluates a plan node to the set of primary keys it selects
pub fn execute<T: Transaction>(txn: &T, table: &TableDef, node: &Node) -> Result<KeySet> {
    let mut keys = KeySet::new();
    match node {
        Node::KeyLookup { keys: lookup } => {
            // `1` and `1.0` are distinct keys that both equal 1
            for value in lookup.iter() {
                let range = (Bound::Included(value.clone()), Bound::Included(value.clone()));
                for key in txn.scan_keys(table, range)? {
                    insert(&mut keys, key)?;
                }
            }
        }
        Node::KeyScan { condition } => match (condition.bound(), condition.range()) {
            (Some(bound), Some(range)) => {
                if let Some(other) = txn.key_of_other_type(table, bound)? {
                    condition.matches(&other)?;
                }
                for key in txn.scan_keys(table, range)? {
                    insert(&mut keys, key)?;
                }
            }
            _ => {
                for key in txn.scan_keys(table, (Bound::Unbounded, Bound::Unbounded))? {
                    if condition.matches(&key)? {
                        insert(&mut keys, key)?;
                    }
                }
            }
        },
        Node::IndexLookup { field, values } => {
            for value in values.iter() {
                for key in txn.lookup_index(table, field, value)? {
                    insert(&mut keys, key)?;
                }
            }
        }
        Node::IndexScan { field, condition } => match (condition.bound(), condition.range()) {
            (Some(bound), Some(range)) => {
                // A value of another type anywhere in the index is a mismatch,
                // even outside the range
                if let Some(other) = txn.index_value_of_other_type(table, field, bound)? {
                    condition.matches(&other)?;
                }
                for (_, key) in txn.scan_index(table, field, range)? {
                    insert(&mut keys, key)?;
                }
            }
            // Case folding does not follow key order
            _ => {
                for (value, key) in txn.scan_index(table, field, (Bound::Unbounded, Bound::Unbounded))? {
                    if condition.matches(&value)? {
                        insert(&mut keys, key)?;
                    }
                }
            }
        },
        Node::Filter { field, condition } => {
            for (key, record) in txn.scan(table, (Bound::Unbounded, Bound::Unbounded))? {
                let matched = match record.get(field) {
                    Some(value) => condition.matches(value)?,
                    None => false,
                };
                if matched {
                    insert(&mut keys, key)?;
                }
            }
        }
        Node::Intersect(l, r) => {
            let right = execute(txn, table, r)?;
            keys = execute(txn, table, l)?;
            keys.retain(|k, _| right.contains_key(k));
        }
        Node::Union(l, r) => {
            keys = execute(txn, table, l)?;
            keys.extend(execute(txn, table, r)?);
        }
    }
    Ok(keys)
}

fn insert(keys: &mut KeySet, key: Value) -> Result<()> {
    keys.insert(serialize_key(&key)?, key);
    Ok(())
}

/// Primary keys matching a predicate, in primary-key order
pub fn select<T: Transaction>(txn: &T, table: &TableDef, predicate: &Predicate) -> Result<Vec<Value>> {
    let plan = Plan::build(table, predicate);
    debug!(table = %table.name, fields = ?predicate.fields(), plan = %plan, "query plan");
    Ok(execute(txn, table, &plan.0)?.into_values().collect())
}

/// Calls the visitor once per matching record, returning the number visited
pub fn each<T, F>(txn: &T, table: &TableDef, predicate: &Predicate, mut visitor: F) -> Result<usize>
where
    T: Transaction,
    F: FnMut(&Record),
{
    let keys = select(txn, table, predicate)?;
    for key in keys.iter() {
        let record = fetch(txn, table, key)?;
        visitor(&record);
    }
    Ok(keys.len())
}

pub fn to_vec<T: Transaction>(txn: &T, table: &TableDef, predicate: &Predicate) -> Result<Vec<Record>> {
    select(txn, table, predicate)?
        .iter()
        .map(|key| fetch(txn, table, key))
        .collect()
}

pub fn first<T: Transaction>(txn: &T, table: &TableDef, predicate: &Predicate) -> Result<Option<Record>> {
    match select(txn, table, predicate)?.first() {
        Some(key) => Ok(Some(fetch(txn, table, key)?)),
        None => Ok(None),
    }
}

pub fn count<T: Transaction>(txn: &T, table: &TableDef, predicate: &Predicate) -> Result<usize> {
    Ok(select(txn, table, predicate)?.len())
}

/// Overwrites the patched fields of every match, returning the number modified
pub fn modify<T: Transaction>(
    txn: &mut T,
    table: &TableDef,
    predicate: &Predicate,
    patch: &Record,
) -> Result<usize> {
    if patch.contains_key(&table.primary_key) {
        return Err(Error::ConstraintViolation(format!(
            "cannot modify primary key {} of table {}",
            table.primary_key, table.name
        )));
    }

    let keys = select(txn, table, predicate)?;
    for key in keys.iter() {
        let mut record = fetch(txn, table, key)?;
        record.extend(patch.iter().map(|(f, v)| (f.clone(), v.clone())));
        txn.put(table, record)?;
    }
    debug!(table = %table.name, count = keys.len(), "modify");
    Ok(keys.len())
}

/// Deletes every match, returning the number deleted
pub fn delete<T: Transaction>(txn: &mut T, table: &TableDef, predicate: &Predicate) -> Result<usize> {
    let keys = select(txn, table, predicate)?;
    let mut count = 0;
    for key in keys.iter() {
        if txn.delete(table, key)? {
            count += 1;
        }
    }
    debug!(table = %table.name, count, "delete");
    Ok(count)
}

fn fetch<T: Transaction>(txn: &T, table: &TableDef, key: &Value) -> Result<Record> {
    txn.get(table, key)?.ok_or_else(|| Error::NotFound {
        table: table.name.clone(),
        key: key.to_string(),
    })
}
