use std::{cmp::Ordering, fmt::Display, ops::Bound};

use crate::{
    error::{Error, Result},
    schema::TableDef,
    types::Value,
};

use super::{engine::ValueRange, query::Predicate};

/// Test applied to a single field value
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Equal to any of the values; values of other types simply don't match
    Equals(Vec<Value>),
    /// String starting with the prefix, compared lowercase
    StartsWith(String),
    Above { bound: Value, exclusive: bool },
    Below { bound: Value, exclusive: bool },
}

impl Condition {
    /// Whether a field value satisfies the condition
    ///
    /// Null never matches. Ordering and prefix tests against a value of an
    /// incompatible type fail with a constraint violation.
    pub fn matches(&self, value: &Value) -> Result<bool> {
        if value.is_null() {
            return Ok(false);
        }
        Ok(match self {
            Condition::Equals(values) => values
                .iter()
                .any(|v| value.partial_cmp(v) == Some(Ordering::Equal)),
            Condition::StartsWith(prefix) => match value {
                Value::String(s) => s.to_lowercase().starts_with(prefix.as_str()),
                v => {
                    return Err(Error::ConstraintViolation(format!(
                        "cannot match prefix {:?} against {} {}",
                        prefix,
                        v.type_name(),
                        v
                    )));
                }
            },
            Condition::Above { bound, exclusive } => match value.compare(bound)? {
                Ordering::Greater => true,
                Ordering::Equal => !exclusive,
                Ordering::Less => false,
            },
            Condition::Below { bound, exclusive } => match value.compare(bound)? {
                Ordering::Less => true,
                Ordering::Equal => !exclusive,
                Ordering::Greater => false,
            },
        })
    }
}

impl Condition {
    /// Value range covered by an ordering condition, `None` for the others
    pub fn range(&self) -> Option<ValueRange> {
        let bound = |v: &Value, exclusive: bool| {
            if exclusive { Bound::Excluded(v.clone()) } else { Bound::Included(v.clone()) }
        };
        match self {
            Condition::Above { bound: v, exclusive } => Some((bound(v, *exclusive), Bound::Unbounded)),
            Condition::Below { bound: v, exclusive } => Some((Bound::Unbounded, bound(v, *exclusive))),
            Condition::Equals(_) | Condition::StartsWith(_) => None,
        }
    }

    /// The value an ordering condition compares against
    pub fn bound(&self) -> Option<&Value> {
        match self {
            Condition::Above { bound, .. } | Condition::Below { bound, .. } => Some(bound),
            Condition::Equals(_) | Condition::StartsWith(_) => None,
        }
    }
}

impl Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Condition::Equals(values) => {
                let values = values.iter().map(|v| v.to_string()).collect::<Vec<_>>();
                write!(f, "in [{}]", values.join(", "))
            }
            Condition::StartsWith(prefix) => write!(f, "starts with {:?}", prefix),
            Condition::Above { bound, exclusive: true } => write!(f, "> {}", bound),
            Condition::Above { bound, exclusive: false } => write!(f, ">= {}", bound),
            Condition::Below { bound, exclusive: true } => write!(f, "< {}", bound),
            Condition::Below { bound, exclusive: false } => write!(f, "<= {}", bound),
        }
    }
}

/// Query plan node, producing a set of primary keys
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Point reads by primary key
    KeyLookup { keys: Vec<Value> },
    /// Range of primary keys, or a walk over all of them for prefixes
    KeyScan { condition: Condition },
    /// Point reads of a secondary index
    IndexLookup { field: String, values: Vec<Value> },
    /// Range of a secondary index, or a walk over all of it for prefixes
    IndexScan { field: String, condition: Condition },
    /// Read every record, testing a non-indexed field
    Filter { field: String, condition: Condition },
    Intersect(Box<Node>, Box<Node>),
    Union(Box<Node>, Box<Node>),
}

impl Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::KeyLookup { keys } => {
                let keys = keys.iter().map(|v| v.to_string()).collect::<Vec<_>>();
                write!(f, "KeyLookup [{}]", keys.join(", "))
            }
            Node::KeyScan { condition } => write!(f, "KeyScan key {}", condition),
            Node::IndexLookup { field, values } => {
                let values = values.iter().map(|v| v.to_string()).collect::<Vec<_>>();
                write!(f, "IndexLookup {} [{}]", field, values.join(", "))
            }
            Node::IndexScan { field, condition } => write!(f, "IndexScan {} {}", field, condition),
            Node::Filter { field, condition } => write!(f, "Filter {} {}", field, condition),
            Node::Intersect(l, r) => write!(f, "({}) AND ({})", l, r),
            Node::Union(l, r) => write!(f, "({}) OR ({})", l, r),
        }
    }
}

/// Execution plan for a predicate over one table
#[derive(Debug, Clone, PartialEq)]
pub struct Plan(pub Node);

impl Plan {
    pub fn build(table: &TableDef, predicate: &Predicate) -> Self {
        Plan(Planner::new(table).build_node(predicate))
    }
}

impl Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Picks an access path for every leaf of a predicate
pub struct Planner<'a> {
    table: &'a TableDef,
}

impl<'a> Planner<'a> {
    pub fn new(table: &'a TableDef) -> Self {
        Self { table }
    }

    fn build_node(&self, predicate: &Predicate) -> Node {
        match predicate {
            Predicate::And(l, r) => Node::Intersect(
                Box::new(self.build_node(l)),
                Box::new(self.build_node(r)),
            ),
            Predicate::Or(l, r) => Node::Union(
                Box::new(self.build_node(l)),
                Box::new(self.build_node(r)),
            ),
            Predicate::Equals(field, value) => self.lookup(field, vec![value.clone()]),
            Predicate::AnyOf(field, values) => self.lookup(field, values.clone()),
            Predicate::StartsWithIgnoreCase(field, prefix) => {
                self.scan(field, Condition::StartsWith(prefix.to_lowercase()))
            }
            Predicate::Above { field, bound, exclusive } => self.scan(
                field,
                Condition::Above { bound: bound.clone(), exclusive: *exclusive },
            ),
            Predicate::Below { field, bound, exclusive } => self.scan(
                field,
                Condition::Below { bound: bound.clone(), exclusive: *exclusive },
            ),
        }
    }

    fn lookup(&self, field: &str, values: Vec<Value>) -> Node {
        // Null is never stored under a key or an index entry
        let values = values.into_iter().filter(|v| !v.is_null()).collect::<Vec<_>>();
        if field == self.table.primary_key {
            Node::KeyLookup { keys: values }
        } else if self.table.has_index(field) {
            Node::IndexLookup { field: field.to_string(), values }
        } else {
            Node::Filter { field: field.to_string(), condition: Condition::Equals(values) }
        }
    }

    fn scan(&self, field: &str, condition: Condition) -> Node {
        if field == self.table.primary_key {
            Node::KeyScan { condition }
        } else if self.table.has_index(field) {
            Node::IndexScan { field: field.to_string(), condition }
        } else {
            Node::Filter { field: field.to_string(), condition }
        }
    }
}
