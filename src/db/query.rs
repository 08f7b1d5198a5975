use crate::types::Value;

/// Declarative condition over record fields
///
/// Built up front and handed to the planner, which decides per leaf whether
/// to answer it from the primary key, a secondary index or a full scan.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Equals(String, Value),
    AnyOf(String, Vec<Value>),
    StartsWithIgnoreCase(String, String),
    /// `field > bound`, or `field >= bound` when not exclusive
    Above { field: String, bound: Value, exclusive: bool },
    /// `field < bound`, or `field <= bound` when not exclusive
    Below { field: String, bound: Value, exclusive: bool },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals(field.into(), value.into())
    }

    pub fn any_of<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::AnyOf(field.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn starts_with_ignore_case(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::StartsWithIgnoreCase(field.into(), prefix.into())
    }

    /// Strictly greater than `bound`
    pub fn above(field: impl Into<String>, bound: impl Into<Value>) -> Self {
        Self::Above { field: field.into(), bound: bound.into(), exclusive: true }
    }

    pub fn above_or_equal(field: impl Into<String>, bound: impl Into<Value>) -> Self {
        Self::Above { field: field.into(), bound: bound.into(), exclusive: false }
    }

    /// Strictly less than `bound`
    pub fn below(field: impl Into<String>, bound: impl Into<Value>) -> Self {
        Self::Below { field: field.into(), bound: bound.into(), exclusive: true }
    }

    pub fn below_or_equal(field: impl Into<String>, bound: impl Into<Value>) -> Self {
        Self::Below { field: field.into(), bound: bound.into(), exclusive: false }
    }

    /// Inclusive lower and exclusive upper bound, `lower <= field < upper`
    pub fn between(field: impl Into<String>, lower: impl Into<Value>, upper: impl Into<Value>) -> Self {
        let field = field.into();
        Self::above_or_equal(field.clone(), lower).and(Self::below(field, upper))
    }

    pub fn and(self, other: Predicate) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    /// Field names referenced anywhere in the predicate
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Self::Equals(field, _)
            | Self::AnyOf(field, _)
            | Self::StartsWithIgnoreCase(field, _)
            | Self::Above { field, .. }
            | Self::Below { field, .. } => vec![field.as_str()],
            Self::And(l, r) | Self::Or(l, r) => {
                let mut fields = l.fields();
                fields.extend(r.fields());
                fields
            }
        }
    }
}
