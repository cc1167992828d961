//! Runtime values produced by providers and by the evaluator.
//!
//! Values compare and hash structurally, which is what makes composite keys
//! usable as lookup keys in [`EagerLoadingContext`](crate::eager::EagerLoadingContext).
//! Floats compare by bit pattern so that `Value` can be `Eq`.

use compact_str::CompactString;
use core::cmp::Ordering;
use core::hash::{Hash, Hasher};
use smallvec::SmallVec;
use std::sync::Arc;

/// Scalar and composite value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    Text,
    Bytes,
    Record,
    List,
    Key,
    Keyed,
    Grouping,
}

impl ValueKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Text => "text",
            ValueKind::Bytes => "bytes",
            ValueKind::Record => "record",
            ValueKind::List => "list",
            ValueKind::Key => "key",
            ValueKind::Keyed => "keyed",
            ValueKind::Grouping => "grouping",
        }
    }

    /// Kind implied by a declared column type name, using SQLite affinity rules.
    pub fn from_data_type_name(name: &str) -> ValueKind {
        let upper = name.to_ascii_uppercase();
        if upper.contains("BOOL") {
            ValueKind::Bool
        } else if upper.contains("INT") {
            ValueKind::Int
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            ValueKind::Text
        } else if upper.contains("BLOB") || upper.is_empty() {
            ValueKind::Bytes
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            ValueKind::Float
        } else {
            ValueKind::Null
        }
    }
}

impl core::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named set of fields: a table row or a projected record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    pub name: CompactString,
    pub fields: SmallVec<[(CompactString, Value); 8]>,
}

impl Record {
    pub fn new(name: impl Into<CompactString>) -> Self {
        Self {
            name: name.into(),
            fields: SmallVec::new(),
        }
    }

    pub fn with(mut self, field: impl Into<CompactString>, value: impl Into<Value>) -> Self {
        self.fields.push((field.into(), value.into()));
        self
    }

    pub fn push(&mut self, field: impl Into<CompactString>, value: Value) {
        self.fields.push((field.into(), value));
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }
}

/// A `(key, data)` pair: carrier rows and key/detail envelopes at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyedValue {
    pub key: Value,
    pub data: Value,
}

/// One group produced by `GroupBy`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Grouping {
    pub key: Value,
    pub items: Arc<[Value]>,
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(CompactString),
    Bytes(Arc<[u8]>),
    Record(Arc<Record>),
    List(Arc<[Value]>),
    /// One level of a composite key. A full-width level may nest the
    /// remaining components in its last slot.
    Key(Arc<[Value]>),
    Keyed(Arc<KeyedValue>),
    Grouping(Arc<Grouping>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Text(_) => ValueKind::Text,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Record(_) => ValueKind::Record,
            Value::List(_) => ValueKind::List,
            Value::Key(_) => ValueKind::Key,
            Value::Keyed(_) => ValueKind::Keyed,
            Value::Grouping(_) => ValueKind::Grouping,
        }
    }

    pub fn list(items: impl Into<Arc<[Value]>>) -> Value {
        Value::List(items.into())
    }

    pub fn empty_list() -> Value {
        Value::List(Arc::from(Vec::new()))
    }

    pub fn keyed(key: Value, data: Value) -> Value {
        Value::Keyed(Arc::new(KeyedValue { key, data }))
    }

    pub fn record(record: Record) -> Value {
        Value::Record(Arc::new(record))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            Value::Grouping(group) => Some(&group.items),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_keyed(&self) -> Option<&KeyedValue> {
        match self {
            Value::Keyed(keyed) => Some(keyed),
            _ => None,
        }
    }

    /// Field of a record value. `None` for missing fields and non-records.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.as_record().and_then(|record| record.get(name))
    }

    /// Total order used by `OrderBy`, `Min` and `Max`.
    ///
    /// Nulls sort first, integers and floats compare numerically, everything
    /// else compares within its own kind and by kind rank across kinds.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                let (a, b) = (self.as_f64().unwrap_or(0.0), other.as_f64().unwrap_or(0.0));
                a.total_cmp(&b)
            }
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Record(a), Value::Record(b)) => a.name.cmp(&b.name).then_with(|| {
                compare_seq(
                    a.fields.iter().map(|(_, v)| v),
                    b.fields.iter().map(|(_, v)| v),
                )
            }),
            (Value::List(a), Value::List(b)) | (Value::Key(a), Value::Key(b)) => {
                compare_seq(a.iter(), b.iter())
            }
            (Value::Keyed(a), Value::Keyed(b)) => a
                .key
                .compare(&b.key)
                .then_with(|| a.data.compare(&b.data)),
            (Value::Grouping(a), Value::Grouping(b)) => a.key.compare(&b.key),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Text(_) => 3,
            Value::Bytes(_) => 4,
            Value::Record(_) => 5,
            Value::List(_) => 6,
            Value::Key(_) => 7,
            Value::Keyed(_) => 8,
            Value::Grouping(_) => 9,
        }
    }
}

fn compare_seq<'a>(
    mut a: impl Iterator<Item = &'a Value>,
    mut b: impl Iterator<Item = &'a Value>,
) -> Ordering {
    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match x.compare(y) {
                Ordering::Equal => continue,
                other => return other,
            },
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Key(a), Value::Key(b)) => a == b,
            (Value::Keyed(a), Value::Keyed(b)) => a == b,
            (Value::Grouping(a), Value::Grouping(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
            Value::Bytes(b) => b.hash(state),
            Value::Record(r) => r.hash(state),
            Value::List(items) | Value::Key(items) => items.hash(state),
            Value::Keyed(k) => k.hash(state),
            Value::Grouping(g) => g.hash(state),
        }
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(CompactString::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(CompactString::from(value))
    }
}

impl From<CompactString> for Value {
    fn from(value: CompactString) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(Arc::from(value))
    }
}

impl From<Record> for Value {
    fn from(value: Record) -> Self {
        Value::record(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}
