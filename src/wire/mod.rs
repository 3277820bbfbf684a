//! Wire Rows
//!
//! Typed records travel as rows of tagged values. Column names are listed
//! once in a [`NameTable`]; each [`Value`] refers to its column by index.
//!
//! # Module Structure
//!
//! - `encode` - typed value (struct or map) -> [`NameTable`] + [`Row`]s
//! - `format` - binary rowset layout used as an RPC attachment, and the JSON
//!   view of rows used by the HTTP path
//!
//! # Mapping Rust types
//!
//! Encoding is driven by each type's `Serialize` impl, which acts as the
//! per-type schema descriptor:
//!
//! | Rust | Column kind |
//! |------|-------------|
//! | `i8`..`i64` | `Int64` |
//! | `u8`..`u64` | `Uint64` |
//! | `f32`, `f64` | `Float64` |
//! | `bool` | `Bool` |
//! | `String`, `&str`, bytes via [`serialize_bytes`] | `Bytes` |
//! | `None`, `()` | `Null` |
//! | nested structs, maps, sequences | `Any` (self-contained JSON) |
//!
//! Field attributes map onto the encoding rules:
//!
//! - `#[serde(flatten)]` on an embedded struct promotes its fields into the
//!   parent's columns; an `Option` that is `None` contributes nothing
//! - an embedded struct without `flatten` is one `Any` column named after the
//!   field (or its `rename`)
//! - `#[serde(skip_serializing_if = "ytclient::wire::is_default")]` omits a
//!   field holding its default value

mod encode;
pub mod format;

pub use encode::{encode, EncodeError, Encoder};
pub use format::{read_rowset, row_to_json, rows_to_json, write_rowset};

use serde::Serializer;
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Values
// ============================================================================

/// Kind of a wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Int64,
    Uint64,
    Float64,
    Bool,
    Bytes,
    Any,
    Null,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Int64 => "int64",
            ValueKind::Uint64 => "uint64",
            ValueKind::Float64 => "double",
            ValueKind::Bool => "boolean",
            ValueKind::Bytes => "string",
            ValueKind::Any => "any",
            ValueKind::Null => "null",
        };
        f.write_str(name)
    }
}

/// Payload of a wire value.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueData {
    Int64(i64),
    Uint64(u64),
    Float64(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    /// Self-contained serialization of a complex value
    Any(Vec<u8>),
    Null,
}

impl ValueData {
    pub fn kind(&self) -> ValueKind {
        match self {
            ValueData::Int64(_) => ValueKind::Int64,
            ValueData::Uint64(_) => ValueKind::Uint64,
            ValueData::Float64(_) => ValueKind::Float64,
            ValueData::Bool(_) => ValueKind::Bool,
            ValueData::Bytes(_) => ValueKind::Bytes,
            ValueData::Any(_) => ValueKind::Any,
            ValueData::Null => ValueKind::Null,
        }
    }
}

/// A single cell: column index plus payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    /// Index into the [`NameTable`] in effect for this row
    pub id: usize,
    pub data: ValueData,
}

impl Value {
    pub fn int64(id: usize, v: i64) -> Self {
        Value { id, data: ValueData::Int64(v) }
    }

    pub fn uint64(id: usize, v: u64) -> Self {
        Value { id, data: ValueData::Uint64(v) }
    }

    pub fn float64(id: usize, v: f64) -> Self {
        Value { id, data: ValueData::Float64(v) }
    }

    pub fn boolean(id: usize, v: bool) -> Self {
        Value { id, data: ValueData::Bool(v) }
    }

    pub fn bytes(id: usize, v: impl Into<Vec<u8>>) -> Self {
        Value { id, data: ValueData::Bytes(v.into()) }
    }

    pub fn any(id: usize, v: impl Into<Vec<u8>>) -> Self {
        Value { id, data: ValueData::Any(v.into()) }
    }

    pub fn null(id: usize) -> Self {
        Value { id, data: ValueData::Null }
    }

    pub fn kind(&self) -> ValueKind {
        self.data.kind()
    }

    pub fn is_null(&self) -> bool {
        matches!(self.data, ValueData::Null)
    }
}

/// Values of one encoded record, in field order.
pub type Row = Vec<Value>;

// ============================================================================
// Name Table
// ============================================================================

/// Column descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    pub name: String,
}

/// Ordered column names; a column's index is the position where its name was
/// first seen. Grows during encoding and never shrinks.
#[derive(Debug, Clone, Default)]
pub struct NameTable {
    columns: Vec<Column>,
    kinds: Vec<Option<ValueKind>>,
    index: HashMap<String, usize>,
}

impl PartialEq for NameTable {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
    }
}

impl NameTable {
    pub fn new() -> Self {
        NameTable::default()
    }

    /// Build a table from names in order; duplicates keep their first index.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = NameTable::new();
        for name in names {
            table.register(name.into());
        }
        table
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn name(&self, id: usize) -> Option<&str> {
        self.columns.get(id).map(|c| c.name.as_str())
    }

    pub fn id(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Kind fixed by the first non-null value stored in a column.
    pub fn kind(&self, id: usize) -> Option<ValueKind> {
        self.kinds.get(id).copied().flatten()
    }

    fn register(&mut self, name: String) -> usize {
        if let Some(&id) = self.index.get(&name) {
            return id;
        }
        let id = self.columns.len();
        self.index.insert(name.clone(), id);
        self.columns.push(Column { name });
        self.kinds.push(None);
        id
    }

    /// Index for `name`, registering it on first sight. A column keeps the
    /// kind of its first non-null value; a different kind later is a schema
    /// conflict.
    pub(crate) fn column_for(&mut self, name: &str, kind: ValueKind) -> Result<usize, EncodeError> {
        let id = self.register(name.to_string());
        if kind == ValueKind::Null {
            return Ok(id);
        }
        match self.kinds[id] {
            None => {
                self.kinds[id] = Some(kind);
                Ok(id)
            }
            Some(existing) if existing == kind => Ok(id),
            Some(existing) => Err(EncodeError::ConflictingKind {
                column: name.to_string(),
                existing,
                found: kind,
            }),
        }
    }
}

// ============================================================================
// Field helpers
// ============================================================================

/// `skip_serializing_if` predicate: omit a field holding its default value.
pub fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

/// `serialize_with` helper storing a byte buffer as a `Bytes` value rather
/// than a sequence of integers.
pub fn serialize_bytes<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: AsRef<[u8]>,
    S: Serializer,
{
    serializer.serialize_bytes(value.as_ref())
}
