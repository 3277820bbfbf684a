//! Typed value -> wire rows.
//!
//! The encoder is a serde `Serializer`: a record's derived `Serialize` impl
//! walks its fields in declaration order and every field is classified as a
//! primitive value or an opaque `Any` value. Flattened embeds arrive through
//! serde's flat-map path, so their fields land in the parent's namespace
//! without any extra bookkeeping here.

use serde::ser::{self, Impossible, Serialize, SerializeMap, SerializeStruct, Serializer};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use super::{NameTable, Row, Value, ValueData, ValueKind};

/// Errors raised while encoding or decoding rows. Never retried.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// A field holds a value the row format cannot carry
    #[error("field {field:?} can't be encoded: {reason}")]
    UnsupportedField { field: String, reason: String },

    /// Same column name produced with two incompatible kinds
    #[error("column {column:?} holds {existing} values, got {found}")]
    ConflictingKind {
        column: String,
        existing: ValueKind,
        found: ValueKind,
    },

    /// Two fields of one record map to the same column
    #[error("column {0:?} is produced twice by one record")]
    DuplicateColumn(String),

    /// Top-level item is neither a struct nor a map
    #[error("can't encode {0} as a row, expected a struct or a map")]
    NotARecord(&'static str),

    /// Map key without a string form
    #[error("map key must be a string, integer or char, got {0}")]
    InvalidKey(&'static str),

    /// Binary rowset could not be parsed
    #[error("malformed rowset: {0}")]
    Malformed(String),

    #[error("{0}")]
    Custom(String),
}

impl ser::Error for EncodeError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        EncodeError::Custom(msg.to_string())
    }
}

// ============================================================================
// Encoder
// ============================================================================

/// Incremental encoder sharing one [`NameTable`] across rows.
///
/// Use it directly when a batch mixes record types; [`encode`] covers the
/// homogeneous case.
#[derive(Debug, Default)]
pub struct Encoder {
    names: NameTable,
}

impl Encoder {
    pub fn new() -> Self {
        Encoder::default()
    }

    /// Encode one struct or map into a row, extending the name table with
    /// any new column.
    pub fn encode_row<T: Serialize + ?Sized>(&mut self, item: &T) -> Result<Row, EncodeError> {
        item.serialize(RecordSerializer {
            names: &mut self.names,
        })
    }

    pub fn name_table(&self) -> &NameTable {
        &self.names
    }

    pub fn finish(self) -> NameTable {
        self.names
    }
}

/// Encode a batch into one shared name table and one row per item.
pub fn encode<T: Serialize>(items: &[T]) -> Result<(NameTable, Vec<Row>), EncodeError> {
    let mut encoder = Encoder::new();
    let rows = items
        .iter()
        .map(|item| encoder.encode_row(item))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((encoder.finish(), rows))
}

// ============================================================================
// Record level
// ============================================================================

struct RecordSerializer<'a> {
    names: &'a mut NameTable,
}

fn not_a_record<T>(kind: &'static str) -> Result<T, EncodeError> {
    Err(EncodeError::NotARecord(kind))
}

impl<'a> Serializer for RecordSerializer<'a> {
    type Ok = Row;
    type Error = EncodeError;
    type SerializeSeq = Impossible<Row, EncodeError>;
    type SerializeTuple = Impossible<Row, EncodeError>;
    type SerializeTupleStruct = Impossible<Row, EncodeError>;
    type SerializeTupleVariant = Impossible<Row, EncodeError>;
    type SerializeMap = RowBuilder<'a>;
    type SerializeStruct = RowBuilder<'a>;
    type SerializeStructVariant = Impossible<Row, EncodeError>;

    fn serialize_bool(self, _: bool) -> Result<Row, EncodeError> {
        not_a_record("bool")
    }
    fn serialize_i8(self, _: i8) -> Result<Row, EncodeError> {
        not_a_record("integer")
    }
    fn serialize_i16(self, _: i16) -> Result<Row, EncodeError> {
        not_a_record("integer")
    }
    fn serialize_i32(self, _: i32) -> Result<Row, EncodeError> {
        not_a_record("integer")
    }
    fn serialize_i64(self, _: i64) -> Result<Row, EncodeError> {
        not_a_record("integer")
    }
    fn serialize_u8(self, _: u8) -> Result<Row, EncodeError> {
        not_a_record("integer")
    }
    fn serialize_u16(self, _: u16) -> Result<Row, EncodeError> {
        not_a_record("integer")
    }
    fn serialize_u32(self, _: u32) -> Result<Row, EncodeError> {
        not_a_record("integer")
    }
    fn serialize_u64(self, _: u64) -> Result<Row, EncodeError> {
        not_a_record("integer")
    }
    fn serialize_f32(self, _: f32) -> Result<Row, EncodeError> {
        not_a_record("float")
    }
    fn serialize_f64(self, _: f64) -> Result<Row, EncodeError> {
        not_a_record("float")
    }
    fn serialize_char(self, _: char) -> Result<Row, EncodeError> {
        not_a_record("char")
    }
    fn serialize_str(self, _: &str) -> Result<Row, EncodeError> {
        not_a_record("string")
    }
    fn serialize_bytes(self, _: &[u8]) -> Result<Row, EncodeError> {
        not_a_record("bytes")
    }
    fn serialize_none(self) -> Result<Row, EncodeError> {
        not_a_record("none")
    }
    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<Row, EncodeError> {
        value.serialize(self)
    }
    fn serialize_unit(self) -> Result<Row, EncodeError> {
        not_a_record("unit")
    }
    fn serialize_unit_struct(self, _: &'static str) -> Result<Row, EncodeError> {
        not_a_record("unit struct")
    }
    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> Result<Row, EncodeError> {
        not_a_record("enum")
    }
    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        value: &T,
    ) -> Result<Row, EncodeError> {
        value.serialize(self)
    }
    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: &T,
    ) -> Result<Row, EncodeError> {
        not_a_record("enum")
    }
    fn serialize_seq(self, _: Option<usize>) -> Result<Self::SerializeSeq, EncodeError> {
        not_a_record("sequence")
    }
    fn serialize_tuple(self, _: usize) -> Result<Self::SerializeTuple, EncodeError> {
        not_a_record("tuple")
    }
    fn serialize_tuple_struct(
        self,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeTupleStruct, EncodeError> {
        not_a_record("tuple struct")
    }
    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeTupleVariant, EncodeError> {
        not_a_record("enum")
    }
    fn serialize_map(self, len: Option<usize>) -> Result<RowBuilder<'a>, EncodeError> {
        Ok(RowBuilder::new(self.names, len.unwrap_or(0)))
    }
    fn serialize_struct(self, _: &'static str, len: usize) -> Result<RowBuilder<'a>, EncodeError> {
        Ok(RowBuilder::new(self.names, len))
    }
    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeStructVariant, EncodeError> {
        not_a_record("enum")
    }
}

/// Collects the values of one record.
struct RowBuilder<'a> {
    names: &'a mut NameTable,
    row: Row,
    seen: HashSet<usize>,
    pending_key: Option<String>,
}

impl<'a> RowBuilder<'a> {
    fn new(names: &'a mut NameTable, len: usize) -> Self {
        RowBuilder {
            names,
            row: Vec::with_capacity(len),
            seen: HashSet::with_capacity(len),
            pending_key: None,
        }
    }

    fn push<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> Result<(), EncodeError> {
        let data = match value.serialize(FieldSerializer { field: name })? {
            Field::Value(data) => data,
            Field::Opaque => {
                let encoded = serde_json::to_vec(value).map_err(|e| EncodeError::UnsupportedField {
                    field: name.to_string(),
                    reason: e.to_string(),
                })?;
                ValueData::Any(encoded)
            }
        };

        let id = self.names.column_for(name, data.kind())?;
        if !self.seen.insert(id) {
            return Err(EncodeError::DuplicateColumn(name.to_string()));
        }
        self.row.push(Value { id, data });
        Ok(())
    }
}

impl SerializeStruct for RowBuilder<'_> {
    type Ok = Row;
    type Error = EncodeError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), EncodeError> {
        self.push(key, value)
    }

    fn end(self) -> Result<Row, EncodeError> {
        Ok(self.row)
    }
}

impl SerializeMap for RowBuilder<'_> {
    type Ok = Row;
    type Error = EncodeError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), EncodeError> {
        self.pending_key = Some(key.serialize(KeySerializer)?);
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), EncodeError> {
        let key = self
            .pending_key
            .take()
            .ok_or_else(|| EncodeError::Custom("map value without a key".to_string()))?;
        self.push(&key, value)
    }

    fn end(self) -> Result<Row, EncodeError> {
        Ok(self.row)
    }
}

// ============================================================================
// Field level
// ============================================================================

/// Classification of a single field value.
enum Field {
    Value(ValueData),
    /// Complex value stored as a self-contained `Any` blob
    Opaque,
}

struct FieldSerializer<'a> {
    field: &'a str,
}

impl FieldSerializer<'_> {
    fn out_of_range(&self, kind: &str) -> EncodeError {
        EncodeError::UnsupportedField {
            field: self.field.to_string(),
            reason: format!("{kind} does not fit into 64 bits"),
        }
    }
}

impl Serializer for FieldSerializer<'_> {
    type Ok = Field;
    type Error = EncodeError;
    type SerializeSeq = Opaque;
    type SerializeTuple = Opaque;
    type SerializeTupleStruct = Opaque;
    type SerializeTupleVariant = Opaque;
    type SerializeMap = Opaque;
    type SerializeStruct = Opaque;
    type SerializeStructVariant = Opaque;

    fn serialize_bool(self, v: bool) -> Result<Field, EncodeError> {
        Ok(Field::Value(ValueData::Bool(v)))
    }
    fn serialize_i8(self, v: i8) -> Result<Field, EncodeError> {
        self.serialize_i64(i64::from(v))
    }
    fn serialize_i16(self, v: i16) -> Result<Field, EncodeError> {
        self.serialize_i64(i64::from(v))
    }
    fn serialize_i32(self, v: i32) -> Result<Field, EncodeError> {
        self.serialize_i64(i64::from(v))
    }
    fn serialize_i64(self, v: i64) -> Result<Field, EncodeError> {
        Ok(Field::Value(ValueData::Int64(v)))
    }
    fn serialize_i128(self, v: i128) -> Result<Field, EncodeError> {
        let v = i64::try_from(v).map_err(|_| self.out_of_range("i128"))?;
        self.serialize_i64(v)
    }
    fn serialize_u8(self, v: u8) -> Result<Field, EncodeError> {
        self.serialize_u64(u64::from(v))
    }
    fn serialize_u16(self, v: u16) -> Result<Field, EncodeError> {
        self.serialize_u64(u64::from(v))
    }
    fn serialize_u32(self, v: u32) -> Result<Field, EncodeError> {
        self.serialize_u64(u64::from(v))
    }
    fn serialize_u64(self, v: u64) -> Result<Field, EncodeError> {
        Ok(Field::Value(ValueData::Uint64(v)))
    }
    fn serialize_u128(self, v: u128) -> Result<Field, EncodeError> {
        let v = u64::try_from(v).map_err(|_| self.out_of_range("u128"))?;
        self.serialize_u64(v)
    }
    fn serialize_f32(self, v: f32) -> Result<Field, EncodeError> {
        self.serialize_f64(f64::from(v))
    }
    fn serialize_f64(self, v: f64) -> Result<Field, EncodeError> {
        Ok(Field::Value(ValueData::Float64(v)))
    }
    fn serialize_char(self, v: char) -> Result<Field, EncodeError> {
        let mut buf = [0u8; 4];
        self.serialize_str(v.encode_utf8(&mut buf))
    }
    fn serialize_str(self, v: &str) -> Result<Field, EncodeError> {
        Ok(Field::Value(ValueData::Bytes(v.as_bytes().to_vec())))
    }
    fn serialize_bytes(self, v: &[u8]) -> Result<Field, EncodeError> {
        Ok(Field::Value(ValueData::Bytes(v.to_vec())))
    }
    fn serialize_none(self) -> Result<Field, EncodeError> {
        Ok(Field::Value(ValueData::Null))
    }
    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<Field, EncodeError> {
        value.serialize(self)
    }
    fn serialize_unit(self) -> Result<Field, EncodeError> {
        Ok(Field::Value(ValueData::Null))
    }
    fn serialize_unit_struct(self, _: &'static str) -> Result<Field, EncodeError> {
        Ok(Field::Value(ValueData::Null))
    }
    fn serialize_unit_variant(
        self,
        _: &'static str,
        _: u32,
        variant: &'static str,
    ) -> Result<Field, EncodeError> {
        self.serialize_str(variant)
    }
    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        value: &T,
    ) -> Result<Field, EncodeError> {
        value.serialize(self)
    }
    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: &T,
    ) -> Result<Field, EncodeError> {
        Ok(Field::Opaque)
    }
    fn serialize_seq(self, _: Option<usize>) -> Result<Opaque, EncodeError> {
        Ok(Opaque)
    }
    fn serialize_tuple(self, _: usize) -> Result<Opaque, EncodeError> {
        Ok(Opaque)
    }
    fn serialize_tuple_struct(self, _: &'static str, _: usize) -> Result<Opaque, EncodeError> {
        Ok(Opaque)
    }
    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Opaque, EncodeError> {
        Ok(Opaque)
    }
    fn serialize_map(self, _: Option<usize>) -> Result<Opaque, EncodeError> {
        Ok(Opaque)
    }
    fn serialize_struct(self, _: &'static str, _: usize) -> Result<Opaque, EncodeError> {
        Ok(Opaque)
    }
    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Opaque, EncodeError> {
        Ok(Opaque)
    }
}

/// Marks a compound value as opaque without visiting its contents; the
/// caller serializes the whole value separately.
struct Opaque;

macro_rules! opaque_compound {
    ($($trait:ident :: $method:ident),* $(,)?) => {
        $(
            impl ser::$trait for Opaque {
                type Ok = Field;
                type Error = EncodeError;

                fn $method<T: Serialize + ?Sized>(&mut self, _: &T) -> Result<(), EncodeError> {
                    Ok(())
                }

                fn end(self) -> Result<Field, EncodeError> {
                    Ok(Field::Opaque)
                }
            }
        )*
    };
}

opaque_compound!(
    SerializeSeq::serialize_element,
    SerializeTuple::serialize_element,
    SerializeTupleStruct::serialize_field,
    SerializeTupleVariant::serialize_field,
);

impl SerializeMap for Opaque {
    type Ok = Field;
    type Error = EncodeError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, _: &T) -> Result<(), EncodeError> {
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, _: &T) -> Result<(), EncodeError> {
        Ok(())
    }

    fn end(self) -> Result<Field, EncodeError> {
        Ok(Field::Opaque)
    }
}

impl SerializeStruct for Opaque {
    type Ok = Field;
    type Error = EncodeError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, _: &'static str, _: &T) -> Result<(), EncodeError> {
        Ok(())
    }

    fn end(self) -> Result<Field, EncodeError> {
        Ok(Field::Opaque)
    }
}

impl ser::SerializeStructVariant for Opaque {
    type Ok = Field;
    type Error = EncodeError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, _: &'static str, _: &T) -> Result<(), EncodeError> {
        Ok(())
    }

    fn end(self) -> Result<Field, EncodeError> {
        Ok(Field::Opaque)
    }
}

// ============================================================================
// Map keys
// ============================================================================

struct KeySerializer;

fn invalid_key<T>(kind: &'static str) -> Result<T, EncodeError> {
    Err(EncodeError::InvalidKey(kind))
}

impl Serializer for KeySerializer {
    type Ok = String;
    type Error = EncodeError;
    type SerializeSeq = Impossible<String, EncodeError>;
    type SerializeTuple = Impossible<String, EncodeError>;
    type SerializeTupleStruct = Impossible<String, EncodeError>;
    type SerializeTupleVariant = Impossible<String, EncodeError>;
    type SerializeMap = Impossible<String, EncodeError>;
    type SerializeStruct = Impossible<String, EncodeError>;
    type SerializeStructVariant = Impossible<String, EncodeError>;

    fn serialize_bool(self, _: bool) -> Result<String, EncodeError> {
        invalid_key("bool")
    }
    fn serialize_i8(self, v: i8) -> Result<String, EncodeError> {
        Ok(v.to_string())
    }
    fn serialize_i16(self, v: i16) -> Result<String, EncodeError> {
        Ok(v.to_string())
    }
    fn serialize_i32(self, v: i32) -> Result<String, EncodeError> {
        Ok(v.to_string())
    }
    fn serialize_i64(self, v: i64) -> Result<String, EncodeError> {
        Ok(v.to_string())
    }
    fn serialize_u8(self, v: u8) -> Result<String, EncodeError> {
        Ok(v.to_string())
    }
    fn serialize_u16(self, v: u16) -> Result<String, EncodeError> {
        Ok(v.to_string())
    }
    fn serialize_u32(self, v: u32) -> Result<String, EncodeError> {
        Ok(v.to_string())
    }
    fn serialize_u64(self, v: u64) -> Result<String, EncodeError> {
        Ok(v.to_string())
    }
    fn serialize_f32(self, _: f32) -> Result<String, EncodeError> {
        invalid_key("float")
    }
    fn serialize_f64(self, _: f64) -> Result<String, EncodeError> {
        invalid_key("float")
    }
    fn serialize_char(self, v: char) -> Result<String, EncodeError> {
        Ok(v.to_string())
    }
    fn serialize_str(self, v: &str) -> Result<String, EncodeError> {
        Ok(v.to_string())
    }
    fn serialize_bytes(self, _: &[u8]) -> Result<String, EncodeError> {
        invalid_key("bytes")
    }
    fn serialize_none(self) -> Result<String, EncodeError> {
        invalid_key("none")
    }
    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<String, EncodeError> {
        value.serialize(self)
    }
    fn serialize_unit(self) -> Result<String, EncodeError> {
        invalid_key("unit")
    }
    fn serialize_unit_struct(self, _: &'static str) -> Result<String, EncodeError> {
        invalid_key("unit struct")
    }
    fn serialize_unit_variant(
        self,
        _: &'static str,
        _: u32,
        variant: &'static str,
    ) -> Result<String, EncodeError> {
        Ok(variant.to_string())
    }
    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        value: &T,
    ) -> Result<String, EncodeError> {
        value.serialize(self)
    }
    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: &T,
    ) -> Result<String, EncodeError> {
        invalid_key("enum")
    }
    fn serialize_seq(self, _: Option<usize>) -> Result<Self::SerializeSeq, EncodeError> {
        invalid_key("sequence")
    }
    fn serialize_tuple(self, _: usize) -> Result<Self::SerializeTuple, EncodeError> {
        invalid_key("tuple")
    }
    fn serialize_tuple_struct(
        self,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeTupleStruct, EncodeError> {
        invalid_key("tuple struct")
    }
    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeTupleVariant, EncodeError> {
        invalid_key("enum")
    }
    fn serialize_map(self, _: Option<usize>) -> Result<Self::SerializeMap, EncodeError> {
        invalid_key("map")
    }
    fn serialize_struct(self, _: &'static str, _: usize) -> Result<Self::SerializeStruct, EncodeError> {
        invalid_key("struct")
    }
    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeStructVariant, EncodeError> {
        invalid_key("enum")
    }
}
