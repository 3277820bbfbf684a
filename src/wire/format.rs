//! Rowset layouts.
//!
//! Binary layout (all integers little-endian), used as one RPC attachment:
//!
//! ```text
//! rowset := u32 column_count { u32 name_len name_bytes }
//!           u32 row_count { row }
//! row    := u32 value_count { value }
//! value  := u8 tag  u32 column_id  payload
//! ```
//!
//! | tag | kind | payload |
//! |-----|------|---------|
//! | 0 | Null | none |
//! | 1 | Int64 | 8 bytes |
//! | 2 | Uint64 | 8 bytes |
//! | 3 | Float64 | 8 bytes |
//! | 4 | Bool | 1 byte |
//! | 5 | Bytes | u32 len + bytes |
//! | 6 | Any | u32 len + bytes |
//!
//! The HTTP path carries rows as JSON objects instead; see [`rows_to_json`].

use serde_json::{Map, Value as Json};

use super::{EncodeError, NameTable, Row, Value, ValueData};

const TAG_NULL: u8 = 0;
const TAG_INT64: u8 = 1;
const TAG_UINT64: u8 = 2;
const TAG_FLOAT64: u8 = 3;
const TAG_BOOL: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_ANY: u8 = 6;

fn put_u32(buf: &mut Vec<u8>, v: usize) {
    buf.extend_from_slice(&(v as u32).to_le_bytes());
}

fn put_blob(buf: &mut Vec<u8>, bytes: &[u8]) {
    put_u32(buf, bytes.len());
    buf.extend_from_slice(bytes);
}

/// Serialize a name table and its rows into one buffer.
pub fn write_rowset(names: &NameTable, rows: &[Row]) -> Vec<u8> {
    let mut buf = Vec::new();

    put_u32(&mut buf, names.len());
    for column in names.columns() {
        put_blob(&mut buf, column.name.as_bytes());
    }

    put_u32(&mut buf, rows.len());
    for row in rows {
        put_u32(&mut buf, row.len());
        for value in row {
            let tag = match &value.data {
                ValueData::Null => TAG_NULL,
                ValueData::Int64(_) => TAG_INT64,
                ValueData::Uint64(_) => TAG_UINT64,
                ValueData::Float64(_) => TAG_FLOAT64,
                ValueData::Bool(_) => TAG_BOOL,
                ValueData::Bytes(_) => TAG_BYTES,
                ValueData::Any(_) => TAG_ANY,
            };
            buf.push(tag);
            put_u32(&mut buf, value.id);
            match &value.data {
                ValueData::Null => {}
                ValueData::Int64(v) => buf.extend_from_slice(&v.to_le_bytes()),
                ValueData::Uint64(v) => buf.extend_from_slice(&v.to_le_bytes()),
                ValueData::Float64(v) => buf.extend_from_slice(&v.to_le_bytes()),
                ValueData::Bool(v) => buf.push(u8::from(*v)),
                ValueData::Bytes(v) | ValueData::Any(v) => put_blob(&mut buf, v),
            }
        }
    }
    buf
}

/// Cursor over a rowset buffer.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], EncodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| EncodeError::Malformed(format!("truncated at offset {}", self.pos)))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], EncodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u32(&mut self) -> Result<usize, EncodeError> {
        Ok(u32::from_le_bytes(self.array()?) as usize)
    }

    fn blob(&mut self) -> Result<Vec<u8>, EncodeError> {
        let len = self.u32()?;
        Ok(self.take(len)?.to_vec())
    }

    /// Upper bound for a count field: every element needs at least
    /// `min_size` more bytes.
    fn count(&mut self, min_size: usize) -> Result<usize, EncodeError> {
        let count = self.u32()?;
        let remaining = self.buf.len() - self.pos;
        if count.saturating_mul(min_size) > remaining {
            return Err(EncodeError::Malformed(format!(
                "count {count} exceeds remaining {remaining} bytes"
            )));
        }
        Ok(count)
    }
}

/// Parse a buffer produced by [`write_rowset`].
pub fn read_rowset(buf: &[u8]) -> Result<(NameTable, Vec<Row>), EncodeError> {
    let mut reader = Reader { buf, pos: 0 };

    let column_count = reader.count(4)?;
    let mut names = Vec::with_capacity(column_count);
    for _ in 0..column_count {
        let raw = reader.blob()?;
        let name = String::from_utf8(raw)
            .map_err(|_| EncodeError::Malformed("column name is not UTF-8".to_string()))?;
        names.push(name);
    }
    let table = NameTable::from_names(names);
    if table.len() != column_count {
        return Err(EncodeError::Malformed("duplicate column name".to_string()));
    }

    let row_count = reader.count(4)?;
    let mut rows = Vec::with_capacity(row_count);
    for _ in 0..row_count {
        let value_count = reader.count(5)?;
        let mut row = Vec::with_capacity(value_count);
        for _ in 0..value_count {
            let [tag] = reader.array::<1>()?;
            let id = reader.u32()?;
            if id >= table.len() {
                return Err(EncodeError::Malformed(format!("unknown column id {id}")));
            }
            let data = match tag {
                TAG_NULL => ValueData::Null,
                TAG_INT64 => ValueData::Int64(i64::from_le_bytes(reader.array()?)),
                TAG_UINT64 => ValueData::Uint64(u64::from_le_bytes(reader.array()?)),
                TAG_FLOAT64 => ValueData::Float64(f64::from_le_bytes(reader.array()?)),
                TAG_BOOL => ValueData::Bool(reader.array::<1>()?[0] != 0),
                TAG_BYTES => ValueData::Bytes(reader.blob()?),
                TAG_ANY => ValueData::Any(reader.blob()?),
                other => return Err(EncodeError::Malformed(format!("unknown value tag {other}"))),
            };
            row.push(Value { id, data });
        }
        rows.push(row);
    }

    if reader.pos != buf.len() {
        return Err(EncodeError::Malformed(format!(
            "{} trailing bytes",
            buf.len() - reader.pos
        )));
    }
    Ok((table, rows))
}

// ============================================================================
// JSON view
// ============================================================================

/// One row as a JSON object keyed by column name.
///
/// `Bytes` values become strings (lossy for non-UTF-8 data) and `Any` values
/// are embedded as parsed JSON.
pub fn row_to_json(names: &NameTable, row: &Row) -> Result<Map<String, Json>, EncodeError> {
    let mut object = Map::with_capacity(row.len());
    for value in row {
        let name = names
            .name(value.id)
            .ok_or_else(|| EncodeError::Malformed(format!("unknown column id {}", value.id)))?;
        let json = match &value.data {
            ValueData::Null => Json::Null,
            ValueData::Int64(v) => Json::from(*v),
            ValueData::Uint64(v) => Json::from(*v),
            ValueData::Float64(v) => Json::from(*v),
            ValueData::Bool(v) => Json::Bool(*v),
            ValueData::Bytes(v) => Json::String(String::from_utf8_lossy(v).into_owned()),
            ValueData::Any(v) => serde_json::from_slice(v).map_err(|e| EncodeError::UnsupportedField {
                field: name.to_string(),
                reason: e.to_string(),
            })?,
        };
        object.insert(name.to_string(), json);
    }
    Ok(object)
}

pub fn rows_to_json(names: &NameTable, rows: &[Row]) -> Result<Vec<Json>, EncodeError> {
    rows.iter()
        .map(|row| row_to_json(names, row).map(Json::Object))
        .collect()
}
