//! Encoding of column metadata and row streams.

use std::io::Write;

use crate::codec::io::{
    write_bool, write_f32, write_f64, write_i16, write_i32, write_i64, write_i8, write_str,
};
use crate::error::CodecError;
use crate::traits::RowSource;
use crate::types::{ColumnDef, ColumnKind, SqlValue};

/// Outcome of a successful [`encode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeSummary {
    pub columns: usize,
    pub rows: u32,
}

/// Writes the column count followed by each column's metadata.
///
/// # Errors
///
/// Fails on I/O errors or if there are more than `i32::MAX` columns.
pub fn write_header<W: Write>(out: &mut W, columns: &[ColumnDef]) -> Result<(), CodecError> {
    let count = i32::try_from(columns.len())
        .map_err(|_| CodecError::corrupt("more than i32::MAX columns"))?;
    write_i32(out, count)?;
    for col in columns {
        write_str(out, &col.catalog)?;
        write_str(out, &col.class_name)?;
        write_str(out, &col.label)?;
        write_str(out, &col.name)?;
        write_str(out, &col.type_name)?;
        write_i32(out, col.sql_type)?;
        write_i32(out, col.display_size)?;
        write_i32(out, col.precision)?;
        write_str(out, &col.table_name)?;
        write_i32(out, col.scale)?;
        write_str(out, &col.schema_name)?;
        write_bool(out, col.auto_increment)?;
        write_bool(out, col.case_sensitive)?;
        write_bool(out, col.currency)?;
        write_bool(out, col.definitely_writable)?;
        write_i32(out, col.nullable.as_i32())?;
        write_bool(out, col.read_only)?;
        write_bool(out, col.searchable)?;
        write_bool(out, col.signed)?;
        write_bool(out, col.writable)?;
    }
    Ok(())
}

/// Encodes a whole row source: header, then every row numbered from 1.
///
/// # Errors
///
/// Returns the source's own error wrapped in [`CodecError::Source`], a
/// [`CodecError::TypeMismatch`] / [`CodecError::RowWidth`] for rows that do not
/// fit the declared columns, or an I/O error from `out`.
pub fn encode<W: Write>(out: &mut W, source: &mut dyn RowSource) -> Result<EncodeSummary, CodecError> {
    let kinds: Vec<ColumnKind> = source.columns().iter().map(ColumnDef::kind).collect();
    write_header(out, source.columns())?;

    let mut position: i32 = 0;
    while let Some(row) = source.next_row()? {
        position = position.checked_add(1).ok_or(CodecError::TooManyRows)?;
        if row.len() != kinds.len() {
            return Err(CodecError::RowWidth {
                row: position,
                expected: kinds.len(),
                found: row.len(),
            });
        }
        write_i32(out, position)?;
        for (column, (kind, cell)) in kinds.iter().zip(&row).enumerate() {
            write_cell(out, column + 1, *kind, cell.as_ref())?;
        }
    }

    let summary = EncodeSummary {
        columns: kinds.len(),
        rows: position.unsigned_abs(),
    };
    tracing::debug!(columns = summary.columns, rows = summary.rows, "encoded result set");
    Ok(summary)
}

/// Encodes into a fresh buffer.
///
/// # Errors
///
/// See [`encode`].
pub fn encode_to_vec(source: &mut dyn RowSource) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    encode(&mut buf, source)?;
    Ok(buf)
}

fn write_cell<W: Write>(
    out: &mut W,
    column: usize,
    kind: ColumnKind,
    cell: Option<&SqlValue>,
) -> Result<(), CodecError> {
    let Some(value) = cell else {
        return write_bool(out, false);
    };
    if kind == ColumnKind::Opaque {
        // Unsupported families are always stored as absent.
        return write_bool(out, false);
    }
    let value = coerce(kind, value).ok_or(CodecError::TypeMismatch { column, kind })?;
    write_bool(out, true)?;
    match value {
        SqlValue::Bool(v) => write_bool(out, v),
        SqlValue::TinyInt(v) => write_i8(out, v),
        SqlValue::SmallInt(v) => write_i16(out, v),
        SqlValue::Int(v) => write_i32(out, v),
        SqlValue::BigInt(v) | SqlValue::Date(v) | SqlValue::Time(v) | SqlValue::Timestamp(v) => {
            write_i64(out, v)
        }
        SqlValue::Float(v) => write_f32(out, v),
        SqlValue::Double(v) => write_f64(out, v),
        SqlValue::Text(ref s) | SqlValue::RowId(ref s) | SqlValue::Clob(ref s) => write_str(out, s),
    }
}

/// Maps a value onto the payload variant for `kind`, or `None` if it does not fit.
///
/// Decimal and double columns take any numeric value (decimals are stored as
/// 64-bit floats). Character columns take any textual value. Temporal columns
/// take any temporal value.
fn coerce(kind: ColumnKind, value: &SqlValue) -> Option<SqlValue> {
    use ColumnKind as K;
    use SqlValue as V;

    let coerced = match (kind, value) {
        (K::Boolean, V::Bool(v)) => V::Bool(*v),
        (K::TinyInt, V::TinyInt(v)) => V::TinyInt(*v),
        (K::SmallInt, V::SmallInt(v)) => V::SmallInt(*v),
        (K::Integer, V::Int(v)) => V::Int(*v),
        (K::BigInt, V::BigInt(v)) => V::BigInt(*v),
        (K::Real, V::Float(v)) => V::Float(*v),
        (K::Double | K::Decimal, v) => V::Double(v.as_f64()?),
        (K::Char, v) => V::Text(v.as_str()?.to_string()),
        (K::Date, V::Date(v) | V::Time(v) | V::Timestamp(v)) => V::Date(*v),
        (K::Time, V::Date(v) | V::Time(v) | V::Timestamp(v)) => V::Time(*v),
        (K::Timestamp, V::Date(v) | V::Time(v) | V::Timestamp(v)) => V::Timestamp(*v),
        (K::RowId, V::RowId(s) | V::Text(s)) => V::RowId(s.clone()),
        (K::Clob, V::Clob(s) | V::Text(s)) => V::Clob(s.clone()),
        _ => return None,
    };
    Some(coerced)
}
