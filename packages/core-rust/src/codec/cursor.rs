//! Decoding cursor over an encoded result.

use std::fmt;
use std::io::{ErrorKind, Read};

use crate::codec::io::{
    read_bool, read_f32, read_f64, read_i16, read_i32, read_i32_or_eof, read_i64, read_i8,
    read_str,
};
use crate::error::CodecError;
use crate::traits::RowSource;
use crate::types::{ColumnDef, ColumnKind, Nullability, Row, SqlValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    BeforeFirst,
    OnRow,
    AfterLast,
    Failed,
}

/// Forward-only cursor that replays an encoded result.
///
/// The header is read eagerly by [`RowCursor::open`]. Rows are decoded one
/// ahead of the caller, which is what lets [`is_last`](Self::is_last) answer
/// without consuming anything. A decoding error surfaces from the
/// [`advance`](Self::advance) call that would have reached the damaged row;
/// after that every further call fails.
pub struct RowCursor {
    input: Box<dyn Read + Send>,
    columns: Vec<ColumnDef>,
    kinds: Vec<ColumnKind>,
    current: Option<Row>,
    lookahead: Option<Row>,
    pending: Option<CodecError>,
    row_number: i32,
    position: Position,
}

impl RowCursor {
    /// Reads the header and the first row from `input`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Corrupt`] if the header is truncated or malformed,
    /// or the decoding error of the first row.
    pub fn open<R: Read + Send + 'static>(input: R) -> Result<Self, CodecError> {
        let mut input: Box<dyn Read + Send> = Box::new(input);
        let columns = read_header(&mut input).map_err(|e| match e {
            CodecError::Io(io) if io.kind() == ErrorKind::UnexpectedEof => {
                CodecError::corrupt("header truncated")
            }
            other => other,
        })?;
        let kinds = columns.iter().map(ColumnDef::kind).collect();

        let mut cursor = Self {
            input,
            columns,
            kinds,
            current: None,
            lookahead: None,
            pending: None,
            row_number: 0,
            position: Position::BeforeFirst,
        };
        cursor.lookahead = cursor.read_row(1)?;
        Ok(cursor)
    }

    /// Column metadata as recorded when the result was cached.
    #[must_use]
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Moves to the next row. Returns `false` once the rows are exhausted.
    ///
    /// # Errors
    ///
    /// Returns the decoding error of the next row. The cursor is unusable
    /// afterwards.
    pub fn advance(&mut self) -> Result<bool, CodecError> {
        match self.position {
            Position::Failed => return Err(CodecError::corrupt("cursor failed on an earlier row")),
            Position::AfterLast => return Ok(false),
            Position::BeforeFirst | Position::OnRow => {}
        }

        if let Some(err) = self.pending.take() {
            tracing::debug!(row = self.row_number.saturating_add(1), error = %err, "cached row failed to decode");
            self.current = None;
            self.position = Position::Failed;
            return Err(err);
        }

        match self.lookahead.take() {
            Some(row) => {
                self.current = Some(row);
                self.row_number += 1;
                self.position = Position::OnRow;
                match self.row_number.checked_add(1) {
                    Some(expected) => match self.read_row(expected) {
                        Ok(next) => self.lookahead = next,
                        Err(e) => self.pending = Some(e),
                    },
                    None => self.pending = Some(CodecError::TooManyRows),
                }
                Ok(true)
            }
            None => {
                self.current = None;
                self.position = Position::AfterLast;
                Ok(false)
            }
        }
    }

    /// 1-based number of the current row; 0 before the first row.
    #[must_use]
    pub fn row_number(&self) -> i32 {
        self.row_number
    }

    #[must_use]
    pub fn row(&self) -> Option<&Row> {
        self.current.as_ref()
    }

    /// The current row.
    ///
    /// # Errors
    ///
    /// [`CodecError::NoCurrentRow`] when not positioned on a row.
    pub fn current_row(&self) -> Result<&Row, CodecError> {
        self.current.as_ref().ok_or(CodecError::NoCurrentRow)
    }

    /// Value at 1-based `index` in the current row. `Ok(None)` is SQL NULL.
    ///
    /// # Errors
    ///
    /// [`CodecError::NoCurrentRow`] or [`CodecError::ColumnIndex`].
    pub fn get(&self, index: usize) -> Result<Option<&SqlValue>, CodecError> {
        let row = self.current_row()?;
        if index == 0 || index > row.len() {
            return Err(CodecError::ColumnIndex {
                index,
                count: row.len(),
            });
        }
        Ok(row[index - 1].as_ref())
    }

    /// 1-based index of the first column whose label matches, ignoring ASCII case.
    ///
    /// # Errors
    ///
    /// [`CodecError::UnknownColumn`] if no label matches.
    pub fn find_column(&self, label: &str) -> Result<usize, CodecError> {
        self.columns
            .iter()
            .position(|c| c.label.eq_ignore_ascii_case(label))
            .map(|i| i + 1)
            .ok_or_else(|| CodecError::UnknownColumn {
                label: label.to_string(),
            })
    }

    /// Value of the column labelled `label` in the current row.
    ///
    /// # Errors
    ///
    /// See [`find_column`](Self::find_column) and [`get`](Self::get).
    pub fn get_by_label(&self, label: &str) -> Result<Option<&SqlValue>, CodecError> {
        let index = self.find_column(label)?;
        self.get(index)
    }

    #[must_use]
    pub fn is_before_first(&self) -> bool {
        self.position == Position::BeforeFirst && (self.lookahead.is_some() || self.pending.is_some())
    }

    #[must_use]
    pub fn is_first(&self) -> bool {
        self.position == Position::OnRow && self.row_number == 1
    }

    /// Whether the current row is the final one. Decoding errors past the
    /// current row count as a further row.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.position == Position::OnRow && self.lookahead.is_none() && self.pending.is_none()
    }

    #[must_use]
    pub fn is_after_last(&self) -> bool {
        self.position == Position::AfterLast && self.row_number > 0
    }

    fn read_row(&mut self, expected: i32) -> Result<Option<Row>, CodecError> {
        let Some(found) = read_i32_or_eof(&mut self.input)? else {
            return Ok(None);
        };
        if found != expected {
            return Err(CodecError::UnexpectedRowPosition { expected, found });
        }
        let mut row = Vec::with_capacity(self.kinds.len());
        for (i, kind) in self.kinds.iter().enumerate() {
            row.push(read_cell(&mut self.input, i + 1, *kind)?);
        }
        Ok(Some(row))
    }
}

impl fmt::Debug for RowCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowCursor")
            .field("columns", &self.columns.len())
            .field("row_number", &self.row_number)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

impl RowSource for RowCursor {
    fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    fn next_row(&mut self) -> anyhow::Result<Option<Row>> {
        if self.advance()? {
            Ok(self.current.clone())
        } else {
            Ok(None)
        }
    }
}

fn read_header<R: Read + ?Sized>(input: &mut R) -> Result<Vec<ColumnDef>, CodecError> {
    let count = read_i32(input)?;
    let count = usize::try_from(count)
        .map_err(|_| CodecError::corrupt(format!("negative column count {count}")))?;

    // Capacity is not taken from the blob; a damaged count fails on EOF instead.
    let mut columns = Vec::new();
    for _ in 0..count {
        let catalog = read_str(input)?;
        let class_name = read_str(input)?;
        let label = read_str(input)?;
        let name = read_str(input)?;
        let type_name = read_str(input)?;
        let sql_type = read_i32(input)?;
        let display_size = read_i32(input)?;
        let precision = read_i32(input)?;
        let table_name = read_str(input)?;
        let scale = read_i32(input)?;
        let schema_name = read_str(input)?;
        let auto_increment = read_bool(input)?;
        let case_sensitive = read_bool(input)?;
        let currency = read_bool(input)?;
        let definitely_writable = read_bool(input)?;
        let nullable = Nullability::from_i32(read_i32(input)?);
        let read_only = read_bool(input)?;
        let searchable = read_bool(input)?;
        let signed = read_bool(input)?;
        let writable = read_bool(input)?;
        columns.push(ColumnDef {
            catalog,
            class_name,
            label,
            name,
            type_name,
            sql_type,
            display_size,
            precision,
            table_name,
            scale,
            schema_name,
            auto_increment,
            case_sensitive,
            currency,
            definitely_writable,
            nullable,
            read_only,
            searchable,
            signed,
            writable,
        });
    }
    Ok(columns)
}

fn read_cell<R: Read + ?Sized>(
    input: &mut R,
    column: usize,
    kind: ColumnKind,
) -> Result<Option<SqlValue>, CodecError> {
    if !read_bool(input)? {
        return Ok(None);
    }
    let value = match kind {
        ColumnKind::Boolean => SqlValue::Bool(read_bool(input)?),
        ColumnKind::TinyInt => SqlValue::TinyInt(read_i8(input)?),
        ColumnKind::SmallInt => SqlValue::SmallInt(read_i16(input)?),
        ColumnKind::Integer => SqlValue::Int(read_i32(input)?),
        ColumnKind::BigInt => SqlValue::BigInt(read_i64(input)?),
        ColumnKind::Real => SqlValue::Float(read_f32(input)?),
        ColumnKind::Double | ColumnKind::Decimal => SqlValue::Double(read_f64(input)?),
        ColumnKind::Char => SqlValue::Text(read_str(input)?),
        ColumnKind::Date => SqlValue::Date(read_i64(input)?),
        ColumnKind::Time => SqlValue::Time(read_i64(input)?),
        ColumnKind::Timestamp => SqlValue::Timestamp(read_i64(input)?),
        ColumnKind::RowId => SqlValue::RowId(read_str(input)?),
        ColumnKind::Clob => SqlValue::Clob(read_str(input)?),
        ColumnKind::Opaque => return Err(CodecError::UnsupportedPayload { column }),
    };
    Ok(Some(value))
}
