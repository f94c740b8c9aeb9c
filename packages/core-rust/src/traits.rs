use std::collections::VecDeque;

use crate::types::{ColumnDef, Row};

/// Forward-only source of rows with fixed column metadata.
///
/// Implemented by live backend cursors handed over by a producer, by
/// [`VecRowSource`], and by [`RowCursor`](crate::codec::RowCursor) so a cached
/// result can stand in wherever a live one is expected.
pub trait RowSource: Send {
    /// Column metadata, in row order.
    fn columns(&self) -> &[ColumnDef];

    /// Yields the next row, or `None` once the source is exhausted.
    fn next_row(&mut self) -> anyhow::Result<Option<Row>>;
}

/// What a producer hands back after executing a statement against the backend.
pub enum Produced {
    /// A result set worth caching.
    Rows(Box<dyn RowSource>),
    /// The statement did not produce rows (e.g. a data-modification statement).
    /// Nothing is cached.
    NotAQuery,
}

impl std::fmt::Debug for Produced {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rows(source) => f
                .debug_struct("Rows")
                .field("columns", &source.columns().len())
                .finish(),
            Self::NotAQuery => f.write_str("NotAQuery"),
        }
    }
}

/// Row source over rows that are already in memory.
#[derive(Debug, Clone, Default)]
pub struct VecRowSource {
    columns: Vec<ColumnDef>,
    rows: VecDeque<Row>,
}

impl VecRowSource {
    /// Creates a source yielding `rows` in order.
    #[must_use]
    pub fn new(columns: Vec<ColumnDef>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows: rows.into(),
        }
    }

    /// Number of rows not yet yielded.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }

    /// Boxes the source as a producer result.
    #[must_use]
    pub fn produced(self) -> Produced {
        Produced::Rows(Box::new(self))
    }
}

impl RowSource for VecRowSource {
    fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    fn next_row(&mut self) -> anyhow::Result<Option<Row>> {
        Ok(self.rows.pop_front())
    }
}

/// Drains a source into memory.
///
/// # Errors
///
/// Propagates the first error returned by the source.
pub fn collect_rows(source: &mut dyn RowSource) -> anyhow::Result<Vec<Row>> {
    let mut rows = Vec::new();
    while let Some(row) = source.next_row()? {
        rows.push(row);
    }
    Ok(rows)
}
