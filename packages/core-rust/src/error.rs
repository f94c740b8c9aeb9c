use crate::types::ColumnKind;

/// Errors raised while encoding a row source or decoding a cached blob.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt blob: {reason}")]
    Corrupt { reason: String },
    #[error("expected row position {expected}, found {found}")]
    UnexpectedRowPosition { expected: i32, found: i32 },
    #[error("column {column} holds a value that cannot be written as {kind:?}")]
    TypeMismatch { column: usize, kind: ColumnKind },
    #[error("column {column} has an unsupported type but carries a payload")]
    UnsupportedPayload { column: usize },
    #[error("row {row} has {found} cells, expected {expected}")]
    RowWidth { row: i32, expected: usize, found: usize },
    #[error("row count exceeds the 32-bit position space")]
    TooManyRows,
    #[error("column index {index} out of bounds (1..={count})")]
    ColumnIndex { index: usize, count: usize },
    #[error("no column labelled {label:?}")]
    UnknownColumn { label: String },
    #[error("cursor is not positioned on a row")]
    NoCurrentRow,
    #[error("row source failed: {0}")]
    Source(#[from] anyhow::Error),
}

impl CodecError {
    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        Self::Corrupt {
            reason: reason.into(),
        }
    }

    /// Whether this error describes a damaged blob rather than a failed write
    /// or a misbehaving row source.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        match self {
            Self::Corrupt { .. }
            | Self::UnexpectedRowPosition { .. }
            | Self::UnsupportedPayload { .. } => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}
