use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sql_types;

/// A single non-null cell value.
///
/// Nullness is modelled outside the enum: a cell is `Option<SqlValue>`.
/// Temporal values are stored as milliseconds since the Unix epoch, the same
/// representation the codec writes to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    /// BIT / BOOLEAN.
    Bool(bool),
    /// TINYINT.
    TinyInt(i8),
    /// SMALLINT.
    SmallInt(i16),
    /// INTEGER.
    Int(i32),
    /// BIGINT.
    BigInt(i64),
    /// FLOAT / REAL (32-bit).
    Float(f32),
    /// DOUBLE, and the lossy stand-in for NUMERIC / DECIMAL.
    Double(f64),
    /// CHAR / VARCHAR family.
    Text(String),
    /// DATE as epoch millis.
    Date(i64),
    /// TIME as epoch millis.
    Time(i64),
    /// TIMESTAMP as epoch millis.
    Timestamp(i64),
    /// ROWID in its textual form.
    RowId(String),
    /// Character large object, fully materialised.
    Clob(String),
}

/// One row: one nullable cell per column, in column order.
pub type Row = Vec<Option<SqlValue>>;

impl SqlValue {
    /// Returns the value as a boolean, if it is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Widens any integral or temporal value to `i64`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::TinyInt(v) => Some(i64::from(*v)),
            Self::SmallInt(v) => Some(i64::from(*v)),
            Self::Int(v) => Some(i64::from(*v)),
            Self::BigInt(v) | Self::Date(v) | Self::Time(v) | Self::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    /// Widens any numeric value to `f64`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            Self::TinyInt(v) => Some(f64::from(*v)),
            Self::SmallInt(v) => Some(f64::from(*v)),
            Self::Int(v) => Some(f64::from(*v)),
            Self::BigInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Borrows the textual payload of `Text`, `RowId` and `Clob` values.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::RowId(s) | Self::Clob(s) => Some(s),
            _ => None,
        }
    }
}

/// Canonical textual form. Used verbatim when fingerprinting bound parameters.
impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::TinyInt(v) => write!(f, "{v}"),
            Self::SmallInt(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::BigInt(v) | Self::Date(v) | Self::Time(v) | Self::Timestamp(v) => {
                write!(f, "{v}")
            }
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Text(s) | Self::RowId(s) | Self::Clob(s) => f.write_str(s),
        }
    }
}

/// Tri-state column nullability, numbered like the driver metadata constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Nullability {
    /// The column never holds nulls.
    NoNulls,
    /// The column may hold nulls.
    Nullable,
    /// The backend could not tell.
    #[default]
    Unknown,
}

impl Nullability {
    /// Wire representation.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        match self {
            Self::NoNulls => 0,
            Self::Nullable => 1,
            Self::Unknown => 2,
        }
    }

    /// Inverse of [`as_i32`](Self::as_i32). Unrecognised codes map to `Unknown`.
    #[must_use]
    pub fn from_i32(code: i32) -> Self {
        match code {
            0 => Self::NoNulls,
            1 => Self::Nullable,
            _ => Self::Unknown,
        }
    }
}

/// Closed set of column encodings the codec understands.
///
/// Every declared SQL type tag maps to exactly one kind. `Opaque` covers the
/// binary, structured, array, reference and XML families: values of opaque
/// columns are always written as absent and always read back as null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Decimal,
    Char,
    Date,
    Time,
    Timestamp,
    RowId,
    Clob,
    Opaque,
}

impl ColumnKind {
    /// Classifies a declared SQL type tag.
    #[must_use]
    pub fn from_sql_type(sql_type: i32) -> Self {
        match sql_type {
            sql_types::BIT | sql_types::BOOLEAN => Self::Boolean,
            sql_types::TINYINT => Self::TinyInt,
            sql_types::SMALLINT => Self::SmallInt,
            sql_types::INTEGER => Self::Integer,
            sql_types::BIGINT => Self::BigInt,
            sql_types::FLOAT | sql_types::REAL => Self::Real,
            sql_types::DOUBLE => Self::Double,
            sql_types::NUMERIC | sql_types::DECIMAL => Self::Decimal,
            sql_types::CHAR
            | sql_types::VARCHAR
            | sql_types::LONGVARCHAR
            | sql_types::NCHAR
            | sql_types::NVARCHAR
            | sql_types::LONGNVARCHAR => Self::Char,
            sql_types::DATE => Self::Date,
            sql_types::TIME | sql_types::TIME_WITH_TIMEZONE => Self::Time,
            sql_types::TIMESTAMP | sql_types::TIMESTAMP_WITH_TIMEZONE => Self::Timestamp,
            sql_types::ROWID => Self::RowId,
            sql_types::CLOB => Self::Clob,
            _ => Self::Opaque,
        }
    }

    /// Whether values of this kind survive a round trip through the codec.
    #[must_use]
    pub fn is_supported(self) -> bool {
        self != Self::Opaque
    }
}

/// Column metadata captured from the backend and replayed on every cache hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub catalog: String,
    pub class_name: String,
    pub label: String,
    pub name: String,
    pub type_name: String,
    /// Declared SQL type tag (see [`sql_types`](crate::sql_types)).
    pub sql_type: i32,
    pub display_size: i32,
    pub precision: i32,
    pub table_name: String,
    pub scale: i32,
    pub schema_name: String,
    pub auto_increment: bool,
    pub case_sensitive: bool,
    pub currency: bool,
    pub definitely_writable: bool,
    pub nullable: Nullability,
    pub read_only: bool,
    pub searchable: bool,
    pub signed: bool,
    pub writable: bool,
}

impl ColumnDef {
    /// Creates a column with the given name and type tag.
    ///
    /// The label defaults to the name; every other string is empty, numeric
    /// attributes are zero, flags are `false` and nullability is `Unknown`.
    #[must_use]
    pub fn new(name: impl Into<String>, sql_type: i32) -> Self {
        let name = name.into();
        Self {
            catalog: String::new(),
            class_name: String::new(),
            label: name.clone(),
            name,
            type_name: String::new(),
            sql_type,
            display_size: 0,
            precision: 0,
            table_name: String::new(),
            scale: 0,
            schema_name: String::new(),
            auto_increment: false,
            case_sensitive: false,
            currency: false,
            definitely_writable: false,
            nullable: Nullability::Unknown,
            read_only: false,
            searchable: false,
            signed: false,
            writable: false,
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    #[must_use]
    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }

    #[must_use]
    pub fn with_table(mut self, schema_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        self.schema_name = schema_name.into();
        self.table_name = table_name.into();
        self
    }

    #[must_use]
    pub fn with_nullability(mut self, nullable: Nullability) -> Self {
        self.nullable = nullable;
        self
    }

    /// The codec encoding used for this column.
    #[must_use]
    pub fn kind(&self) -> ColumnKind {
        ColumnKind::from_sql_type(self.sql_type)
    }
}
