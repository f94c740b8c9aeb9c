//! querycache core: value model, cache keys, and the binary row codec.

pub mod codec;
pub mod error;
pub mod key;
pub mod sql_types;
pub mod traits;
pub mod types;

pub use codec::{encode, encode_to_vec, EncodeSummary, RowCursor};
pub use error::CodecError;
pub use key::{CacheKey, InvalidKey, ParamId, Parameters, Query, CACHE_FILE_EXTENSION};
pub use traits::{collect_rows, Produced, RowSource, VecRowSource};
pub use types::{ColumnDef, ColumnKind, Nullability, Row, SqlValue};
