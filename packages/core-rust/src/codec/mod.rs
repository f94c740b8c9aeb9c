//! Binary row codec.
//!
//! An encoded result is a header followed by a stream of rows:
//!
//! ```text
//! header := column_count:i32 column*
//! column := catalog class_name label name type_name:str
//!           sql_type display_size precision:i32
//!           table_name:str scale:i32 schema_name:str
//!           auto_increment case_sensitive currency definitely_writable:bool
//!           nullable:i32
//!           read_only searchable signed writable:bool
//! row    := position:i32 cell{column_count}
//! cell   := present:bool payload?
//! ```
//!
//! Positions start at 1 and increase by one per row. The stream ends at a clean
//! end of input where the next position would be. The payload of a present
//! cell is selected by the column's [`ColumnKind`](crate::types::ColumnKind).

mod cursor;
pub mod io;
mod writer;

pub use cursor::RowCursor;
pub use writer::{encode, encode_to_vec, write_header, EncodeSummary};
