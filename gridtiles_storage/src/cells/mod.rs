//! Cells, their sort keys, and streaming over fragments.

mod cell;
mod merge_stream;
mod stream;

pub use cell::{Cell, CellKey, compare_cells, decode_cell, encode_cell, fixed_wire_size};
pub use merge_stream::MergeStream;
pub use stream::CellStream;
