//! Binary I/O helpers: little-endian value readers and writers.

mod value_reader;
mod value_writer;

pub use value_reader::{ValueReaderSlice, file_size, read_file};
pub use value_writer::{ValueWriter, ValueWriterBlob, ValueWriterFile};
