//! Small helpers without a better home.

mod compression;

pub use compression::{compress, decompress};
