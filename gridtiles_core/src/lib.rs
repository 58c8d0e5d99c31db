//! Core types and arithmetic of the gridtiles array engine.
//!
//! Everything in this crate is pure: datatypes, array schemas and their
//! binary form, cell/tile order comparators, the Hilbert curve, subarray
//! overlap classification, and little-endian value I/O. The filesystem-facing
//! half of the engine lives in `gridtiles_storage`.

pub mod config;
pub use config::*;
pub mod io;
pub mod order;
pub mod schema;
pub use schema::*;
pub mod types;
pub use types::*;
pub mod utils;
