//! Array schemas and their binary form.

mod attribute;
mod dimension;
#[allow(clippy::module_inception)]
mod schema;
mod serialize;

pub use attribute::Attribute;
pub use dimension::Dimension;
pub use schema::{ArraySchema, CellIdShape, COORDS_NAME};
