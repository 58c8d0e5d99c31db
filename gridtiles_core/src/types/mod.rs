//! Plain data types shared by every component of the engine.

mod blob;
mod byte_range;
mod cell_val_num;
mod codec;
mod datatype;
mod error;
mod layout;

pub use blob::Blob;
pub use byte_range::ByteRange;
pub use cell_val_num::{CellValNum, VAR_NUM};
pub use codec::Codec;
pub use datatype::Datatype;
pub use error::{StorageError, storage_error};
pub use layout::{CellOrder, TileOrder};
