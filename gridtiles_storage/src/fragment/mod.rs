//! Fragments: immutable on-disk units of array state.
//!
//! A fragment is a directory holding one tile-data file per attribute plus
//! four book-keeping files and the commit marker.

mod book_keeping;
mod name;
mod read_state;
mod tile;
mod write_state;

pub use book_keeping::BookKeeping;
pub use name::FragmentName;
pub use read_state::{ReadState, ReverseTileIterator, TileIterator};
pub use tile::Tile;
pub use write_state::WriteState;

use std::path::{Path, PathBuf};

/// Empty marker file; its presence commits the fragment.
pub const MARKER_FILE: &str = "__fragment";
/// `u64 tile_num; u64 id[tile_num]`.
pub const TILE_IDS_FILE: &str = "tile_ids.bkp";
/// Per attribute, `u64 offset[tile_num]`.
pub const OFFSETS_FILE: &str = "offsets.bkp";
/// Per tile, `2 × dim_num` coordinates; absent for dense fragments.
pub const MBRS_FILE: &str = "mbrs.bkp";
/// Per tile, two coordinate tuples.
pub const BOUNDS_FILE: &str = "bounds.bkp";
/// Extension of the per-attribute tile-data files.
pub const TILE_DATA_SUFFIX: &str = ".tile";

/// The tile-data file of one attribute inside a fragment directory.
pub fn tile_data_path(dir: &Path, attr_name: &str) -> PathBuf {
	dir.join(format!("{attr_name}{TILE_DATA_SUFFIX}"))
}

/// Whether `dir` is a committed fragment.
pub fn is_committed(dir: &Path) -> bool {
	dir.join(MARKER_FILE).exists()
}
