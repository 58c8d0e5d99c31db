//! Cell and tile orders.
//!
//! The cell order sorts cells inside one tile; the tile order sorts the
//! tiles of a regular layout in space. Irregular (capacity-bounded) layouts
//! use [`TileOrder::None`]. Wire tags share one encoding space:
//! row=0, col=1, hilbert=2, none=3.

use crate::types::error::StorageError;
use anyhow::{Result, bail};

/// The order of cells within a tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CellOrder {
	RowMajor,
	ColMajor,
	Hilbert,
}

impl CellOrder {
	pub fn as_u8(&self) -> u8 {
		match self {
			CellOrder::RowMajor => 0,
			CellOrder::ColMajor => 1,
			CellOrder::Hilbert => 2,
		}
	}

	pub fn from_u8(tag: u8) -> Result<CellOrder> {
		Ok(match tag {
			0 => CellOrder::RowMajor,
			1 => CellOrder::ColMajor,
			2 => CellOrder::Hilbert,
			_ => bail!(StorageError::Format(format!("unknown cell order tag {tag}"))),
		})
	}
}

/// The order of tiles; `None` for irregular, capacity-bounded tiling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TileOrder {
	RowMajor,
	ColMajor,
	None,
}

impl TileOrder {
	pub fn as_u8(&self) -> u8 {
		match self {
			TileOrder::RowMajor => 0,
			TileOrder::ColMajor => 1,
			TileOrder::None => 3,
		}
	}

	pub fn from_u8(tag: u8) -> Result<TileOrder> {
		Ok(match tag {
			0 => TileOrder::RowMajor,
			1 => TileOrder::ColMajor,
			3 => TileOrder::None,
			_ => bail!(StorageError::Format(format!("unknown tile order tag {tag}"))),
		})
	}
}
