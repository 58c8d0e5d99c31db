//! Values-per-cell markers.

use crate::types::error::StorageError;
use anyhow::{Result, bail};

/// On-disk sentinel marking a variable number of values per cell.
pub const VAR_NUM: u32 = u32::MAX;

/// How many values one cell of an attribute holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CellValNum {
	/// Exactly `n` values per cell, `n >= 1`.
	Fixed(u32),
	/// A per-cell count, stored as an `i32` prefix inside the payload.
	Var,
}

impl CellValNum {
	pub fn single() -> CellValNum {
		CellValNum::Fixed(1)
	}

	pub fn is_var(&self) -> bool {
		matches!(self, CellValNum::Var)
	}

	/// The fixed count, or `None` for variable cells.
	pub fn fixed(&self) -> Option<u32> {
		match self {
			CellValNum::Fixed(n) => Some(*n),
			CellValNum::Var => None,
		}
	}

	pub fn as_u32(&self) -> u32 {
		match self {
			CellValNum::Fixed(n) => *n,
			CellValNum::Var => VAR_NUM,
		}
	}

	pub fn from_u32(value: u32) -> Result<CellValNum> {
		match value {
			VAR_NUM => Ok(CellValNum::Var),
			0 => bail!(StorageError::Format(
				"cell_val_num of zero is invalid".to_string()
			)),
			n => Ok(CellValNum::Fixed(n)),
		}
	}
}
