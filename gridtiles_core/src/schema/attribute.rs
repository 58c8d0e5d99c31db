//! Array attributes.

use crate::types::{CellValNum, Codec, Datatype, StorageError};
use anyhow::{Result, bail};
use byteorder::{ByteOrder, LittleEndian};

/// One attribute of an array: a name, a datatype, a values-per-cell count
/// and the codec applied to its tile payloads.
#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
	pub name: String,
	pub datatype: Datatype,
	pub cell_val_num: CellValNum,
	pub codec: Codec,
	pub level: i32,
}

impl Attribute {
	/// An uncompressed attribute holding one value per cell.
	pub fn new(name: impl Into<String>, datatype: Datatype) -> Result<Attribute> {
		Attribute::with_cell_val_num(name, datatype, CellValNum::single())
	}

	pub fn with_cell_val_num(
		name: impl Into<String>,
		datatype: Datatype,
		cell_val_num: CellValNum,
	) -> Result<Attribute> {
		let name = name.into();
		if name.is_empty() {
			bail!(StorageError::Schema("attribute name must not be empty".to_string()));
		}
		Ok(Attribute {
			name,
			datatype,
			cell_val_num,
			codec: Codec::None,
			level: 0,
		})
	}

	pub fn with_codec(mut self, codec: Codec, level: i32) -> Attribute {
		self.codec = codec;
		self.level = level;
		self
	}

	/// The byte size of one cell's payload, or `None` for variable cells.
	pub fn cell_size(&self) -> Option<usize> {
		self
			.cell_val_num
			.fixed()
			.map(|n| n as usize * self.datatype.size())
	}

	/// The payload of a deletion cell: every value is the NULL sentinel.
	/// Variable cells delete with a single sentinel value.
	pub fn null_payload(&self) -> Vec<u8> {
		let sentinel = self.datatype.null_bytes();
		match self.cell_val_num {
			CellValNum::Fixed(n) => sentinel.repeat(n as usize),
			CellValNum::Var => {
				let mut payload = 1i32.to_le_bytes().to_vec();
				payload.extend_from_slice(&sentinel);
				payload
			}
		}
	}

	/// Checks whether a cell payload consists only of NULL sentinels.
	pub fn payload_is_null(&self, payload: &[u8]) -> bool {
		let size = self.datatype.size();
		let values = match self.cell_val_num {
			CellValNum::Fixed(_) => payload,
			CellValNum::Var => {
				if payload.len() < 4 || LittleEndian::read_i32(payload) != 1 {
					return false;
				}
				&payload[4..]
			}
		};
		!values.is_empty()
			&& values
				.chunks_exact(size)
				.all(|value| self.datatype.value_is_null(value))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fixed_null_payloads_round_trip() -> Result<()> {
		let attribute = Attribute::with_cell_val_num("a", Datatype::Int32, CellValNum::Fixed(3))?;
		let null = attribute.null_payload();
		assert_eq!(null.len(), 12);
		assert!(attribute.payload_is_null(&null));
		assert!(!attribute.payload_is_null(&[0u8; 12]));
		Ok(())
	}

	#[test]
	fn var_null_payloads_round_trip() -> Result<()> {
		let attribute = Attribute::with_cell_val_num("a", Datatype::Float32, CellValNum::Var)?;
		let null = attribute.null_payload();
		assert!(attribute.payload_is_null(&null));

		// Two sentinel values are data, not a deletion.
		let mut two = 2i32.to_le_bytes().to_vec();
		two.extend_from_slice(&Datatype::Float32.null_bytes());
		two.extend_from_slice(&Datatype::Float32.null_bytes());
		assert!(!attribute.payload_is_null(&two));
		Ok(())
	}
}
