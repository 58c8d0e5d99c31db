//! In-memory tiles.
//!
//! A tile is the typed payload unit of one attribute at one tile position:
//! a byte payload plus per-cell offsets. Coordinate tiles additionally carry
//! their MBR and bounding coordinates. Tiles are mutable only inside the
//! tile packer; the read side reconstructs them from segment buffers and
//! shares them immutably.

use anyhow::{Result, bail};
use byteorder::{ByteOrder, LittleEndian};
use gridtiles_core::order::CoordOps;
use gridtiles_core::{Blob, CellValNum, Datatype, StorageError};

/// A typed, variable- or fixed-cell-size payload unit.
#[derive(Clone, Debug)]
pub struct Tile {
	id: i64,
	datatype: Datatype,
	cell_val_num: CellValNum,
	dim_num: usize,
	payload: Blob,
	cell_offsets: Vec<u64>,
	mbr: Option<Vec<u8>>,
	bounds: Option<(Vec<u8>, Vec<u8>)>,
}

impl Tile {
	/// A fresh, empty, mutable tile. `dim_num` is zero for attribute tiles
	/// and the dimensionality for coordinate tiles.
	pub fn new(id: i64, datatype: Datatype, cell_val_num: CellValNum, dim_num: usize) -> Tile {
		Tile {
			id,
			datatype,
			cell_val_num,
			dim_num,
			payload: Blob::new(),
			cell_offsets: Vec::new(),
			mbr: None,
			bounds: None,
		}
	}

	/// Parses a tile back from its on-disk payload by walking cell sizes.
	pub fn from_payload(
		id: i64,
		datatype: Datatype,
		cell_val_num: CellValNum,
		dim_num: usize,
		payload: Blob,
	) -> Result<Tile> {
		let mut cell_offsets = Vec::new();
		match cell_val_num {
			CellValNum::Fixed(n) => {
				let cell_size = n as usize * datatype.size();
				if payload.len() as usize % cell_size != 0 {
					bail!(StorageError::Format(format!(
						"tile {id}: payload of {} bytes is not a multiple of the cell size {cell_size}",
						payload.len()
					)));
				}
				let cell_num = payload.len() as usize / cell_size;
				cell_offsets.extend((0..cell_num).map(|i| (i * cell_size) as u64));
			}
			CellValNum::Var => {
				let bytes = payload.as_slice();
				let mut offset = 0usize;
				while offset < bytes.len() {
					if offset + 4 > bytes.len() {
						bail!(StorageError::Format(format!(
							"tile {id}: truncated cell count at offset {offset}"
						)));
					}
					let count = LittleEndian::read_i32(&bytes[offset..]);
					if count < 0 {
						bail!(StorageError::Format(format!(
							"tile {id}: negative cell count at offset {offset}"
						)));
					}
					let cell_size = 4 + count as usize * datatype.size();
					if offset + cell_size > bytes.len() {
						bail!(StorageError::Format(format!(
							"tile {id}: cell at offset {offset} overruns the payload"
						)));
					}
					cell_offsets.push(offset as u64);
					offset += cell_size;
				}
			}
		}
		Ok(Tile {
			id,
			datatype,
			cell_val_num,
			dim_num,
			payload,
			cell_offsets,
			mbr: None,
			bounds: None,
		})
	}

	pub fn id(&self) -> i64 {
		self.id
	}

	pub fn datatype(&self) -> Datatype {
		self.datatype
	}

	pub fn is_coords(&self) -> bool {
		self.dim_num > 0
	}

	pub fn cell_num(&self) -> usize {
		self.cell_offsets.len()
	}

	/// The payload size in bytes.
	pub fn size(&self) -> u64 {
		self.payload.len()
	}

	pub fn payload(&self) -> &Blob {
		&self.payload
	}

	/// The raw payload of cell `index`.
	pub fn cell(&self, index: usize) -> &[u8] {
		let start = self.cell_offsets[index] as usize;
		let end = self
			.cell_offsets
			.get(index + 1)
			.map_or(self.payload.len() as usize, |o| *o as usize);
		self.payload.get_range(start..end)
	}

	/// Iterates over the cells in order.
	pub fn cells(&self) -> impl Iterator<Item = &[u8]> {
		(0..self.cell_num()).map(|i| self.cell(i))
	}

	pub fn mbr(&self) -> Option<&[u8]> {
		self.mbr.as_deref()
	}

	pub fn bounds(&self) -> Option<(&[u8], &[u8])> {
		self.bounds.as_ref().map(|(a, b)| (a.as_slice(), b.as_slice()))
	}

	/// Attaches the MBR and bounding coordinates loaded from book-keeping.
	pub fn set_mbr_bounds(&mut self, mbr: Option<Vec<u8>>, bounds: (Vec<u8>, Vec<u8>)) {
		self.mbr = mbr;
		self.bounds = Some(bounds);
	}

	/// Appends one cell. For coordinate tiles the MBR grows monotonically
	/// and the second bounding coordinate is replaced.
	pub fn append_cell(&mut self, cell: &[u8], ops: Option<&CoordOps>) {
		self.cell_offsets.push(self.payload.len());
		self.payload.push_slice(cell);

		if self.is_coords() {
			let ops = ops.expect("coordinate tiles need coordinate ops");
			match &mut self.mbr {
				None => {
					self.mbr = Some(ops.init_mbr(cell));
					self.bounds = Some((cell.to_vec(), cell.to_vec()));
				}
				Some(mbr) => {
					ops.expand_mbr(mbr, cell);
					if let Some((_, last)) = &mut self.bounds {
						last.clear();
						last.extend_from_slice(cell);
					}
				}
			}
		}
	}
}
