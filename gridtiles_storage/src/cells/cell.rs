//! Cells and their sort keys.
//!
//! A cell is one coordinate tuple plus one payload per attribute. Three
//! physical shapes exist on the wire, selected by the schema: plain cells,
//! cells with one sort id, and cells with two sort ids. The ids order the
//! external sort and the fragment merge; they are stripped before cells are
//! packed into tiles.

use anyhow::{Result, bail, ensure};
use byteorder::{ByteOrder, LittleEndian};
use gridtiles_core::order::CoordOps;
use gridtiles_core::{ArraySchema, CellIdShape, CellOrder, CellValNum, StorageError};
use std::cmp::Ordering;

/// One cell: a coordinate tuple and a payload per attribute.
///
/// Variable-sized payloads are self-describing (`i32 count` before the
/// values), so the vector of payloads carries everything a tile needs.
#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
	pub coords: Vec<u8>,
	pub attrs: Vec<Vec<u8>>,
}

impl Cell {
	pub fn new(coords: Vec<u8>, attrs: Vec<Vec<u8>>) -> Cell {
		Cell { coords, attrs }
	}

	/// A deletion tombstone at `coords`: every attribute value is the NULL
	/// sentinel.
	pub fn deletion(schema: &ArraySchema, coords: Vec<u8>) -> Cell {
		Cell {
			coords,
			attrs: schema.attributes().iter().map(|a| a.null_payload()).collect(),
		}
	}

	/// `true` if every attribute payload is all NULL sentinels.
	pub fn is_deletion(&self, schema: &ArraySchema) -> bool {
		self
			.attrs
			.iter()
			.zip(schema.attributes().iter())
			.all(|(payload, attribute)| attribute.payload_is_null(payload))
	}
}

/// The sort ids of one cell. Unused ids are zero, so a plain `(id1, id2)`
/// comparison is valid for every shape.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CellKey {
	pub id1: i64,
	pub id2: i64,
}

impl CellKey {
	/// Computes the ids the schema's shape calls for:
	/// tile id and/or Hilbert key.
	pub fn compute(schema: &ArraySchema, ops: &CoordOps, coords: &[u8]) -> Result<CellKey> {
		Ok(match schema.cell_id_shape() {
			CellIdShape::Plain => CellKey::default(),
			CellIdShape::OneId => {
				if schema.is_regular() {
					CellKey {
						id1: schema.tile_id(ops, coords),
						id2: 0,
					}
				} else {
					CellKey {
						id1: ops.hilbert_key(coords, &schema.domain())?,
						id2: 0,
					}
				}
			}
			CellIdShape::TwoIds => CellKey {
				id1: schema.tile_id(ops, coords),
				id2: ops.hilbert_key(coords, &schema.domain())?,
			},
		})
	}
}

/// Compares two cells in global order: ids first, then coordinates under
/// the cell order's sweep (Hilbert ties fall back to row-major).
pub fn compare_cells(
	ops: &CoordOps,
	cell_order: CellOrder,
	a: (&CellKey, &[u8]),
	b: (&CellKey, &[u8]),
) -> Ordering {
	let keys = (a.0.id1, a.0.id2).cmp(&(b.0.id1, b.0.id2));
	if keys != Ordering::Equal {
		return keys;
	}
	match cell_order {
		CellOrder::ColMajor => ops.compare_col_major(a.1, b.1),
		_ => ops.compare_row_major(a.1, b.1),
	}
}

/// The wire size of a cell when every attribute is fixed, or `None` when a
/// size prefix is needed.
pub fn fixed_wire_size(schema: &ArraySchema) -> Option<usize> {
	if schema.has_var_attrs() {
		return None;
	}
	let ids = match schema.cell_id_shape() {
		CellIdShape::Plain => 0,
		CellIdShape::OneId => 8,
		CellIdShape::TwoIds => 16,
	};
	let attrs: usize = (0..schema.attribute_num())
		.map(|a| schema.attr_cell_size(a).unwrap_or(0))
		.sum();
	Some(ids + schema.coords_size() + attrs)
}

/// Encodes a cell into its run-file form: an optional `u32` size prefix
/// (present when the schema has variable attributes), the shape's ids, the
/// coordinates, and the attribute payloads.
pub fn encode_cell(schema: &ArraySchema, key: &CellKey, cell: &Cell, out: &mut Vec<u8>) {
	let ids = match schema.cell_id_shape() {
		CellIdShape::Plain => 0,
		CellIdShape::OneId => 8,
		CellIdShape::TwoIds => 16,
	};
	let body = ids
		+ cell.coords.len()
		+ cell.attrs.iter().map(|a| a.len()).sum::<usize>();
	if schema.has_var_attrs() {
		out.extend_from_slice(&(body as u32).to_le_bytes());
	}
	match schema.cell_id_shape() {
		CellIdShape::Plain => {}
		CellIdShape::OneId => out.extend_from_slice(&key.id1.to_le_bytes()),
		CellIdShape::TwoIds => {
			out.extend_from_slice(&key.id1.to_le_bytes());
			out.extend_from_slice(&key.id2.to_le_bytes());
		}
	}
	out.extend_from_slice(&cell.coords);
	for attr in &cell.attrs {
		out.extend_from_slice(attr);
	}
}

fn take<'a>(body: &'a [u8], offset: &mut usize, n: usize) -> Result<&'a [u8]> {
	ensure!(
		*offset + n <= body.len(),
		StorageError::Format(format!(
			"cell body of {} bytes ends inside a field at {offset}",
			body.len()
		))
	);
	let slice = &body[*offset..*offset + n];
	*offset += n;
	Ok(slice)
}

/// Decodes a cell body (without the size prefix). The whole slice must be
/// consumed.
pub fn decode_cell(schema: &ArraySchema, body: &[u8]) -> Result<(CellKey, Cell)> {
	let mut offset = 0usize;

	let mut key = CellKey::default();
	match schema.cell_id_shape() {
		CellIdShape::Plain => {}
		CellIdShape::OneId => key.id1 = LittleEndian::read_i64(take(body, &mut offset, 8)?),
		CellIdShape::TwoIds => {
			key.id1 = LittleEndian::read_i64(take(body, &mut offset, 8)?);
			key.id2 = LittleEndian::read_i64(take(body, &mut offset, 8)?);
		}
	}
	let coords = take(body, &mut offset, schema.coords_size())?.to_vec();

	let mut attrs = Vec::with_capacity(schema.attribute_num());
	for a in 0..schema.attribute_num() {
		let payload = match schema.attr_cell_val_num(a) {
			CellValNum::Fixed(_) => {
				take(body, &mut offset, schema.attr_cell_size(a).unwrap_or(0))?.to_vec()
			}
			CellValNum::Var => {
				let count = LittleEndian::read_i32(take(body, &mut offset, 4)?);
				if count < 0 {
					bail!(StorageError::Format(format!("negative value count {count}")));
				}
				let values = count as usize * schema.attr_datatype(a).size();
				let mut payload = count.to_le_bytes().to_vec();
				payload.extend_from_slice(take(body, &mut offset, values)?);
				payload
			}
		};
		attrs.push(payload);
	}
	ensure!(
		offset == body.len(),
		StorageError::Format(format!(
			"cell body of {} bytes has {} trailing bytes",
			body.len(),
			body.len() - offset
		))
	);
	Ok((key, Cell { coords, attrs }))
}

#[cfg(test)]
mod tests {
	use super::*;
	use gridtiles_core::{Attribute, Datatype, Dimension};

	fn schema(cell_order: CellOrder) -> ArraySchema {
		ArraySchema::irregular(
			"test",
			vec![
				Dimension::new("x", 0.0, 50.0).unwrap(),
				Dimension::new("y", 0.0, 50.0).unwrap(),
			],
			vec![
				Attribute::new("a1", Datatype::Int32).unwrap(),
				Attribute::with_cell_val_num("a2", Datatype::Float32, CellValNum::Var).unwrap(),
			],
			Datatype::Int32,
			cell_order,
			5,
		)
		.unwrap()
	}

	fn var_payload(values: &[f32]) -> Vec<u8> {
		let mut payload = (values.len() as i32).to_le_bytes().to_vec();
		for value in values {
			payload.extend_from_slice(&value.to_le_bytes());
		}
		payload
	}

	#[test]
	fn encode_decode_round_trip() -> Result<()> {
		let schema = schema(CellOrder::Hilbert);
		let ops = schema.coord_ops()?;
		let coords = ops.coords_from_f64(&[3.0, 4.0]);
		let cell = Cell::new(
			coords.clone(),
			vec![10i32.to_le_bytes().to_vec(), var_payload(&[1.5, 2.5])],
		);
		let key = CellKey::compute(&schema, &ops, &coords)?;
		assert!(key.id1 > 0);

		let mut wire = Vec::new();
		encode_cell(&schema, &key, &cell, &mut wire);
		// size prefix because of the var attribute
		let size = u32::from_le_bytes(wire[..4].try_into().unwrap()) as usize;
		assert_eq!(size, wire.len() - 4);

		let (decoded_key, decoded) = decode_cell(&schema, &wire[4..])?;
		assert_eq!(decoded_key, key);
		assert_eq!(decoded, cell);
		Ok(())
	}

	#[test]
	fn truncated_bodies_are_rejected() -> Result<()> {
		let schema = schema(CellOrder::Hilbert);
		let ops = schema.coord_ops()?;
		let coords = ops.coords_from_f64(&[3.0, 4.0]);
		let cell = Cell::new(coords.clone(), vec![vec![0; 4], var_payload(&[1.0])]);
		let key = CellKey::compute(&schema, &ops, &coords)?;
		let mut wire = Vec::new();
		encode_cell(&schema, &key, &cell, &mut wire);
		assert!(decode_cell(&schema, &wire[4..wire.len() - 2]).is_err());
		Ok(())
	}

	#[test]
	fn tombstones_are_detected() -> Result<()> {
		let schema = schema(CellOrder::RowMajor);
		let ops = schema.coord_ops()?;
		let coords = ops.coords_from_f64(&[5.0, 5.0]);
		let tombstone = Cell::deletion(&schema, coords.clone());
		assert!(tombstone.is_deletion(&schema));
		let live = Cell::new(coords, vec![10i32.to_le_bytes().to_vec(), var_payload(&[1.0])]);
		assert!(!live.is_deletion(&schema));
		Ok(())
	}

	#[test]
	fn comparator_orders_by_ids_then_coords() -> Result<()> {
		let schema = schema(CellOrder::RowMajor);
		let ops = schema.coord_ops()?;
		let a = ops.coords_from_f64(&[1.0, 2.0]);
		let b = ops.coords_from_f64(&[1.0, 3.0]);
		let key = CellKey::default();
		assert_eq!(
			compare_cells(&ops, CellOrder::RowMajor, (&key, &a), (&key, &b)),
			Ordering::Less
		);
		let bigger = CellKey { id1: 1, id2: 0 };
		assert_eq!(
			compare_cells(&ops, CellOrder::RowMajor, (&bigger, &a), (&key, &b)),
			Ordering::Greater
		);
		Ok(())
	}
}
