//! The array schema: dimensions, attributes, orders and tiling.
//!
//! The schema is immutable for the lifetime of an array and provides the
//! order arithmetic every other component leans on: cell comparators, tile
//! id linearization, in-tile cell positions and overlap classification.

use crate::order::{CoordOps, Overlap, expand_to_tile_domain, subarray_overlap};
use crate::schema::{Attribute, Dimension};
use crate::types::{CellOrder, CellValNum, Codec, Datatype, StorageError, TileOrder};
use anyhow::{Result, bail, ensure};
use itertools::Itertools;
use std::cmp::Ordering;

/// Name of the synthetic coordinates attribute, appended at position
/// `attribute_num`.
pub const COORDS_NAME: &str = "__coords";

/// The physical shape of cells the fragment writer sorts, selected by the
/// schema (spec: plain, with one id, with two ids).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellIdShape {
	/// `[coords | attrs…]` — irregular tiling, row or column order.
	Plain,
	/// `[id | coords | attrs…]` — the tile id (regular), or the Hilbert key
	/// (irregular + Hilbert).
	OneId,
	/// `[tile_id | cell_id | coords | attrs…]` — regular + Hilbert.
	TwoIds,
}

/// Schema of one array. Pure data plus order arithmetic.
#[derive(Clone, Debug, PartialEq)]
pub struct ArraySchema {
	name: String,
	dense: bool,
	dimensions: Vec<Dimension>,
	attributes: Vec<Attribute>,
	coord_type: Datatype,
	tile_extents: Option<Vec<f64>>,
	tile_order: TileOrder,
	cell_order: CellOrder,
	capacity: u64,
	coords_codec: Codec,
	coords_level: i32,
}

impl ArraySchema {
	/// An irregular (capacity-bounded) schema, the layout of sparse arrays.
	pub fn irregular(
		name: impl Into<String>,
		dimensions: Vec<Dimension>,
		attributes: Vec<Attribute>,
		coord_type: Datatype,
		cell_order: CellOrder,
		capacity: u64,
	) -> Result<ArraySchema> {
		let schema = ArraySchema {
			name: name.into(),
			dense: false,
			dimensions,
			attributes,
			coord_type,
			tile_extents: None,
			tile_order: TileOrder::None,
			cell_order,
			capacity,
			coords_codec: Codec::None,
			coords_level: 0,
		};
		schema.validate()?;
		Ok(schema)
	}

	/// A regular schema: tile extents define hyper-rectangular space tiles.
	#[allow(clippy::too_many_arguments)]
	pub fn regular(
		name: impl Into<String>,
		dense: bool,
		dimensions: Vec<Dimension>,
		attributes: Vec<Attribute>,
		coord_type: Datatype,
		tile_extents: Vec<f64>,
		tile_order: TileOrder,
		cell_order: CellOrder,
		capacity: u64,
	) -> Result<ArraySchema> {
		let schema = ArraySchema {
			name: name.into(),
			dense,
			dimensions,
			attributes,
			coord_type,
			tile_extents: Some(tile_extents),
			tile_order,
			cell_order,
			capacity,
			coords_codec: Codec::None,
			coords_level: 0,
		};
		schema.validate()?;
		Ok(schema)
	}

	/// Reassembles a schema from its parts; used by deserialization.
	#[allow(clippy::too_many_arguments)]
	pub(crate) fn from_parts(
		name: String,
		dense: bool,
		dimensions: Vec<Dimension>,
		attributes: Vec<Attribute>,
		coord_type: Datatype,
		tile_extents: Option<Vec<f64>>,
		tile_order: TileOrder,
		cell_order: CellOrder,
		capacity: u64,
		coords_codec: Codec,
		coords_level: i32,
	) -> Result<ArraySchema> {
		let schema = ArraySchema {
			name,
			dense,
			dimensions,
			attributes,
			coord_type,
			tile_extents,
			tile_order,
			cell_order,
			capacity,
			coords_codec,
			coords_level,
		};
		schema.validate()?;
		Ok(schema)
	}

	/// Sets the codec of the coordinates attribute.
	pub fn with_coords_codec(mut self, codec: Codec, level: i32) -> ArraySchema {
		self.coords_codec = codec;
		self.coords_level = level;
		self
	}

	fn validate(&self) -> Result<()> {
		let schema_error = |message: String| StorageError::Schema(message);
		ensure!(
			!self.name.is_empty(),
			schema_error("array name must not be empty".to_string())
		);
		ensure!(
			!self.dimensions.is_empty(),
			schema_error("arrays need at least one dimension".to_string())
		);
		ensure!(
			!self.attributes.is_empty(),
			schema_error("arrays need at least one attribute".to_string())
		);
		ensure!(
			self.coord_type.is_numeric(),
			schema_error(format!("{:?} cannot be a coordinate type", self.coord_type))
		);
		ensure!(
			self.capacity >= 1,
			schema_error("tile capacity must be at least 1".to_string())
		);

		// Duplicate names across dimensions, attributes and the reserved
		// coordinates attribute.
		let coords_name = COORDS_NAME.to_string();
		let duplicates: Vec<&String> = std::iter::once(&coords_name)
			.chain(self.dimensions.iter().map(|d| &d.name))
			.chain(self.attributes.iter().map(|a| &a.name))
			.duplicates()
			.collect();
		ensure!(
			duplicates.is_empty(),
			schema_error(format!("duplicate names {duplicates:?} in schema"))
		);

		for dimension in &self.dimensions {
			ensure!(
				dimension.lo <= dimension.hi,
				schema_error(format!(
					"dimension {:?} has lo {} > hi {}",
					dimension.name, dimension.lo, dimension.hi
				))
			);
		}

		match &self.tile_extents {
			Some(extents) => {
				ensure!(
					self.tile_order != TileOrder::None,
					schema_error("regular tiling needs a tile order".to_string())
				);
				ensure!(
					extents.len() == self.dimensions.len(),
					schema_error(format!(
						"{} tile extents for {} dimensions",
						extents.len(),
						self.dimensions.len()
					))
				);
				for (extent, dimension) in extents.iter().zip(self.dimensions.iter()) {
					ensure!(
						*extent > 0.0 && *extent <= dimension.span(),
						schema_error(format!(
							"tile extent {} of dimension {:?} exceeds its range",
							extent, dimension.name
						))
					);
				}
			}
			None => {
				ensure!(
					self.tile_order == TileOrder::None,
					schema_error("irregular tiling cannot have a tile order".to_string())
				);
				ensure!(
					!self.dense,
					schema_error("dense arrays need regular tiling".to_string())
				);
			}
		}

		if self.cell_order == CellOrder::Hilbert {
			ensure!(
				self.dimensions.len() <= 62,
				schema_error("hilbert order supports at most 62 dimensions".to_string())
			);
		}
		Ok(())
	}

	// --- plain accessors -------------------------------------------------

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn dense(&self) -> bool {
		self.dense
	}

	pub fn dim_num(&self) -> usize {
		self.dimensions.len()
	}

	pub fn attribute_num(&self) -> usize {
		self.attributes.len()
	}

	pub fn dimensions(&self) -> &[Dimension] {
		&self.dimensions
	}

	pub fn attributes(&self) -> &[Attribute] {
		&self.attributes
	}

	pub fn coord_type(&self) -> Datatype {
		self.coord_type
	}

	pub fn cell_order(&self) -> CellOrder {
		self.cell_order
	}

	pub fn tile_order(&self) -> TileOrder {
		self.tile_order
	}

	pub fn capacity(&self) -> u64 {
		self.capacity
	}

	pub fn is_regular(&self) -> bool {
		self.tile_extents.is_some()
	}

	pub fn tile_extents(&self) -> Option<&[f64]> {
		self.tile_extents.as_deref()
	}

	pub fn coords_codec(&self) -> (Codec, i32) {
		(self.coords_codec, self.coords_level)
	}

	/// The domain as per-dimension `(lo, hi)` pairs.
	pub fn domain(&self) -> Vec<(f64, f64)> {
		self.dimensions.iter().map(|d| (d.lo, d.hi)).collect()
	}

	/// Builds the coordinate ops table for this schema.
	pub fn coord_ops(&self) -> Result<CoordOps> {
		CoordOps::new(self.coord_type, self.dim_num())
	}

	pub fn coords_size(&self) -> usize {
		self.dim_num() * self.coord_type.size()
	}

	// --- attribute addressing (coordinates live at index attribute_num) --

	/// Resolves an attribute name to its index; `__coords` maps to
	/// `attribute_num`.
	pub fn attribute_index(&self, name: &str) -> Result<usize> {
		if name == COORDS_NAME {
			return Ok(self.attribute_num());
		}
		self
			.attributes
			.iter()
			.position(|a| a.name == name)
			.ok_or_else(|| StorageError::Schema(format!("unknown attribute {name:?}")).into())
	}

	pub fn attr_name(&self, index: usize) -> &str {
		if index == self.attribute_num() {
			COORDS_NAME
		} else {
			&self.attributes[index].name
		}
	}

	pub fn attr_datatype(&self, index: usize) -> Datatype {
		if index == self.attribute_num() {
			self.coord_type
		} else {
			self.attributes[index].datatype
		}
	}

	pub fn attr_cell_val_num(&self, index: usize) -> CellValNum {
		if index == self.attribute_num() {
			CellValNum::Fixed(self.dim_num() as u32)
		} else {
			self.attributes[index].cell_val_num
		}
	}

	pub fn attr_codec(&self, index: usize) -> (Codec, i32) {
		if index == self.attribute_num() {
			(self.coords_codec, self.coords_level)
		} else {
			(self.attributes[index].codec, self.attributes[index].level)
		}
	}

	/// The fixed byte size of one cell of attribute `index`, or `None` for
	/// variable cells.
	pub fn attr_cell_size(&self, index: usize) -> Option<usize> {
		if index == self.attribute_num() {
			Some(self.coords_size())
		} else {
			self.attributes[index].cell_size()
		}
	}

	pub fn has_var_attrs(&self) -> bool {
		self.attributes.iter().any(|a| a.cell_val_num.is_var())
	}

	// --- order arithmetic ------------------------------------------------

	/// Which physical cell shape the fragment writer sorts.
	pub fn cell_id_shape(&self) -> CellIdShape {
		match (self.is_regular(), self.cell_order) {
			(false, CellOrder::Hilbert) => CellIdShape::OneId,
			(false, _) => CellIdShape::Plain,
			(true, CellOrder::Hilbert) => CellIdShape::TwoIds,
			(true, _) => CellIdShape::OneId,
		}
	}

	/// The tile id of a coordinate tuple: 0 for irregular tiling, otherwise
	/// the order-preserving linearization of `(coord - lo) / extent` under
	/// the tile order. Runs in 64-bit integers, allocation free.
	pub fn tile_id(&self, ops: &CoordOps, coords: &[u8]) -> i64 {
		let Some(extents) = &self.tile_extents else {
			return 0;
		};
		let mut id: i64 = 0;
		let mut stride: i64 = 1;
		let mut step = |d: usize| {
			let dimension = &self.dimensions[d];
			let tile = ((ops.value_at(coords, d) - dimension.lo) / extents[d]).floor() as i64;
			id += tile * stride;
			stride *= (dimension.span() / extents[d]).ceil() as i64;
		};
		match self.tile_order {
			TileOrder::ColMajor => (0..self.dim_num()).for_each(&mut step),
			_ => (0..self.dim_num()).rev().for_each(&mut step),
		}
		id
	}

	/// The linear offset of a cell inside its tile under a row- or
	/// column-major cell order.
	pub fn cell_position_in_tile(&self, ops: &CoordOps, coords: &[u8]) -> i64 {
		let Some(extents) = &self.tile_extents else {
			return 0;
		};
		let mut position: i64 = 0;
		let mut stride: i64 = 1;
		let mut step = |d: usize| {
			let offset = ops.value_at(coords, d) - self.dimensions[d].lo;
			let in_tile = offset - (offset / extents[d]).floor() * extents[d];
			position += in_tile.floor() as i64 * stride;
			stride *= extents[d].ceil() as i64;
		};
		match self.cell_order {
			CellOrder::ColMajor => (0..self.dim_num()).for_each(&mut step),
			_ => (0..self.dim_num()).rev().for_each(&mut step),
		}
		position
	}

	/// The intra-tile sort key of a cell: the Hilbert key for Hilbert order,
	/// the linear in-tile position otherwise.
	pub fn cell_id(&self, ops: &CoordOps, coords: &[u8]) -> Result<i64> {
		match self.cell_order {
			CellOrder::Hilbert => ops.hilbert_key(coords, &self.domain()),
			_ => Ok(self.cell_position_in_tile(ops, coords)),
		}
	}

	/// Compares two coordinate tuples in cell order. Hilbert order compares
	/// the Hilbert keys first and falls back to row-major on ties.
	pub fn compare_cell_order(&self, ops: &CoordOps, a: &[u8], b: &[u8]) -> Result<Ordering> {
		Ok(match self.cell_order {
			CellOrder::RowMajor => ops.compare_row_major(a, b),
			CellOrder::ColMajor => ops.compare_col_major(a, b),
			CellOrder::Hilbert => {
				let domain = self.domain();
				let keys = ops
					.hilbert_key(a, &domain)?
					.cmp(&ops.hilbert_key(b, &domain)?);
				match keys {
					Ordering::Equal => ops.compare_row_major(a, b),
					other => other,
				}
			}
		})
	}

	/// Compares two coordinate tuples in global order: tile order first,
	/// then cell order.
	pub fn compare_tile_cell_order(&self, ops: &CoordOps, a: &[u8], b: &[u8]) -> Result<Ordering> {
		if self.is_regular() {
			match self.tile_id(ops, a).cmp(&self.tile_id(ops, b)) {
				Ordering::Equal => {}
				other => return Ok(other),
			}
		}
		self.compare_cell_order(ops, a, b)
	}

	/// Classifies the overlap of `target` with `range` under this schema's
	/// cell order.
	pub fn subarray_overlap(&self, range: &[(f64, f64)], target: &[(f64, f64)]) -> Overlap {
		subarray_overlap(range, target, self.cell_order)
	}

	/// Snaps `range` outward to tile boundaries. Fails for irregular tiling.
	pub fn expand_to_tile_domain(&self, range: &[(f64, f64)]) -> Result<Vec<(f64, f64)>> {
		let Some(extents) = &self.tile_extents else {
			bail!(StorageError::Schema(
				"irregular tiling has no tile domain".to_string()
			));
		};
		Ok(expand_to_tile_domain(range, &self.domain(), extents))
	}

	/// The space box of the regular tile with the given id, in domain
	/// coordinates. Used to classify tiles of dense fragments, which carry
	/// no MBRs.
	pub fn tile_box(&self, tile_id: i64) -> Result<Vec<(f64, f64)>> {
		let Some(extents) = &self.tile_extents else {
			bail!(StorageError::Schema(
				"irregular tiling has no tile boxes".to_string()
			));
		};
		let dims: Vec<usize> = match self.tile_order {
			TileOrder::ColMajor => (0..self.dim_num()).collect(),
			_ => (0..self.dim_num()).rev().collect(),
		};
		let mut remaining = tile_id;
		let mut bounds = vec![(0.0, 0.0); self.dim_num()];
		for d in dims {
			let dimension = &self.dimensions[d];
			let tiles_in_dim = (dimension.span() / extents[d]).ceil() as i64;
			let tile = remaining % tiles_in_dim;
			remaining /= tiles_in_dim;
			let lo = dimension.lo + tile as f64 * extents[d];
			bounds[d] = (lo, (lo + extents[d] - 1.0).min(dimension.hi));
		}
		Ok(bounds)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn dims_2d() -> Vec<Dimension> {
		vec![
			Dimension::new("x", 0.0, 50.0).unwrap(),
			Dimension::new("y", 0.0, 50.0).unwrap(),
		]
	}

	fn attrs() -> Vec<Attribute> {
		vec![
			Attribute::new("a1", Datatype::Int32).unwrap(),
			Attribute::new("a2", Datatype::Float32).unwrap(),
		]
	}

	fn sparse_schema() -> ArraySchema {
		ArraySchema::irregular(
			"test",
			dims_2d(),
			attrs(),
			Datatype::Int32,
			CellOrder::Hilbert,
			5,
		)
		.unwrap()
	}

	fn regular_schema() -> ArraySchema {
		ArraySchema::regular(
			"test",
			false,
			dims_2d(),
			attrs(),
			Datatype::Int32,
			vec![10.0, 10.0],
			TileOrder::RowMajor,
			CellOrder::RowMajor,
			10_000,
		)
		.unwrap()
	}

	#[test]
	fn validation_catches_bad_schemas() {
		// duplicate names
		let mut attributes = attrs();
		attributes.push(Attribute::new("a1", Datatype::Int32).unwrap());
		assert!(
			ArraySchema::irregular("t", dims_2d(), attributes, Datatype::Int32, CellOrder::RowMajor, 5)
				.is_err()
		);
		// oversized extent
		assert!(
			ArraySchema::regular(
				"t",
				false,
				dims_2d(),
				attrs(),
				Datatype::Int32,
				vec![10.0, 100.0],
				TileOrder::RowMajor,
				CellOrder::RowMajor,
				1,
			)
			.is_err()
		);
		// char coordinates
		assert!(
			ArraySchema::irregular("t", dims_2d(), attrs(), Datatype::Char, CellOrder::RowMajor, 5)
				.is_err()
		);
		// reserved name
		let reserved = vec![Attribute::new(COORDS_NAME, Datatype::Int32).unwrap()];
		assert!(
			ArraySchema::irregular("t", dims_2d(), reserved, Datatype::Int32, CellOrder::RowMajor, 5)
				.is_err()
		);
	}

	#[test]
	fn attribute_addressing_includes_coordinates() -> Result<()> {
		let schema = sparse_schema();
		assert_eq!(schema.attribute_index("a2")?, 1);
		assert_eq!(schema.attribute_index(COORDS_NAME)?, 2);
		assert_eq!(schema.attr_name(2), COORDS_NAME);
		assert_eq!(schema.attr_datatype(2), Datatype::Int32);
		assert_eq!(schema.attr_cell_size(2), Some(8));
		assert!(schema.attribute_index("missing").is_err());
		Ok(())
	}

	#[test]
	fn tile_ids_linearize_in_tile_order() -> Result<()> {
		let schema = regular_schema();
		let ops = schema.coord_ops()?;
		// 6 tiles per dimension (50 / 10 rounded up), row-major strides.
		assert_eq!(schema.tile_id(&ops, &ops.coords_from_f64(&[0.0, 0.0])), 0);
		assert_eq!(schema.tile_id(&ops, &ops.coords_from_f64(&[0.0, 10.0])), 1);
		assert_eq!(schema.tile_id(&ops, &ops.coords_from_f64(&[10.0, 0.0])), 6);
		assert_eq!(schema.tile_id(&ops, &ops.coords_from_f64(&[15.0, 25.0])), 8);
		Ok(())
	}

	#[test]
	fn irregular_tile_ids_are_zero() -> Result<()> {
		let schema = sparse_schema();
		let ops = schema.coord_ops()?;
		assert_eq!(schema.tile_id(&ops, &ops.coords_from_f64(&[40.0, 40.0])), 0);
		Ok(())
	}

	#[test]
	fn cell_positions_inside_a_tile() -> Result<()> {
		let schema = regular_schema();
		let ops = schema.coord_ops()?;
		assert_eq!(
			schema.cell_position_in_tile(&ops, &ops.coords_from_f64(&[10.0, 10.0])),
			0
		);
		assert_eq!(
			schema.cell_position_in_tile(&ops, &ops.coords_from_f64(&[10.0, 13.0])),
			3
		);
		assert_eq!(
			schema.cell_position_in_tile(&ops, &ops.coords_from_f64(&[12.0, 13.0])),
			23
		);
		Ok(())
	}

	#[test]
	fn hilbert_order_breaks_ties_row_major() -> Result<()> {
		let schema = sparse_schema();
		let ops = schema.coord_ops()?;
		let a = ops.coords_from_f64(&[3.0, 4.0]);
		let b = ops.coords_from_f64(&[3.0, 4.0]);
		assert_eq!(schema.compare_cell_order(&ops, &a, &b)?, Ordering::Equal);

		// Hilbert order differs from plain row-major somewhere in the domain.
		let mut differs = false;
		'outer: for i in 0..64 {
			for j in 0..64 {
				let p = ops.coords_from_f64(&[(i / 8) as f64, (i % 8) as f64]);
				let q = ops.coords_from_f64(&[(j / 8) as f64, (j % 8) as f64]);
				if schema.compare_cell_order(&ops, &p, &q)? != ops.compare_row_major(&p, &q) {
					differs = true;
					break 'outer;
				}
			}
		}
		assert!(differs);
		Ok(())
	}

	#[test]
	fn global_order_puts_tiles_first() -> Result<()> {
		let schema = regular_schema();
		let ops = schema.coord_ops()?;
		// (9, 40) is in an earlier tile row than (10, 0).
		let a = ops.coords_from_f64(&[9.0, 40.0]);
		let b = ops.coords_from_f64(&[10.0, 0.0]);
		assert_eq!(schema.compare_tile_cell_order(&ops, &a, &b)?, Ordering::Less);
		Ok(())
	}

	#[test]
	fn tile_boxes_invert_tile_ids() -> Result<()> {
		let schema = regular_schema();
		let ops = schema.coord_ops()?;
		for coords in [[0.0, 0.0], [15.0, 25.0], [45.0, 45.0]] {
			let id = schema.tile_id(&ops, &ops.coords_from_f64(&coords));
			let tile_box = schema.tile_box(id)?;
			for (d, &value) in coords.iter().enumerate() {
				assert!(value >= tile_box[d].0 && value <= tile_box[d].1);
			}
		}
		Ok(())
	}
}
