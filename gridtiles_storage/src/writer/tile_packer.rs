//! Packing ordered cells into tiles.
//!
//! Consumes the merged cell stream and groups it into tiles of at most
//! `capacity` cells (irregular) or one tile per space tile id (regular).
//! Sealing a tile finalizes its MBR and bounding coordinates and hands one
//! tile per attribute to the write state.

use crate::cells::{Cell, CellKey};
use crate::fragment::{Tile, WriteState};
use anyhow::Result;
use gridtiles_core::order::CoordOps;
use gridtiles_core::{ArraySchema, CellValNum};

/// Groups cells into tiles and appends them to a [`WriteState`].
pub struct TilePacker<'a> {
	schema: &'a ArraySchema,
	ops: &'a CoordOps,
	write_state: &'a mut WriteState,
	tiles: Option<Vec<Tile>>,
	next_tile_id: i64,
}

impl<'a> TilePacker<'a> {
	pub fn new(
		schema: &'a ArraySchema,
		ops: &'a CoordOps,
		write_state: &'a mut WriteState,
	) -> TilePacker<'a> {
		TilePacker {
			schema,
			ops,
			write_state,
			tiles: None,
			next_tile_id: 0,
		}
	}

	/// Appends one cell, sealing the current tile first when the cell
	/// belongs to a different tile id (regular) or the tile is at capacity
	/// (irregular).
	pub fn push(&mut self, key: &CellKey, cell: &Cell) -> Result<()> {
		let regular = self.schema.is_regular();
		if let Some(tiles) = &self.tiles {
			let coords_tile = &tiles[self.schema.attribute_num()];
			let boundary = if regular {
				coords_tile.id() != key.id1
			} else {
				coords_tile.cell_num() as u64 >= self.schema.capacity()
			};
			if boundary {
				self.seal()?;
			}
		}

		if self.tiles.is_none() {
			let id = if regular { key.id1 } else { self.next_tile_id };
			let fresh = self.new_tiles(id);
			self.tiles = Some(fresh);
		}
		if let Some(tiles) = self.tiles.as_mut() {
			for (attr, payload) in cell.attrs.iter().enumerate() {
				tiles[attr].append_cell(payload, None);
			}
			let coords_index = self.schema.attribute_num();
			tiles[coords_index].append_cell(&cell.coords, Some(self.ops));
		}
		Ok(())
	}

	fn new_tiles(&self, id: i64) -> Vec<Tile> {
		let attribute_num = self.schema.attribute_num();
		let mut tiles = Vec::with_capacity(attribute_num + 1);
		for attr in 0..attribute_num {
			tiles.push(Tile::new(
				id,
				self.schema.attr_datatype(attr),
				self.schema.attr_cell_val_num(attr),
				0,
			));
		}
		tiles.push(Tile::new(
			id,
			self.schema.coord_type(),
			CellValNum::Fixed(self.schema.dim_num() as u32),
			self.schema.dim_num(),
		));
		tiles
	}

	fn seal(&mut self) -> Result<()> {
		if let Some(tiles) = self.tiles.take() {
			for (attr, tile) in tiles.iter().enumerate() {
				self.write_state.append_tile(attr, tile)?;
			}
			self.next_tile_id += 1;
		}
		Ok(())
	}

	/// Seals the trailing partial tile, if any.
	pub fn finish(&mut self) -> Result<()> {
		self.seal()
	}
}
