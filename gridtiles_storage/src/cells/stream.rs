//! Streaming the cells of one fragment in global order.
//!
//! A [`CellStream`] walks the coordinate tiles and every attribute tile of
//! a fragment in lockstep, one cell at a time, re-deriving each cell's sort
//! ids so streams of different fragments can be merged.

use crate::cells::{Cell, CellKey};
use crate::fragment::{ReadState, Tile};
use anyhow::Result;
use std::rc::Rc;

/// A cursor over all cells of one open fragment.
pub struct CellStream<'a> {
	state: &'a ReadState,
	tile_pos: usize,
	cell_pos: usize,
	tiles: Vec<Rc<Tile>>,
}

impl<'a> CellStream<'a> {
	pub fn open(state: &'a ReadState) -> Result<CellStream<'a>> {
		Ok(CellStream {
			state,
			tile_pos: 0,
			cell_pos: 0,
			tiles: Vec::new(),
		})
	}

	pub fn state(&self) -> &'a ReadState {
		self.state
	}

	/// The next cell with its sort ids, or `None` at the end.
	pub fn next(&mut self) -> Result<Option<(CellKey, Cell)>> {
		let schema = self.state.schema().clone();
		let attribute_num = schema.attribute_num();
		loop {
			if self.tile_pos >= self.state.tile_num() {
				return Ok(None);
			}
			if self.tiles.is_empty() {
				for attr in 0..=attribute_num {
					self.tiles.push(self.state.tile(attr, self.tile_pos)?);
				}
			}
			let coords_tile = &self.tiles[attribute_num];
			if self.cell_pos >= coords_tile.cell_num() {
				self.tile_pos += 1;
				self.cell_pos = 0;
				self.tiles.clear();
				continue;
			}

			let coords = coords_tile.cell(self.cell_pos).to_vec();
			let attrs = (0..attribute_num)
				.map(|attr| self.tiles[attr].cell(self.cell_pos).to_vec())
				.collect();
			let key = CellKey::compute(&schema, self.state.ops(), &coords)?;
			self.cell_pos += 1;
			return Ok(Some((key, Cell { coords, attrs })));
		}
	}
}
