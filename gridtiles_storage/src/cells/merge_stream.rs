//! Merging cell streams of several fragments.
//!
//! The next cell is the smallest `(tile id, cell id, coordinates)` across
//! the live inputs. When several fragments hold a cell at the same
//! coordinates, the most recent fragment (the larger `hi` sequence number)
//! wins and the older candidates are discarded. A winning tombstone masks
//! the older cells either way; whether the tombstone itself is emitted is
//! the caller's choice — reads drop it, consolidations that do not reach
//! back to the first batch keep it so still-older fragments stay masked.

use crate::cells::{Cell, CellKey, CellStream, compare_cells};
use crate::fragment::ReadState;
use anyhow::Result;
use gridtiles_core::order::CoordOps;
use gridtiles_core::{ArraySchema, CellOrder};
use std::cmp::Ordering;
use std::rc::Rc;

/// Streams the union of several fragments in global order, newest wins.
pub struct MergeStream<'a> {
	schema: Rc<ArraySchema>,
	ops: CoordOps,
	cell_order: CellOrder,
	inputs: Vec<CellStream<'a>>,
	recency: Vec<u64>,
	heads: Vec<Option<(CellKey, Cell)>>,
	drop_tombstones: bool,
}

impl<'a> MergeStream<'a> {
	/// Opens a merge over the given fragments. `drop_tombstones` controls
	/// whether deletion cells are emitted after they have masked their
	/// older versions.
	pub fn open(states: &[&'a ReadState], drop_tombstones: bool) -> Result<MergeStream<'a>> {
		let schema = states
			.first()
			.map(|state| state.schema().clone())
			.ok_or_else(|| {
				gridtiles_core::StorageError::State(
					"merge stream needs at least one fragment".to_string(),
				)
			})?;
		let mut inputs = Vec::with_capacity(states.len());
		let mut recency = Vec::with_capacity(states.len());
		let mut heads = Vec::with_capacity(states.len());
		for state in states {
			let mut stream = CellStream::open(state)?;
			heads.push(stream.next()?);
			recency.push(state.name().hi);
			inputs.push(stream);
		}
		Ok(MergeStream {
			ops: schema.coord_ops()?,
			cell_order: schema.cell_order(),
			schema,
			inputs,
			recency,
			heads,
			drop_tombstones,
		})
	}

	/// The next surviving cell in global order.
	pub fn next(&mut self) -> Result<Option<Cell>> {
		loop {
			let Some(best) = self.pick()? else {
				return Ok(None);
			};
			let (_, winner) = self.heads[best].take().expect("picked head exists");
			self.heads[best] = self.inputs[best].next()?;

			// Discard every candidate at the winning coordinates, in every
			// input: older versions and in-batch duplicates alike.
			for index in 0..self.inputs.len() {
				while let Some((_, head)) = &self.heads[index] {
					if head.coords == winner.coords {
						self.heads[index] = self.inputs[index].next()?;
					} else {
						break;
					}
				}
			}

			if self.drop_tombstones && winner.is_deletion(&self.schema) {
				continue;
			}
			return Ok(Some(winner));
		}
	}

	/// Picks the input holding the globally smallest cell; coordinate ties
	/// go to the fragment with the larger `hi` sequence number.
	fn pick(&self) -> Result<Option<usize>> {
		let mut best: Option<usize> = None;
		for index in 0..self.heads.len() {
			let Some((key, cell)) = &self.heads[index] else {
				continue;
			};
			best = Some(match best {
				None => index,
				Some(current) => {
					let (best_key, best_cell) =
						self.heads[current].as_ref().expect("best candidate has a head");
					match compare_cells(
						&self.ops,
						self.cell_order,
						(key, &cell.coords),
						(best_key, &best_cell.coords),
					) {
						Ordering::Less => index,
						Ordering::Equal if self.recency[index] > self.recency[current] => index,
						_ => current,
					}
				}
			});
		}
		Ok(best)
	}
}
