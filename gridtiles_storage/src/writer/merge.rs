//! K-way merge of sorted runs.
//!
//! Runs are merged with a linear scan over the look-ahead cells of the open
//! readers; with the fan-in bounded by the write buffer this beats a heap
//! in simplicity without hurting the constant. Ties (equal keys and equal
//! coordinates) resolve to the run created first, so the arrival order of
//! duplicate coordinates inside one batch survives the whole sort.

use crate::cells::{Cell, CellKey, compare_cells};
use crate::writer::run::RunReader;
use anyhow::Result;
use gridtiles_core::order::CoordOps;
use gridtiles_core::{ArraySchema, CellOrder};
use std::cmp::Ordering;
use std::path::Path;
use std::rc::Rc;

/// Streams the cells of several sorted runs in their merged global order.
pub struct RunMerger {
	ops: CoordOps,
	cell_order: CellOrder,
	inputs: Vec<RunReader>,
}

impl RunMerger {
	pub fn open(schema: &Rc<ArraySchema>, paths: &[impl AsRef<Path>]) -> Result<RunMerger> {
		let inputs = paths
			.iter()
			.map(|path| RunReader::open(schema.clone(), path.as_ref()))
			.collect::<Result<Vec<_>>>()?;
		Ok(RunMerger {
			ops: schema.coord_ops()?,
			cell_order: schema.cell_order(),
			inputs,
		})
	}

	/// The next cell in global order, or `None` when every run is drained.
	pub fn next(&mut self) -> Result<Option<(CellKey, Cell)>> {
		let mut best: Option<usize> = None;
		for (index, input) in self.inputs.iter().enumerate() {
			let Some((key, cell)) = input.peek() else {
				continue;
			};
			let better = match best {
				None => true,
				Some(current) => {
					let (best_key, best_cell) = self.inputs[current]
						.peek()
						.expect("best candidate has a head");
					compare_cells(
						&self.ops,
						self.cell_order,
						(key, &cell.coords),
						(best_key, &best_cell.coords),
					) == Ordering::Less
				}
			};
			if better {
				best = Some(index);
			}
		}
		match best {
			None => Ok(None),
			Some(index) => self.inputs[index].advance(),
		}
	}
}
