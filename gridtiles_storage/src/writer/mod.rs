//! The fragment writer: unordered cells in, ordered tiles out.
//!
//! Cells accumulate in an in-memory run buffer; when the buffer reaches the
//! configured write buffer size it is sorted and spilled as one run file in
//! the fragment's temp directory. Finalization merges the runs `K` at a
//! time (`K` = write buffer / segment size − 1, one input buffer per run
//! plus the output) until one merged stream remains, which feeds the tile
//! packer and through it the write state.

mod merge;
mod run;
mod tile_packer;

pub use tile_packer::TilePacker;

use crate::cells::{Cell, CellKey, compare_cells};
use crate::fragment::WriteState;
use crate::writer::merge::RunMerger;
use crate::writer::run::RunWriter;
use anyhow::{Context, Result, bail, ensure};
use byteorder::{ByteOrder, LittleEndian};
use gridtiles_core::order::CoordOps;
use gridtiles_core::{ArraySchema, CellValNum, StorageConfig, StorageError};
use std::path::PathBuf;
use std::rc::Rc;

/// External-sort producer of one fragment.
#[derive(Debug)]
pub struct FragmentWriter {
	schema: Rc<ArraySchema>,
	ops: CoordOps,
	write_buffer_size: usize,
	fan_in: usize,
	temp_dir: PathBuf,
	buffer: Vec<(CellKey, Cell)>,
	buffer_bytes: usize,
	runs: Vec<PathBuf>,
	run_seq: usize,
	write_state: Option<WriteState>,
}

impl FragmentWriter {
	/// Creates the output fragment directory and the temp directory for
	/// spilled runs.
	pub fn create(
		schema: Rc<ArraySchema>,
		config: &StorageConfig,
		fragment_dir: PathBuf,
		temp_dir: PathBuf,
	) -> Result<FragmentWriter> {
		std::fs::create_dir_all(&temp_dir)
			.map_err(|source| StorageError::io(format!("creating {}", temp_dir.display()), source))?;
		let write_state = WriteState::create(schema.clone(), fragment_dir, config.segment_size)?;
		Ok(FragmentWriter {
			ops: schema.coord_ops()?,
			write_buffer_size: config.write_buffer_size,
			fan_in: config.merge_fan_in(),
			temp_dir,
			buffer: Vec::new(),
			buffer_bytes: 0,
			runs: Vec::new(),
			run_seq: 0,
			write_state: Some(write_state),
			schema,
		})
	}

	/// Accepts one unordered cell. Fails with a state error after
	/// [`FragmentWriter::finalize`].
	pub fn write_cell(&mut self, cell: Cell) -> Result<()> {
		ensure!(
			self.write_state.is_some(),
			StorageError::State("fragment writer already finalized".to_string())
		);
		self.check_cell(&cell)?;
		let key = CellKey::compute(&self.schema, &self.ops, &cell.coords)?;

		self.buffer_bytes +=
			16 + cell.coords.len() + cell.attrs.iter().map(|a| a.len()).sum::<usize>();
		self.buffer.push((key, cell));
		if self.buffer_bytes >= self.write_buffer_size {
			self.spill_run()?;
		}
		Ok(())
	}

	fn check_cell(&self, cell: &Cell) -> Result<()> {
		ensure!(
			cell.coords.len() == self.schema.coords_size(),
			StorageError::State(format!(
				"cell carries {} coordinate bytes, schema needs {}",
				cell.coords.len(),
				self.schema.coords_size()
			))
		);
		ensure!(
			cell.attrs.len() == self.schema.attribute_num(),
			StorageError::State(format!(
				"cell carries {} attribute values, schema needs {}",
				cell.attrs.len(),
				self.schema.attribute_num()
			))
		);
		for (attr, payload) in cell.attrs.iter().enumerate() {
			match self.schema.attr_cell_val_num(attr) {
				CellValNum::Fixed(_) => {
					let expected = self.schema.attr_cell_size(attr).unwrap_or(0);
					ensure!(
						payload.len() == expected,
						StorageError::State(format!(
							"attribute {:?} payload has {} bytes, schema needs {expected}",
							self.schema.attr_name(attr),
							payload.len()
						))
					);
				}
				CellValNum::Var => {
					ensure!(
						payload.len() >= 4,
						StorageError::State(format!(
							"variable attribute {:?} payload misses its count",
							self.schema.attr_name(attr)
						))
					);
					let count = LittleEndian::read_i32(&payload[..4]) as usize;
					let expected = 4 + count * self.schema.attr_datatype(attr).size();
					ensure!(
						payload.len() == expected,
						StorageError::State(format!(
							"variable attribute {:?} payload has {} bytes for {count} values",
							self.schema.attr_name(attr),
							payload.len()
						))
					);
				}
			}
		}
		Ok(())
	}

	/// Sorts the current buffer and writes it out as one run.
	fn spill_run(&mut self) -> Result<()> {
		if self.buffer.is_empty() {
			return Ok(());
		}
		self.sort_buffer();
		let path = self.temp_dir.join(format!("run_{}", self.run_seq));
		self.run_seq += 1;
		log::debug!(
			"spilling run {} with {} cells",
			path.display(),
			self.buffer.len()
		);
		let mut writer = RunWriter::create(path)?;
		for (key, cell) in self.buffer.drain(..) {
			writer.write(&self.schema, &key, &cell)?;
		}
		self.runs.push(writer.finish()?);
		self.buffer_bytes = 0;
		Ok(())
	}

	// The sort is stable, so cells at identical coordinates keep their
	// arrival order within the batch.
	fn sort_buffer(&mut self) {
		let ops = &self.ops;
		let cell_order = self.schema.cell_order();
		self
			.buffer
			.sort_by(|a, b| compare_cells(ops, cell_order, (&a.0, &a.1.coords), (&b.0, &b.1.coords)));
	}

	/// Sorts and merges everything accepted so far, packs the cells into
	/// tiles and commits the fragment.
	pub fn finalize(mut self) -> Result<()> {
		let Some(mut write_state) = self.write_state.take() else {
			bail!(StorageError::State("fragment writer already finalized".to_string()));
		};

		let result = (|| -> Result<()> {
			if self.runs.is_empty() {
				// Everything fit in memory: pack straight out of the buffer.
				self.sort_buffer();
				let mut packer = TilePacker::new(&self.schema, &self.ops, &mut write_state);
				for (key, cell) in std::mem::take(&mut self.buffer) {
					packer.push(&key, &cell)?;
				}
				packer.finish()?;
				return Ok(());
			}

			self.spill_run()?;
			self.reduce_runs()?;
			let mut merger = RunMerger::open(&self.schema, &self.runs)?;
			let mut packer = TilePacker::new(&self.schema, &self.ops, &mut write_state);
			while let Some((key, cell)) = merger.next()? {
				packer.push(&key, &cell)?;
			}
			packer.finish()?;
			Ok(())
		})();

		match result {
			Ok(()) => {
				write_state.close().context("committing fragment")?;
				self.remove_temp_dir();
				Ok(())
			}
			Err(error) => {
				// Leave no marker: the half-written fragment must stay
				// invisible.
				let _ = write_state.abandon();
				self.remove_temp_dir();
				Err(error)
			}
		}
	}

	/// Merges runs `fan_in` at a time until at most `fan_in` remain.
	fn reduce_runs(&mut self) -> Result<()> {
		while self.runs.len() > self.fan_in {
			let batch: Vec<PathBuf> = self.runs.drain(..self.fan_in).collect();
			let path = self.temp_dir.join(format!("run_{}", self.run_seq));
			self.run_seq += 1;
			log::debug!(
				"merging {} runs into {}",
				batch.len(),
				path.display()
			);
			let mut merger = RunMerger::open(&self.schema, &batch)?;
			let mut writer = RunWriter::create(path)?;
			while let Some((key, cell)) = merger.next()? {
				writer.write(&self.schema, &key, &cell)?;
			}
			self.runs.push(writer.finish()?);
			for run in batch {
				let _ = std::fs::remove_file(run);
			}
		}
		Ok(())
	}

	/// Drops the fragment without committing it.
	pub fn abandon(mut self) -> Result<()> {
		if let Some(write_state) = self.write_state.take() {
			write_state.abandon()?;
		}
		self.remove_temp_dir();
		Ok(())
	}

	fn remove_temp_dir(&self) {
		if let Err(error) = std::fs::remove_dir_all(&self.temp_dir) {
			log::warn!(
				"could not remove temp dir {}: {error}",
				self.temp_dir.display()
			);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cells::CellStream;
	use crate::fragment::{FragmentName, ReadState};
	use gridtiles_core::{Attribute, CellOrder, Datatype, Dimension};

	fn schema(cell_order: CellOrder) -> Rc<ArraySchema> {
		Rc::new(
			ArraySchema::irregular(
				"test",
				vec![
					Dimension::new("x", 0.0, 50.0).unwrap(),
					Dimension::new("y", 0.0, 50.0).unwrap(),
				],
				vec![Attribute::new("a1", Datatype::Int32).unwrap()],
				Datatype::Int32,
				cell_order,
				4,
			)
			.unwrap(),
		)
	}

	fn tiny_config() -> StorageConfig {
		StorageConfig {
			segment_size: 64,
			write_buffer_size: 256,
			consolidation_step: 3,
		}
	}

	fn write_unordered(
		schema: &Rc<ArraySchema>,
		config: &StorageConfig,
		dir: &std::path::Path,
		count: i32,
	) -> Result<()> {
		let ops = schema.coord_ops()?;
		let mut writer = FragmentWriter::create(
			schema.clone(),
			config,
			dir.join("A_0_0"),
			dir.join("temp"),
		)?;
		// Descending arrival order exercises the sort.
		for i in (0..count).rev() {
			writer.write_cell(Cell::new(
				ops.coords_from_f64(&[(i % 50) as f64, (i / 50) as f64]),
				vec![i.to_le_bytes().to_vec()],
			))?;
		}
		writer.finalize()
	}

	fn read_all_coords(schema: &Rc<ArraySchema>, dir: &std::path::Path) -> Result<Vec<Vec<f64>>> {
		let state = ReadState::open(
			schema.clone(),
			FragmentName::single(0),
			dir.join("A_0_0"),
			64,
		)?;
		let ops = schema.coord_ops()?;
		let mut stream = CellStream::open(&state)?;
		let mut coords = Vec::new();
		while let Some((_, cell)) = stream.next()? {
			coords.push(ops.coords_to_f64(&cell.coords));
		}
		Ok(coords)
	}

	#[test]
	fn spills_and_merges_into_global_order() -> Result<()> {
		let schema = schema(CellOrder::RowMajor);
		let config = tiny_config();
		let dir = tempfile::tempdir()?;
		// 120 cells of ~24 bytes: several spilled runs at a 256-byte buffer.
		write_unordered(&schema, &config, dir.path(), 120)?;

		let coords = read_all_coords(&schema, dir.path())?;
		assert_eq!(coords.len(), 120);
		assert!(coords.windows(2).all(|pair| pair[0] < pair[1]));
		Ok(())
	}

	#[test]
	fn hilbert_output_is_sorted_by_key() -> Result<()> {
		let schema = schema(CellOrder::Hilbert);
		let config = tiny_config();
		let dir = tempfile::tempdir()?;
		write_unordered(&schema, &config, dir.path(), 60)?;

		let ops = schema.coord_ops()?;
		let domain = schema.domain();
		let coords = read_all_coords(&schema, dir.path())?;
		assert_eq!(coords.len(), 60);
		let keys: Vec<i64> = coords
			.iter()
			.map(|c| ops.hilbert_key(&ops.coords_from_f64(c), &domain))
			.collect::<Result<_>>()?;
		assert!(keys.windows(2).all(|pair| pair[0] <= pair[1]));
		Ok(())
	}

	#[test]
	fn regular_tiling_seals_on_tile_boundaries() -> Result<()> {
		use gridtiles_core::TileOrder;
		let schema = Rc::new(
			ArraySchema::regular(
				"test",
				false,
				vec![
					Dimension::new("x", 0.0, 19.0).unwrap(),
					Dimension::new("y", 0.0, 19.0).unwrap(),
				],
				vec![Attribute::new("a1", Datatype::Int32).unwrap()],
				Datatype::Int32,
				vec![10.0, 10.0],
				TileOrder::RowMajor,
				CellOrder::RowMajor,
				10_000,
			)
			.unwrap(),
		);
		let config = tiny_config();
		let dir = tempfile::tempdir()?;
		let ops = schema.coord_ops()?;

		let mut writer = FragmentWriter::create(
			schema.clone(),
			&config,
			dir.path().join("A_0_0"),
			dir.path().join("temp"),
		)?;
		// One cell in each of the four space tiles plus a second in tile 0,
		// arriving shuffled.
		for coords in [[12.0, 3.0], [1.0, 1.0], [3.0, 15.0], [14.0, 16.0], [2.0, 2.0]] {
			writer.write_cell(Cell::new(
				ops.coords_from_f64(&coords),
				vec![1i32.to_le_bytes().to_vec()],
			))?;
		}
		writer.finalize()?;

		let state = ReadState::open(
			schema.clone(),
			FragmentName::single(0),
			dir.path().join("A_0_0"),
			config.segment_size,
		)?;
		let tiles: Vec<(i64, usize)> = state
			.tile_iter(schema.attribute_num())
			.map(|tile| tile.map(|t| (t.id(), t.cell_num())))
			.collect::<Result<_>>()?;
		// Space tile ids under row-major tile order, two cells landing in
		// tile 0.
		assert_eq!(tiles, vec![(0, 2), (1, 1), (2, 1), (3, 1)]);
		Ok(())
	}

	#[test]
	fn writes_after_finalize_are_refused() -> Result<()> {
		let schema = schema(CellOrder::RowMajor);
		let config = tiny_config();
		let dir = tempfile::tempdir()?;
		let writer = FragmentWriter::create(
			schema.clone(),
			&config,
			dir.path().join("A_0_0"),
			dir.path().join("temp"),
		)?;
		writer.finalize()?;
		// A finalized writer is consumed; a new writer over the same path
		// still refuses malformed cells.
		let mut writer = FragmentWriter::create(
			schema.clone(),
			&config,
			dir.path().join("A_1_1"),
			dir.path().join("temp"),
		)?;
		let error = writer
			.write_cell(Cell::new(vec![0u8; 3], vec![vec![0u8; 4]]))
			.unwrap_err();
		assert!(matches!(
			gridtiles_core::storage_error(&error),
			Some(StorageError::State(_))
		));
		writer.abandon()?;
		Ok(())
	}
}
