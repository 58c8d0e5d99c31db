//! Sorted run files.
//!
//! Each spill of the in-memory cell buffer becomes one run: a contiguous
//! sequence of encoded cells in global order. Runs with variable-sized
//! cells carry a `u32` size prefix per cell so the merge reader can advance
//! cell by cell in a single pass.

use crate::cells::{Cell, CellKey, decode_cell, encode_cell, fixed_wire_size};
use anyhow::{Context, Result};
use gridtiles_core::{ArraySchema, StorageError};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Appends encoded cells to a run file.
pub struct RunWriter {
	writer: BufWriter<File>,
	path: PathBuf,
	scratch: Vec<u8>,
}

impl RunWriter {
	pub fn create(path: PathBuf) -> Result<RunWriter> {
		let file = File::create(&path)
			.map_err(|source| StorageError::io(format!("creating run {}", path.display()), source))?;
		Ok(RunWriter {
			writer: BufWriter::new(file),
			path,
			scratch: Vec::new(),
		})
	}

	pub fn write(&mut self, schema: &ArraySchema, key: &CellKey, cell: &Cell) -> Result<()> {
		self.scratch.clear();
		encode_cell(schema, key, cell, &mut self.scratch);
		self
			.writer
			.write_all(&self.scratch)
			.map_err(|source| StorageError::io("writing run cell".to_string(), source))?;
		Ok(())
	}

	pub fn finish(mut self) -> Result<PathBuf> {
		self
			.writer
			.flush()
			.map_err(|source| StorageError::io("flushing run".to_string(), source))?;
		Ok(self.path)
	}
}

/// Streams cells back out of a run file, one look-ahead cell at a time.
pub struct RunReader {
	schema: Rc<ArraySchema>,
	reader: BufReader<File>,
	path: PathBuf,
	remaining: u64,
	fixed_size: Option<usize>,
	head: Option<(CellKey, Cell)>,
}

impl RunReader {
	pub fn open(schema: Rc<ArraySchema>, path: &Path) -> Result<RunReader> {
		let file = File::open(path)
			.map_err(|source| StorageError::io(format!("opening run {}", path.display()), source))?;
		let remaining = file
			.metadata()
			.map_err(|source| StorageError::io(format!("inspecting run {}", path.display()), source))?
			.len();
		let mut reader = RunReader {
			fixed_size: fixed_wire_size(&schema),
			schema,
			reader: BufReader::new(file),
			path: path.to_path_buf(),
			remaining,
			head: None,
		};
		reader.head = reader.read_cell()?;
		Ok(reader)
	}

	/// The next cell without consuming it.
	pub fn peek(&self) -> Option<&(CellKey, Cell)> {
		self.head.as_ref()
	}

	/// Consumes and returns the current cell, priming the next one.
	pub fn advance(&mut self) -> Result<Option<(CellKey, Cell)>> {
		let current = self.head.take();
		if current.is_some() {
			self.head = self.read_cell()?;
		}
		Ok(current)
	}

	fn read_cell(&mut self) -> Result<Option<(CellKey, Cell)>> {
		if self.remaining == 0 {
			return Ok(None);
		}
		let body_size = match self.fixed_size {
			Some(size) => size,
			None => {
				let mut prefix = [0u8; 4];
				self.read_bytes(&mut prefix)?;
				u32::from_le_bytes(prefix) as usize
			}
		};
		let mut body = vec![0u8; body_size];
		self.read_bytes(&mut body)?;
		let cell = decode_cell(&self.schema, &body)
			.with_context(|| format!("decoding cell from run {}", self.path.display()))?;
		Ok(Some(cell))
	}

	fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<()> {
		if (buffer.len() as u64) > self.remaining {
			return Err(
				StorageError::Format(format!(
					"run {} ends inside a cell ({} bytes short)",
					self.path.display(),
					buffer.len() as u64 - self.remaining
				))
				.into(),
			);
		}
		self
			.reader
			.read_exact(buffer)
			.map_err(|source| StorageError::io(format!("reading run {}", self.path.display()), source))?;
		self.remaining -= buffer.len() as u64;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use gridtiles_core::{Attribute, CellOrder, Datatype, Dimension};

	fn schema() -> Rc<ArraySchema> {
		Rc::new(
			ArraySchema::irregular(
				"test",
				vec![
					Dimension::new("x", 0.0, 50.0).unwrap(),
					Dimension::new("y", 0.0, 50.0).unwrap(),
				],
				vec![Attribute::new("a1", Datatype::Int32).unwrap()],
				Datatype::Int32,
				CellOrder::RowMajor,
				5,
			)
			.unwrap(),
		)
	}

	#[test]
	fn write_then_stream_back() -> Result<()> {
		let schema = schema();
		let ops = schema.coord_ops()?;
		let dir = tempfile::tempdir()?;
		let path = dir.path().join("run_0");

		let mut writer = RunWriter::create(path.clone())?;
		for i in 0..4i32 {
			let cell = Cell::new(
				ops.coords_from_f64(&[i as f64, 0.0]),
				vec![i.to_le_bytes().to_vec()],
			);
			writer.write(&schema, &CellKey::default(), &cell)?;
		}
		writer.finish()?;

		let mut reader = RunReader::open(schema.clone(), &path)?;
		let mut seen = Vec::new();
		while let Some((_, cell)) = reader.advance()? {
			seen.push(ops.value_at(&cell.coords, 0));
		}
		assert_eq!(seen, vec![0.0, 1.0, 2.0, 3.0]);
		assert!(reader.peek().is_none());
		Ok(())
	}

	#[test]
	fn truncated_runs_are_a_format_error() -> Result<()> {
		let schema = schema();
		let ops = schema.coord_ops()?;
		let dir = tempfile::tempdir()?;
		let path = dir.path().join("run_0");
		let mut writer = RunWriter::create(path.clone())?;
		let cell = Cell::new(ops.coords_from_f64(&[1.0, 1.0]), vec![vec![0; 4]]);
		writer.write(&schema, &CellKey::default(), &cell)?;
		writer.finish()?;

		let bytes = std::fs::read(&path)?;
		std::fs::write(&path, &bytes[..bytes.len() - 2])?;
		assert!(RunReader::open(schema, &path).is_err());
		Ok(())
	}
}
