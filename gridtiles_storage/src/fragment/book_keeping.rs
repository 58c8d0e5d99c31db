//! Fragment book-keeping.
//!
//! Four files, written once when a fragment is finalized and loaded whole
//! when it is opened for reading:
//!
//! - `tile_ids.bkp` — `u64 tile_num; u64 id[tile_num]`
//! - `offsets.bkp`  — per attribute (schema order, coordinates last):
//!   `u64 offset[tile_num]`
//! - `mbrs.bkp`     — per tile `2 × dim_num` coordinates; absent for dense
//!   fragments
//! - `bounds.bkp`   — per tile two coordinate tuples
//!
//! A file whose size is not a whole multiple of its record size is a format
//! error and the fragment is rejected as a whole.

use crate::fragment::{BOUNDS_FILE, MBRS_FILE, OFFSETS_FILE, TILE_IDS_FILE};
use anyhow::{Context, Result, bail, ensure};
use gridtiles_core::io::{ValueReaderSlice, ValueWriter, ValueWriterFile, read_file};
use gridtiles_core::{ArraySchema, StorageError};
use std::path::Path;

/// The loaded indices of one fragment.
#[derive(Debug, Default, PartialEq)]
pub struct BookKeeping {
	/// Logical tile ids, strictly increasing.
	pub tile_ids: Vec<i64>,
	/// Per attribute (coordinates last), the byte offset of every tile in
	/// its tile-data file.
	pub offsets: Vec<Vec<u64>>,
	/// Per-tile MBRs as raw coordinate bytes; `None` for dense fragments.
	pub mbrs: Option<Vec<Vec<u8>>>,
	/// Per-tile first and last coordinate tuples in cell order.
	pub bounds: Vec<(Vec<u8>, Vec<u8>)>,
}

impl BookKeeping {
	pub fn new(schema: &ArraySchema) -> BookKeeping {
		BookKeeping {
			tile_ids: Vec::new(),
			offsets: vec![Vec::new(); schema.attribute_num() + 1],
			mbrs: if schema.dense() { None } else { Some(Vec::new()) },
			bounds: Vec::new(),
		}
	}

	pub fn tile_num(&self) -> usize {
		self.tile_ids.len()
	}

	/// Verifies the cross-index invariants before a store or after a load.
	pub fn validate(&self, schema: &ArraySchema) -> Result<()> {
		let tile_num = self.tile_num();
		ensure!(
			self.offsets.len() == schema.attribute_num() + 1,
			StorageError::Format(format!(
				"book-keeping holds {} offset lists for {} attributes",
				self.offsets.len(),
				schema.attribute_num() + 1
			))
		);
		for (attr, offsets) in self.offsets.iter().enumerate() {
			ensure!(
				offsets.len() == tile_num,
				StorageError::Format(format!(
					"attribute {:?} has {} offsets for {} tiles",
					schema.attr_name(attr),
					offsets.len(),
					tile_num
				))
			);
		}
		if let Some(mbrs) = &self.mbrs {
			ensure!(
				mbrs.len() == tile_num,
				StorageError::Format(format!("{} MBRs for {tile_num} tiles", mbrs.len()))
			);
		}
		ensure!(
			self.bounds.len() == tile_num,
			StorageError::Format(format!(
				"{} bounding coordinates for {tile_num} tiles",
				self.bounds.len()
			))
		);
		ensure!(
			self.tile_ids.windows(2).all(|pair| pair[0] < pair[1]),
			StorageError::Format("tile ids are not strictly increasing".to_string())
		);
		Ok(())
	}

	/// Loads and validates the four files from a fragment directory.
	pub fn load(dir: &Path, schema: &ArraySchema) -> Result<BookKeeping> {
		let attr_num = schema.attribute_num() + 1;
		let coords_size = schema.coords_size();

		// tile ids
		let blob = read_file(&dir.join(TILE_IDS_FILE)).context("loading tile ids")?;
		let mut reader = ValueReaderSlice::from_blob(&blob);
		let tile_num = reader.read_u64()? as usize;
		if blob.len() != 8 + 8 * tile_num as u64 {
			bail!(StorageError::Format(format!(
				"tile_ids.bkp holds {} bytes for {tile_num} tiles",
				blob.len()
			)));
		}
		let mut tile_ids = Vec::with_capacity(tile_num);
		for _ in 0..tile_num {
			tile_ids.push(reader.read_u64()? as i64);
		}

		// offsets
		let blob = read_file(&dir.join(OFFSETS_FILE)).context("loading offsets")?;
		if blob.len() != (attr_num * tile_num * 8) as u64 {
			bail!(StorageError::Format(format!(
				"offsets.bkp holds {} bytes, expected {}",
				blob.len(),
				attr_num * tile_num * 8
			)));
		}
		let mut reader = ValueReaderSlice::from_blob(&blob);
		let mut offsets = Vec::with_capacity(attr_num);
		for _ in 0..attr_num {
			let mut list = Vec::with_capacity(tile_num);
			for _ in 0..tile_num {
				list.push(reader.read_u64()?);
			}
			offsets.push(list);
		}

		// mbrs (sparse fragments only)
		let mbrs = if schema.dense() {
			None
		} else {
			let blob = read_file(&dir.join(MBRS_FILE)).context("loading MBRs")?;
			let record = 2 * coords_size as u64;
			if blob.len() != record * tile_num as u64 {
				bail!(StorageError::Format(format!(
					"mbrs.bkp holds {} bytes, expected {}",
					blob.len(),
					record * tile_num as u64
				)));
			}
			let mut reader = ValueReaderSlice::from_blob(&blob);
			let mut mbrs = Vec::with_capacity(tile_num);
			for _ in 0..tile_num {
				mbrs.push(reader.read_slice(2 * coords_size)?);
			}
			Some(mbrs)
		};

		// bounding coordinates
		let blob = read_file(&dir.join(BOUNDS_FILE)).context("loading bounding coordinates")?;
		let record = 2 * coords_size as u64;
		if blob.len() != record * tile_num as u64 {
			bail!(StorageError::Format(format!(
				"bounds.bkp holds {} bytes, expected {}",
				blob.len(),
				record * tile_num as u64
			)));
		}
		let mut reader = ValueReaderSlice::from_blob(&blob);
		let mut bounds = Vec::with_capacity(tile_num);
		for _ in 0..tile_num {
			let first = reader.read_slice(coords_size)?;
			let last = reader.read_slice(coords_size)?;
			bounds.push((first, last));
		}

		let book = BookKeeping {
			tile_ids,
			offsets,
			mbrs,
			bounds,
		};
		book.validate(schema)?;
		Ok(book)
	}

	/// Writes the four files. Each is written under a temporary name and
	/// renamed into place, so a crash never leaves a half-written index.
	pub fn store(&self, dir: &Path, schema: &ArraySchema) -> Result<()> {
		self.validate(schema)?;
		log::debug!(
			"storing book-keeping for {} tiles in {}",
			self.tile_num(),
			dir.display()
		);

		let mut writer = writer_for(dir, TILE_IDS_FILE)?;
		writer.write_u64(self.tile_num() as u64)?;
		for &id in &self.tile_ids {
			writer.write_u64(id as u64)?;
		}
		commit(writer, dir, TILE_IDS_FILE)?;

		let mut writer = writer_for(dir, OFFSETS_FILE)?;
		for offsets in &self.offsets {
			for &offset in offsets {
				writer.write_u64(offset)?;
			}
		}
		commit(writer, dir, OFFSETS_FILE)?;

		if let Some(mbrs) = &self.mbrs {
			let mut writer = writer_for(dir, MBRS_FILE)?;
			for mbr in mbrs {
				writer.write_slice(mbr)?;
			}
			commit(writer, dir, MBRS_FILE)?;
		}

		let mut writer = writer_for(dir, BOUNDS_FILE)?;
		for (first, last) in &self.bounds {
			writer.write_slice(first)?;
			writer.write_slice(last)?;
		}
		commit(writer, dir, BOUNDS_FILE)?;

		Ok(())
	}
}

fn writer_for(dir: &Path, name: &str) -> Result<ValueWriterFile> {
	ValueWriterFile::from_path(&dir.join(format!("{name}.tmp")))
}

fn commit(writer: ValueWriterFile, dir: &Path, name: &str) -> Result<()> {
	writer.finish()?;
	std::fs::rename(dir.join(format!("{name}.tmp")), dir.join(name))
		.map_err(|source| StorageError::io(format!("renaming {name} into place"), source))?;
	Ok(())
}
