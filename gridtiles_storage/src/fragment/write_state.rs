//! The write side of a fragment.
//!
//! Tiles arrive from the tile packer, one attribute at a time, already in
//! global order. Payloads are staged in per-attribute segment buffers and
//! flushed to the tile-data files in segment-sized writes. Closing the
//! fragment stores the book-keeping and creates the marker file — the
//! commit point. A fragment abandoned before the marker exists is invisible
//! to every reader.

use crate::fragment::{BookKeeping, MARKER_FILE, Tile, tile_data_path};
use anyhow::{Context, Result, bail, ensure};
use gridtiles_core::order::CoordOps;
use gridtiles_core::utils::compress;
use gridtiles_core::{ArraySchema, Blob, StorageError};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;

/// Segment-buffered tile appends for one fragment being written.
#[derive(Debug)]
pub struct WriteState {
	schema: Rc<ArraySchema>,
	dir: PathBuf,
	segment_size: usize,
	book: BookKeeping,
	buffers: Vec<Blob>,
	flushed: Vec<u64>,
	files: Vec<File>,
	last_ids: Vec<Option<i64>>,
}

impl WriteState {
	/// Creates the fragment directory and its tile-data files.
	pub fn create(schema: Rc<ArraySchema>, dir: PathBuf, segment_size: usize) -> Result<WriteState> {
		std::fs::create_dir_all(&dir)
			.map_err(|source| StorageError::io(format!("creating {}", dir.display()), source))?;
		let attr_num = schema.attribute_num() + 1;
		let mut files = Vec::with_capacity(attr_num);
		for attr in 0..attr_num {
			let path = tile_data_path(&dir, schema.attr_name(attr));
			files.push(
				File::create(&path)
					.map_err(|source| StorageError::io(format!("creating {}", path.display()), source))?,
			);
		}
		let book = BookKeeping::new(&schema);
		Ok(WriteState {
			dir,
			segment_size,
			book,
			// Segment buffers are sized once at open, not grown per append.
			buffers: (0..attr_num).map(|_| Blob::with_capacity(segment_size)).collect(),
			flushed: vec![0; attr_num],
			files,
			last_ids: vec![None; attr_num],
			schema,
		})
	}

	pub fn dir(&self) -> &std::path::Path {
		&self.dir
	}

	pub fn tile_num(&self) -> usize {
		self.book.tile_num()
	}

	/// Appends one tile of attribute `attr`. Tile ids must be strictly
	/// increasing per attribute; the coordinates attribute additionally
	/// records the tile id, MBR and bounding coordinates.
	pub fn append_tile(&mut self, attr: usize, tile: &Tile) -> Result<()> {
		ensure!(
			attr <= self.schema.attribute_num(),
			StorageError::State(format!("attribute index {attr} out of range"))
		);
		if let Some(last) = self.last_ids[attr] {
			ensure!(
				tile.id() > last,
				StorageError::State(format!(
					"tile id {} of attribute {:?} does not increase past {last}",
					tile.id(),
					self.schema.attr_name(attr)
				))
			);
		}
		self.last_ids[attr] = Some(tile.id());

		if attr == self.schema.attribute_num() {
			self.book.tile_ids.push(tile.id());
			if let Some(mbrs) = &mut self.book.mbrs {
				let Some(mbr) = tile.mbr() else {
					bail!(StorageError::State(format!(
						"coordinate tile {} carries no MBR",
						tile.id()
					)));
				};
				mbrs.push(mbr.to_vec());
			}
			let Some((first, last)) = tile.bounds() else {
				bail!(StorageError::State(format!(
					"coordinate tile {} carries no bounding coordinates",
					tile.id()
				)));
			};
			self.book.bounds.push((first.to_vec(), last.to_vec()));
		}

		// The offset is the total payload appended so far, buffered or not.
		self.book.offsets[attr].push(self.flushed[attr] + self.buffers[attr].len());

		let (codec, level) = self.schema.attr_codec(attr);
		let payload = compress(tile.payload().clone(), codec, level)
			.with_context(|| format!("compressing tile {} of attribute {attr}", tile.id()))?;

		// Flush before the buffer would exceed the segment size; oversized
		// payloads bypass the buffer entirely.
		if self.buffers[attr].len() + payload.len() > self.segment_size as u64 {
			self.flush(attr)?;
		}
		if payload.len() >= self.segment_size as u64 {
			self.write_out(attr, payload.as_slice())?;
		} else {
			self.buffers[attr].push_slice(payload.as_slice());
		}
		Ok(())
	}

	fn flush(&mut self, attr: usize) -> Result<()> {
		if self.buffers[attr].is_empty() {
			return Ok(());
		}
		log::trace!(
			"flushing {} bytes of attribute {:?}",
			self.buffers[attr].len(),
			self.schema.attr_name(attr)
		);
		let buffer = std::mem::take(&mut self.buffers[attr]);
		self.write_out(attr, buffer.as_slice())
	}

	fn write_out(&mut self, attr: usize, bytes: &[u8]) -> Result<()> {
		self.files[attr].write_all(bytes).map_err(|source| {
			StorageError::io(
				format!("writing segment of attribute {:?}", self.schema.attr_name(attr)),
				source,
			)
		})?;
		self.flushed[attr] += bytes.len() as u64;
		Ok(())
	}

	/// Flushes the remaining segment buffers, stores the book-keeping and
	/// writes the marker file. A failure on any step leaves no marker, so
	/// the directory is ignored on restart.
	pub fn close(mut self) -> Result<()> {
		for attr in 0..self.files.len() {
			self.flush(attr)?;
		}
		self.book.validate(&self.schema)?;
		self.book.store(&self.dir, &self.schema)?;
		std::fs::write(self.dir.join(MARKER_FILE), b"")
			.map_err(|source| StorageError::io("writing fragment marker".to_string(), source))?;
		log::debug!(
			"committed fragment {} with {} tiles",
			self.dir.display(),
			self.book.tile_num()
		);
		Ok(())
	}

	/// Removes the half-written fragment directory.
	pub fn abandon(self) -> Result<()> {
		std::fs::remove_dir_all(&self.dir)
			.map_err(|source| StorageError::io(format!("removing {}", self.dir.display()), source))?;
		Ok(())
	}
}
