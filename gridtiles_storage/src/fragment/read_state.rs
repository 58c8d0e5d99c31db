//! The read side of a fragment.
//!
//! Opening a fragment loads its book-keeping and pins its tile-data files
//! open for the lifetime of the descriptor, so a consolidation that unlinks
//! the directory cannot pull the data out from under a reader snapshot.
//!
//! Tiles are materialized on demand: when an iterator dereferences a tile
//! outside the cached window, a contiguous run of payloads whose summed
//! size just reaches the segment size is read with one filesystem call and
//! parsed into shared [`Tile`]s. Forward iteration grows the window forward
//! from the requested tile; reverse iteration reads the run that ends at
//! the requested tile.

use crate::fragment::{BookKeeping, FragmentName, MARKER_FILE, Tile, tile_data_path};
use anyhow::{Context, Result, ensure};
use gridtiles_core::io::file_size;
use gridtiles_core::order::{CoordOps, Overlap, range_overlap};
use gridtiles_core::utils::decompress;
use gridtiles_core::{ArraySchema, Blob, ByteRange, StorageError};
use std::cell::{Cell, RefCell};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::rc::Rc;

#[derive(Default, Debug)]
struct Window {
	lo: usize,
	tiles: Vec<Rc<Tile>>,
}

impl Window {
	fn get(&self, pos: usize) -> Option<Rc<Tile>> {
		if pos >= self.lo && pos < self.lo + self.tiles.len() {
			Some(self.tiles[pos - self.lo].clone())
		} else {
			None
		}
	}
}

/// An open fragment descriptor in read mode.
#[derive(Debug)]
pub struct ReadState {
	schema: Rc<ArraySchema>,
	ops: CoordOps,
	name: FragmentName,
	dir: PathBuf,
	segment_size: usize,
	book: BookKeeping,
	files: Vec<RefCell<File>>,
	file_sizes: Vec<u64>,
	windows: Vec<RefCell<Window>>,
	fill_count: Cell<u64>,
}

impl ReadState {
	/// Opens a committed fragment. A directory without the marker file was
	/// never committed and is refused.
	pub fn open(
		schema: Rc<ArraySchema>,
		name: FragmentName,
		dir: PathBuf,
		segment_size: usize,
	) -> Result<ReadState> {
		ensure!(
			dir.join(MARKER_FILE).exists(),
			StorageError::State(format!("fragment {} is not committed", dir.display()))
		);
		let book = BookKeeping::load(&dir, &schema)
			.with_context(|| format!("opening fragment {name}"))?;
		let ops = schema.coord_ops()?;

		let attr_num = schema.attribute_num() + 1;
		let mut files = Vec::with_capacity(attr_num);
		let mut file_sizes = Vec::with_capacity(attr_num);
		for attr in 0..attr_num {
			let path = tile_data_path(&dir, schema.attr_name(attr));
			file_sizes.push(file_size(&path)?);
			let file = File::open(&path)
				.map_err(|source| StorageError::io(format!("opening {}", path.display()), source))?;
			files.push(RefCell::new(file));
		}

		Ok(ReadState {
			windows: (0..attr_num).map(|_| RefCell::new(Window::default())).collect(),
			schema,
			ops,
			name,
			dir,
			segment_size,
			book,
			files,
			file_sizes,
			fill_count: Cell::new(0),
		})
	}

	pub fn schema(&self) -> &Rc<ArraySchema> {
		&self.schema
	}

	pub fn ops(&self) -> &CoordOps {
		&self.ops
	}

	pub fn name(&self) -> FragmentName {
		self.name
	}

	pub fn dir(&self) -> &std::path::Path {
		&self.dir
	}

	pub fn tile_num(&self) -> usize {
		self.book.tile_num()
	}

	pub fn book(&self) -> &BookKeeping {
		&self.book
	}

	/// How many window refills this descriptor has performed.
	pub fn fill_count(&self) -> u64 {
		self.fill_count.get()
	}

	/// The on-disk byte size of tile `pos` of attribute `attr`.
	fn tile_size(&self, attr: usize, pos: usize) -> u64 {
		let offsets = &self.book.offsets[attr];
		let end = offsets
			.get(pos + 1)
			.copied()
			.unwrap_or(self.file_sizes[attr]);
		end - offsets[pos]
	}

	/// The tile at position `pos`, filling the window forward on a miss.
	pub fn tile(&self, attr: usize, pos: usize) -> Result<Rc<Tile>> {
		self.tile_with(attr, pos, false)
	}

	/// The tile at position `pos`, filling the window backward on a miss.
	pub fn tile_rev(&self, attr: usize, pos: usize) -> Result<Rc<Tile>> {
		self.tile_with(attr, pos, true)
	}

	fn tile_with(&self, attr: usize, pos: usize, reverse: bool) -> Result<Rc<Tile>> {
		ensure!(
			pos < self.tile_num(),
			StorageError::State(format!(
				"tile position {pos} out of range for fragment {}",
				self.name
			))
		);
		if let Some(tile) = self.windows[attr].borrow().get(pos) {
			return Ok(tile);
		}
		if reverse {
			self.fill_backward(attr, pos)?;
		} else {
			self.fill_forward(attr, pos)?;
		}
		Ok(
			self.windows[attr]
				.borrow()
				.get(pos)
				.expect("freshly filled window contains the requested tile"),
		)
	}

	fn fill_forward(&self, attr: usize, start: usize) -> Result<()> {
		let mut n = 0;
		let mut total = 0u64;
		while start + n < self.tile_num() && total < self.segment_size as u64 {
			total += self.tile_size(attr, start + n);
			n += 1;
		}
		self.fill(attr, start, n, total)
	}

	fn fill_backward(&self, attr: usize, target: usize) -> Result<()> {
		let mut start = target;
		let mut total = self.tile_size(attr, target);
		while start > 0 && total < self.segment_size as u64 {
			start -= 1;
			total += self.tile_size(attr, start);
		}
		self.fill(attr, start, target - start + 1, total)
	}

	/// Reads the run `[start, start + n)` with one filesystem call and
	/// parses it into the new window.
	fn fill(&self, attr: usize, start: usize, n: usize, total: u64) -> Result<()> {
		let segment_range = ByteRange::new(self.book.offsets[attr][start], total);
		let base = segment_range.offset;
		let mut segment = vec![0u8; segment_range.length as usize];
		{
			let mut file = self.files[attr].borrow_mut();
			file.seek(SeekFrom::Start(segment_range.offset)).map_err(|source| {
				StorageError::io(format!("seeking in tile data of attribute {attr}"), source)
			})?;
			file.read_exact(&mut segment).map_err(|source| {
				StorageError::io(format!("reading segment of attribute {attr}"), source)
			})?;
		}
		self.fill_count.set(self.fill_count.get() + 1);
		log::trace!(
			"window refill: fragment {} attribute {attr} tiles [{start}, {}) at {segment_range:?}",
			self.name,
			start + n
		);

		let is_coords = attr == self.schema.attribute_num();
		let datatype = self.schema.attr_datatype(attr);
		let cell_val_num = self.schema.attr_cell_val_num(attr);
		let (codec, _) = self.schema.attr_codec(attr);
		let dim_num = if is_coords { self.schema.dim_num() } else { 0 };

		let mut tiles = Vec::with_capacity(n);
		for i in 0..n {
			let pos = start + i;
			let from = (self.book.offsets[attr][pos] - base) as usize;
			let to = from + self.tile_size(attr, pos) as usize;
			let payload = decompress(Blob::from(&segment[from..to]), codec)
				.with_context(|| format!("tile {pos} of fragment {}", self.name))?;
			let mut tile = Tile::from_payload(
				self.book.tile_ids[pos],
				datatype,
				cell_val_num,
				dim_num,
				payload,
			)?;
			if is_coords {
				let mbr = self.book.mbrs.as_ref().map(|mbrs| mbrs[pos].clone());
				let bounds = self.book.bounds[pos].clone();
				tile.set_mbr_bounds(mbr, bounds);
			}
			tiles.push(Rc::new(tile));
		}

		*self.windows[attr].borrow_mut() = Window { lo: start, tiles };
		Ok(())
	}

	/// Forward tile iterator over one attribute.
	pub fn tile_iter(&self, attr: usize) -> TileIterator<'_> {
		TileIterator {
			state: self,
			attr,
			pos: 0,
		}
	}

	/// Reverse tile iterator over one attribute, newest tile first.
	pub fn tile_iter_rev(&self, attr: usize) -> ReverseTileIterator<'_> {
		ReverseTileIterator {
			state: self,
			attr,
			pos: self.tile_num(),
		}
	}

	/// Scans the per-tile MBRs and classifies each against `range`.
	/// Returns `(tile_id, fully_contained)` for every overlapping tile.
	/// Dense fragments carry no MBRs; their tiles are classified by the
	/// space box their tile id describes.
	pub fn overlapping_tile_ids(&self, range: &[(f64, f64)]) -> Result<Vec<(i64, bool)>> {
		ensure!(
			range.len() == self.schema.dim_num(),
			StorageError::State(format!(
				"range of {} dimensions queried against {} dimensions",
				range.len(),
				self.schema.dim_num()
			))
		);
		let mut result = Vec::new();
		for pos in 0..self.tile_num() {
			let target = match &self.book.mbrs {
				Some(mbrs) => self.ops.mbr_to_ranges(&mbrs[pos]),
				None => self.schema.tile_box(self.book.tile_ids[pos])?,
			};
			match range_overlap(range, &target) {
				Overlap::None => {}
				Overlap::Full => result.push((self.book.tile_ids[pos], true)),
				_ => result.push((self.book.tile_ids[pos], false)),
			}
		}
		Ok(result)
	}

	/// The position of `tile_id` in this fragment, if present.
	pub fn tile_rank(&self, tile_id: i64) -> Option<usize> {
		self.book.tile_ids.binary_search(&tile_id).ok()
	}
}

/// Forward iterator over the tiles of one attribute.
pub struct TileIterator<'a> {
	state: &'a ReadState,
	attr: usize,
	pos: usize,
}

impl Iterator for TileIterator<'_> {
	type Item = Result<Rc<Tile>>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.pos >= self.state.tile_num() {
			return None;
		}
		let tile = self.state.tile(self.attr, self.pos);
		self.pos += 1;
		Some(tile)
	}
}

/// Reverse iterator over the tiles of one attribute.
pub struct ReverseTileIterator<'a> {
	state: &'a ReadState,
	attr: usize,
	pos: usize,
}

impl Iterator for ReverseTileIterator<'_> {
	type Item = Result<Rc<Tile>>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.pos == 0 {
			return None;
		}
		self.pos -= 1;
		Some(self.state.tile_rev(self.attr, self.pos))
	}
}
