//! The public array surface.
//!
//! A [`Workspace`] is a directory holding one subdirectory per array, each
//! with its schema blob, its fragment tree and its live fragments. Arrays
//! are opened in read or write mode; a read handle sees the fragment
//! snapshot taken at open time (its descriptors pin the underlying files,
//! so later consolidations cannot disturb it), a write handle accepts
//! unordered cell batches and consolidates implicitly.

use crate::cells::{Cell, MergeStream};
use crate::consolidator::{Consolidator, FragmentTree};
use crate::fragment::ReadState;
use crate::storage_manager::{FragmentHandle, StorageManager};
use anyhow::{Context, Result, bail, ensure};
use gridtiles_core::io::read_file;
use gridtiles_core::{ArraySchema, StorageConfig, StorageError};
use std::path::PathBuf;
use std::rc::Rc;

/// File name of the per-array schema blob.
pub const SCHEMA_FILE: &str = "__schema.bkp";

/// How an array is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArrayMode {
	Read,
	Write,
}

/// An opaque descriptor of an open array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArrayHandle {
	slot: usize,
	generation: u64,
}

struct OpenArray {
	name: String,
	mode: ArrayMode,
	generation: u64,
	schema: Rc<ArraySchema>,
	tree: FragmentTree,
	/// Read mode: the fragment snapshot, opened eagerly at `open_array`.
	snapshot: Vec<FragmentHandle>,
}

/// A directory of arrays and the engine state to serve them.
pub struct Workspace {
	manager: StorageManager,
	consolidator: Consolidator,
	arrays: Vec<Option<OpenArray>>,
	next_generation: u64,
}

impl Workspace {
	/// Opens (creating if needed) the workspace directory.
	pub fn open(root: impl Into<PathBuf>, config: StorageConfig) -> Result<Workspace> {
		let consolidator = Consolidator::new(config.consolidation_step);
		let manager = StorageManager::new(root.into(), config)?;
		Ok(Workspace {
			manager,
			consolidator,
			arrays: Vec::new(),
			next_generation: 1,
		})
	}

	pub fn manager(&self) -> &StorageManager {
		&self.manager
	}

	/// Creates a new array: its directory and its schema blob.
	pub fn create_array(&mut self, schema: &ArraySchema) -> Result<()> {
		let dir = self.manager.array_dir(schema.name());
		ensure!(
			!dir.join(SCHEMA_FILE).exists(),
			StorageError::State(format!("array {:?} already exists", schema.name()))
		);
		std::fs::create_dir_all(&dir)
			.map_err(|source| StorageError::io(format!("creating {}", dir.display()), source))?;
		let blob = schema.to_blob()?;
		let temp = dir.join(format!("{SCHEMA_FILE}.tmp"));
		std::fs::write(&temp, blob.as_slice())
			.map_err(|source| StorageError::io("writing schema blob".to_string(), source))?;
		std::fs::rename(&temp, dir.join(SCHEMA_FILE))
			.map_err(|source| StorageError::io("renaming schema blob".to_string(), source))?;
		log::debug!("created array {:?}", schema.name());
		Ok(())
	}

	pub fn array_exists(&self, name: &str) -> bool {
		self.manager.array_dir(name).join(SCHEMA_FILE).exists()
	}

	/// Opens an array. Read mode takes a fragment snapshot; write mode is
	/// exclusive per array.
	pub fn open_array(&mut self, name: &str, mode: ArrayMode) -> Result<ArrayHandle> {
		ensure!(
			self.array_exists(name),
			StorageError::State(format!("array {name:?} does not exist"))
		);
		if mode == ArrayMode::Write {
			let already_writing = self.arrays.iter().flatten().any(|array| {
				array.name == name && array.mode == ArrayMode::Write
			});
			ensure!(
				!already_writing,
				StorageError::State(format!("array {name:?} is already open in write mode"))
			);
		}

		let blob = read_file(&self.manager.array_dir(name).join(SCHEMA_FILE))
			.with_context(|| format!("loading schema of array {name:?}"))?;
		let schema = Rc::new(ArraySchema::from_blob(&blob)?);
		let tree = self.consolidator.load_tree(&self.manager, name)?;

		let mut snapshot = Vec::new();
		if mode == ArrayMode::Read {
			for fragment in tree.suffixes(self.consolidator.step()) {
				snapshot.push(self.manager.open_fragment_read(&schema, name, &fragment)?);
			}
		}

		let generation = self.next_generation;
		self.next_generation += 1;
		let open = OpenArray {
			name: name.to_string(),
			mode,
			generation,
			schema,
			tree,
			snapshot,
		};
		let slot = match self.arrays.iter().position(|slot| slot.is_none()) {
			Some(slot) => {
				self.arrays[slot] = Some(open);
				slot
			}
			None => {
				self.arrays.push(Some(open));
				self.arrays.len() - 1
			}
		};
		Ok(ArrayHandle { slot, generation })
	}

	fn slot_of(&self, handle: ArrayHandle) -> Result<usize> {
		let valid = self
			.arrays
			.get(handle.slot)
			.and_then(|slot| slot.as_ref())
			.is_some_and(|array| array.generation == handle.generation);
		ensure!(
			valid,
			StorageError::State(format!(
				"stale array handle (slot {}, generation {})",
				handle.slot, handle.generation
			))
		);
		Ok(handle.slot)
	}

	/// The schema of an open array.
	pub fn schema(&self, handle: ArrayHandle) -> Result<&Rc<ArraySchema>> {
		let slot = self.slot_of(handle)?;
		Ok(&self.arrays[slot].as_ref().expect("validated slot").schema)
	}

	/// The live fragment names of an open array's current tree.
	pub fn live_fragments(&self, handle: ArrayHandle) -> Result<Vec<crate::fragment::FragmentName>> {
		let slot = self.slot_of(handle)?;
		let array = self.arrays[slot].as_ref().expect("validated slot");
		Ok(array.tree.suffixes(self.consolidator.step()))
	}

	/// Writes one batch of unordered cells as a new fragment and lets the
	/// consolidator run every merge the fragment tree calls for.
	pub fn write_cells(
		&mut self,
		handle: ArrayHandle,
		cells: impl IntoIterator<Item = Cell>,
	) -> Result<()> {
		let slot = self.slot_of(handle)?;
		let array = self.arrays[slot].as_mut().expect("validated slot");
		ensure!(
			array.mode == ArrayMode::Write,
			StorageError::State(format!("array {:?} is open read-only", array.name))
		);

		let name = array.tree.next_fragment_name();
		let mut writer = self
			.manager
			.fragment_writer(&array.schema, &array.name, &name)?;
		let mut failed = None;
		for cell in cells {
			if let Err(error) = writer.write_cell(cell) {
				failed = Some(error);
				break;
			}
		}
		match failed {
			None => writer.finalize()?,
			Some(error) => {
				let _ = writer.abandon();
				return Err(error).context("writing cell batch");
			}
		}

		let schema = array.schema.clone();
		let array_name = array.name.clone();
		self
			.consolidator
			.add_fragment(&mut self.manager, &schema, &array_name, &mut array.tree)
	}

	/// Runs any merges the fragment tree calls for, without adding cells.
	pub fn consolidate(&mut self, handle: ArrayHandle) -> Result<()> {
		let slot = self.slot_of(handle)?;
		let array = self.arrays[slot].as_mut().expect("validated slot");
		ensure!(
			array.mode == ArrayMode::Write,
			StorageError::State(format!("array {:?} is open read-only", array.name))
		);
		let schema = array.schema.clone();
		let array_name = array.name.clone();
		self
			.consolidator
			.consolidate(&mut self.manager, &schema, &array_name, &mut array.tree)
	}

	/// Reads every live cell inside the closed per-dimension `range`, in
	/// global cell order, newest version wins, deletions applied.
	pub fn read(&mut self, handle: ArrayHandle, range: &[(f64, f64)]) -> Result<Vec<Cell>> {
		let slot = self.slot_of(handle)?;
		let array = self.arrays[slot].as_ref().expect("validated slot");
		ensure!(
			range.len() == array.schema.dim_num(),
			StorageError::State(format!(
				"range of {} dimensions queried against {} dimensions",
				range.len(),
				array.schema.dim_num()
			))
		);
		let schema = array.schema.clone();

		// Read handles use their snapshot; write handles open the current
		// live set for the duration of the call.
		let (handles, transient) = match array.mode {
			ArrayMode::Read => (array.snapshot.clone(), false),
			ArrayMode::Write => {
				let fragments = array.tree.suffixes(self.consolidator.step());
				let name = array.name.clone();
				let mut handles = Vec::with_capacity(fragments.len());
				for fragment in fragments {
					handles.push(self.manager.open_fragment_read(&schema, &name, &fragment)?);
				}
				(handles, true)
			}
		};

		let result = self.merge_in_range(&schema, &handles, range);
		if transient {
			for handle in handles {
				self.manager.close_fragment_read(handle)?;
			}
		}
		result
	}

	fn merge_in_range(
		&self,
		schema: &Rc<ArraySchema>,
		handles: &[FragmentHandle],
		range: &[(f64, f64)],
	) -> Result<Vec<Cell>> {
		// Fragments whose tiles all miss the range cannot contribute cells
		// or mask anything inside it.
		let mut states: Vec<&ReadState> = Vec::with_capacity(handles.len());
		for &handle in handles {
			let state = self.manager.read_state(handle)?;
			if state.tile_num() > 0 && !state.overlapping_tile_ids(range)?.is_empty() {
				states.push(state);
			}
		}
		if states.is_empty() {
			return Ok(Vec::new());
		}

		let ops = schema.coord_ops()?;
		let mut stream = MergeStream::open(&states, true)?;
		let mut cells = Vec::new();
		while let Some(cell) = stream.next()? {
			if ops.in_range(&cell.coords, range) {
				cells.push(cell);
			}
		}
		Ok(cells)
	}

	/// Reads one attribute: `(coords, payload)` pairs in global cell order.
	pub fn read_attribute(
		&mut self,
		handle: ArrayHandle,
		range: &[(f64, f64)],
		attribute: &str,
	) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
		let index = self.schema(handle)?.attribute_index(attribute)?;
		let attribute_num = self.schema(handle)?.attribute_num();
		ensure!(
			index < attribute_num,
			StorageError::State(format!("{attribute:?} is not a readable attribute"))
		);
		Ok(
			self
				.read(handle, range)?
				.into_iter()
				.map(|mut cell| (std::mem::take(&mut cell.coords), cell.attrs.swap_remove(index)))
				.collect(),
		)
	}

	/// Closes an array handle: read snapshots are released, write handles
	/// flush their fragment tree.
	pub fn close_array(&mut self, handle: ArrayHandle) -> Result<()> {
		let slot = self.slot_of(handle)?;
		let array = self.arrays[slot].take().expect("validated slot");
		for fragment in array.snapshot {
			self.manager.close_fragment_read(fragment)?;
		}
		if array.mode == ArrayMode::Write {
			self
				.consolidator
				.flush_tree(&self.manager, &array.name, &array.tree)?;
		}
		Ok(())
	}

	/// Removes an array and everything it stores. The array must not be
	/// open.
	pub fn delete_array(&mut self, name: &str) -> Result<()> {
		let open = self.arrays.iter().flatten().any(|array| array.name == name);
		ensure!(
			!open,
			StorageError::State(format!("array {name:?} is open"))
		);
		if !self.array_exists(name) {
			bail!(StorageError::State(format!("array {name:?} does not exist")));
		}
		self.manager.delete_array(name)
	}
}
