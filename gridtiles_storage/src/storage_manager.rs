//! The storage manager.
//!
//! The only component that touches the filesystem layout: it owns the
//! workspace directory tree, creates fragment writers, and keeps the arena
//! of open read-mode fragments. Callers hold opaque [`FragmentHandle`]s; a
//! handle carries a generation id, so use after close is caught instead of
//! resolving to a recycled slot.

use crate::fragment::{FragmentName, ReadState, is_committed};
use crate::writer::FragmentWriter;
use anyhow::{Result, bail, ensure};
use gridtiles_core::{ArraySchema, StorageConfig, StorageError};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Name of the directory fragment writers spill their runs into.
const TEMP_DIR: &str = "__temp";

/// An opaque descriptor of an open read-mode fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FragmentHandle {
	slot: usize,
	generation: u64,
}

struct OpenFragment {
	generation: u64,
	state: ReadState,
}

/// Filesystem authority of one workspace.
pub struct StorageManager {
	workspace: PathBuf,
	config: StorageConfig,
	slots: Vec<Option<OpenFragment>>,
	next_generation: u64,
}

impl StorageManager {
	/// Creates the workspace directory if needed.
	pub fn new(workspace: PathBuf, config: StorageConfig) -> Result<StorageManager> {
		config.validate()?;
		std::fs::create_dir_all(&workspace)
			.map_err(|source| StorageError::io(format!("creating {}", workspace.display()), source))?;
		Ok(StorageManager {
			workspace,
			config,
			slots: Vec::new(),
			next_generation: 1,
		})
	}

	pub fn workspace(&self) -> &Path {
		&self.workspace
	}

	pub fn config(&self) -> &StorageConfig {
		&self.config
	}

	pub fn array_dir(&self, array: &str) -> PathBuf {
		self.workspace.join(array)
	}

	pub fn fragment_dir(&self, array: &str, name: &FragmentName) -> PathBuf {
		self.array_dir(array).join(name.to_string())
	}

	/// Whether the fragment exists and carries its commit marker.
	pub fn fragment_committed(&self, array: &str, name: &FragmentName) -> bool {
		is_committed(&self.fragment_dir(array, name))
	}

	/// Opens a committed fragment for reading and parks it in the arena.
	pub fn open_fragment_read(
		&mut self,
		schema: &Rc<ArraySchema>,
		array: &str,
		name: &FragmentName,
	) -> Result<FragmentHandle> {
		let state = ReadState::open(
			schema.clone(),
			*name,
			self.fragment_dir(array, name),
			self.config.segment_size,
		)?;
		let generation = self.next_generation;
		self.next_generation += 1;
		let open = OpenFragment { generation, state };

		let slot = match self.slots.iter().position(|slot| slot.is_none()) {
			Some(slot) => {
				self.slots[slot] = Some(open);
				slot
			}
			None => {
				self.slots.push(Some(open));
				self.slots.len() - 1
			}
		};
		log::trace!("opened fragment {name} of {array:?} as slot {slot} gen {generation}");
		Ok(FragmentHandle { slot, generation })
	}

	/// Resolves a handle, rejecting stale generations.
	pub fn read_state(&self, handle: FragmentHandle) -> Result<&ReadState> {
		let open = self
			.slots
			.get(handle.slot)
			.and_then(|slot| slot.as_ref())
			.filter(|open| open.generation == handle.generation);
		match open {
			Some(open) => Ok(&open.state),
			None => bail!(StorageError::State(format!(
				"stale fragment handle (slot {}, generation {})",
				handle.slot, handle.generation
			))),
		}
	}

	/// Closes a read descriptor and releases its tile cache.
	pub fn close_fragment_read(&mut self, handle: FragmentHandle) -> Result<()> {
		let valid = self
			.slots
			.get(handle.slot)
			.and_then(|slot| slot.as_ref())
			.is_some_and(|open| open.generation == handle.generation);
		ensure!(
			valid,
			StorageError::State(format!(
				"stale fragment handle (slot {}, generation {})",
				handle.slot, handle.generation
			))
		);
		self.slots[handle.slot] = None;
		Ok(())
	}

	/// Creates a writer for a new fragment of `array`.
	pub fn fragment_writer(
		&self,
		schema: &Rc<ArraySchema>,
		array: &str,
		name: &FragmentName,
	) -> Result<FragmentWriter> {
		let fragment_dir = self.fragment_dir(array, name);
		ensure!(
			!is_committed(&fragment_dir),
			StorageError::State(format!("fragment {name} of {array:?} already exists"))
		);
		// A directory without a marker is debris of a failed write.
		if fragment_dir.exists() {
			std::fs::remove_dir_all(&fragment_dir).map_err(|source| {
				StorageError::io(format!("removing stale {}", fragment_dir.display()), source)
			})?;
		}
		let temp_dir = self
			.workspace
			.join(TEMP_DIR)
			.join(format!("{array}_{name}"));
		FragmentWriter::create(schema.clone(), &self.config, fragment_dir, temp_dir)
	}

	/// Removes a fragment directory from disk. Open descriptors keep the
	/// unlinked files readable until they are closed.
	pub fn delete_fragment(&self, array: &str, name: &FragmentName) -> Result<()> {
		let dir = self.fragment_dir(array, name);
		std::fs::remove_dir_all(&dir)
			.map_err(|source| StorageError::io(format!("removing {}", dir.display()), source))?;
		log::debug!("deleted fragment {name} of {array:?}");
		Ok(())
	}

	/// Removes a whole array directory.
	pub fn delete_array(&self, array: &str) -> Result<()> {
		let dir = self.array_dir(array);
		std::fs::remove_dir_all(&dir)
			.map_err(|source| StorageError::io(format!("removing {}", dir.display()), source))?;
		Ok(())
	}
}
