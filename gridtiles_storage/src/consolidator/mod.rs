//! The consolidator.
//!
//! Assigns sequence numbers to incoming fragments, keeps the per-array
//! fragment tree, and fuses `c` fragments of one tree level into a single
//! wider fragment by streaming their merged cells through a fragment
//! writer. The output's marker file is the commit point; the inputs are
//! deleted only once it exists, so a failed merge leaves the array exactly
//! as it was.

mod tree;

pub use tree::{FragmentTree, MergePlan, TREE_FILE};

use crate::cells::MergeStream;
use crate::fragment::{FragmentName, ReadState};
use crate::storage_manager::StorageManager;
use anyhow::{Context, Result};
use gridtiles_core::ArraySchema;
use std::path::PathBuf;
use std::rc::Rc;

/// The tree file of one array.
fn tree_path(manager: &StorageManager, array: &str) -> PathBuf {
	manager.array_dir(array).join(TREE_FILE)
}

/// Merge scheduler of one workspace.
pub struct Consolidator {
	step: u32,
}

impl Consolidator {
	pub fn new(step: u32) -> Consolidator {
		Consolidator { step }
	}

	pub fn step(&self) -> u32 {
		self.step
	}

	/// Loads the fragment tree of `array`, or an empty tree if none was
	/// stored yet.
	pub fn load_tree(&self, manager: &StorageManager, array: &str) -> Result<FragmentTree> {
		let path = tree_path(manager, array);
		if path.exists() {
			FragmentTree::load(&path, self.step)
				.with_context(|| format!("array {array:?} has a corrupt fragment tree"))
		} else {
			Ok(FragmentTree::new())
		}
	}

	pub fn flush_tree(
		&self,
		manager: &StorageManager,
		array: &str,
		tree: &FragmentTree,
	) -> Result<()> {
		tree.store(&tree_path(manager, array), self.step)
	}

	/// Registers a freshly committed batch and runs every merge the tree
	/// calls for, cascading up the levels. The tree file is flushed at the
	/// end.
	pub fn add_fragment(
		&self,
		manager: &mut StorageManager,
		schema: &Rc<ArraySchema>,
		array: &str,
		tree: &mut FragmentTree,
	) -> Result<()> {
		tree.add_leaf();
		self.run_pending_merges(manager, schema, array, tree)?;
		self.flush_tree(manager, array, tree)
	}

	/// Runs pending merges without registering a new batch; the explicit
	/// `consolidate` entry point of the public API.
	pub fn consolidate(
		&self,
		manager: &mut StorageManager,
		schema: &Rc<ArraySchema>,
		array: &str,
		tree: &mut FragmentTree,
	) -> Result<()> {
		self.run_pending_merges(manager, schema, array, tree)?;
		self.flush_tree(manager, array, tree)
	}

	fn run_pending_merges(
		&self,
		manager: &mut StorageManager,
		schema: &Rc<ArraySchema>,
		array: &str,
		tree: &mut FragmentTree,
	) -> Result<()> {
		while let Some(plan) = tree.pending_merge(self.step) {
			let inputs = tree.merge_inputs(self.step);
			merge_fragments(manager, schema, array, &inputs, plan.output).with_context(|| {
				format!("consolidating level {} of array {array:?}", plan.level)
			})?;
			tree.apply_merge(self.step);
		}
		Ok(())
	}
}

/// Fuses `inputs` into the fragment `output`: a `c`-way merge of the
/// input cell streams in global order, newest-wins on coordinate ties.
/// Tombstones are dropped only when the merge reaches back to the very
/// first batch; otherwise they must keep masking older fragments.
fn merge_fragments(
	manager: &mut StorageManager,
	schema: &Rc<ArraySchema>,
	array: &str,
	inputs: &[FragmentName],
	output: FragmentName,
) -> Result<()> {
	log::info!("merging {inputs:?} of array {array:?} into {output}");

	let mut handles = Vec::with_capacity(inputs.len());
	for name in inputs {
		handles.push(manager.open_fragment_read(schema, array, name)?);
	}

	let mut writer = manager.fragment_writer(schema, array, &output)?;
	let drop_tombstones = output.lo == 0;

	let streamed = (|| -> Result<()> {
		let states: Vec<&ReadState> = handles
			.iter()
			.map(|&handle| manager.read_state(handle))
			.collect::<Result<_>>()?;
		let mut stream = MergeStream::open(&states, drop_tombstones)?;
		while let Some(cell) = stream.next()? {
			writer.write_cell(cell)?;
		}
		Ok(())
	})();

	let committed = match streamed {
		Ok(()) => writer.finalize(),
		Err(error) => {
			let _ = writer.abandon();
			Err(error)
		}
	};

	for handle in handles {
		manager.close_fragment_read(handle)?;
	}
	committed?;

	// The output marker is durable; the inputs can go.
	for name in inputs {
		manager.delete_fragment(array, name)?;
	}
	Ok(())
}
