//! The fragment tree.
//!
//! Per array, the consolidator tracks which positions of a conceptual
//! `c`-ary tree are live ("grey"): a list of `(level, count)` pairs in
//! strictly decreasing level order, each count in `[1, c-1]`, plus the
//! sequence number of the next incoming batch. A node at level `l` stands
//! for `c^l` merged batches; when the youngest level accumulates `c` grey
//! nodes they fuse into one node a level up, which is what schedules the
//! fragment merges and keeps the live fragment count logarithmic.

use crate::fragment::FragmentName;
use anyhow::{Context, Result, bail, ensure};
use gridtiles_core::io::{ValueReaderSlice, ValueWriter, ValueWriterFile, read_file};
use gridtiles_core::StorageError;
use std::path::Path;

/// File name of the per-array fragment tree.
pub const TREE_FILE: &str = "tree.bkp";

/// The consolidator's per-array state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FragmentTree {
	entries: Vec<(u32, u32)>,
	next_seq: u64,
}

/// A merge the tree calls for: `c` grey nodes at `level` fuse into the
/// fragment named `output`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergePlan {
	pub level: u32,
	pub output: FragmentName,
}

fn window(step: u32, level: u32) -> u64 {
	(step as u64).pow(level)
}

impl FragmentTree {
	pub fn new() -> FragmentTree {
		FragmentTree::default()
	}

	pub fn next_seq(&self) -> u64 {
		self.next_seq
	}

	pub fn entries(&self) -> &[(u32, u32)] {
		&self.entries
	}

	/// The total number of batches the grey nodes stand for.
	pub fn total_represented(&self, step: u32) -> u64 {
		self
			.entries
			.iter()
			.map(|&(level, count)| count as u64 * window(step, level))
			.sum()
	}

	/// Registers the batch that was just written as a new grey leaf.
	pub fn add_leaf(&mut self) {
		match self.entries.last_mut() {
			Some((0, count)) => *count += 1,
			_ => self.entries.push((0, 1)),
		}
		self.next_seq += 1;
	}

	/// The merge the tree currently calls for, if the youngest level has
	/// filled up.
	pub fn pending_merge(&self, step: u32) -> Option<MergePlan> {
		let &(level, count) = self.entries.last()?;
		if count < step {
			return None;
		}
		let merged = window(step, level + 1);
		Some(MergePlan {
			level,
			output: FragmentName::new(self.next_seq - merged, self.next_seq - 1),
		})
	}

	/// The name the next incoming batch will be written under.
	pub fn next_fragment_name(&self) -> FragmentName {
		FragmentName::single(self.next_seq)
	}

	/// The names of the `step` fragments a pending merge consumes, oldest
	/// first.
	pub fn merge_inputs(&self, step: u32) -> Vec<FragmentName> {
		let Some(plan) = self.pending_merge(step) else {
			return Vec::new();
		};
		let width = window(step, plan.level);
		(0..step as u64)
			.map(|i| {
				let lo = plan.output.lo + i * width;
				FragmentName::new(lo, lo + width - 1)
			})
			.collect()
	}

	/// Replaces the `step` grey nodes of the youngest level with one node a
	/// level up.
	pub fn apply_merge(&mut self, step: u32) {
		let Some(&(level, count)) = self.entries.last() else {
			return;
		};
		debug_assert_eq!(count, step);
		self.entries.pop();
		match self.entries.last_mut() {
			Some((last_level, last_count)) if *last_level == level + 1 => *last_count += 1,
			_ => self.entries.push((level + 1, 1)),
		}
	}

	/// Reconstructs the live fragment names, oldest first: per entry,
	/// `count` consecutive windows of `step^level` sequence numbers.
	pub fn suffixes(&self, step: u32) -> Vec<FragmentName> {
		let mut names = Vec::new();
		let mut seq = 0u64;
		for &(level, count) in &self.entries {
			let width = window(step, level);
			for _ in 0..count {
				names.push(FragmentName::new(seq, seq + width - 1));
				seq += width;
			}
		}
		names
	}

	fn validate(&self, step: u32) -> Result<()> {
		ensure!(
			self.entries.windows(2).all(|pair| pair[0].0 > pair[1].0),
			StorageError::State("fragment tree levels are not strictly decreasing".to_string())
		);
		for &(level, count) in &self.entries {
			ensure!(
				count >= 1 && count < step,
				StorageError::State(format!(
					"fragment tree holds {count} grey nodes at level {level} with step {step}"
				))
			);
		}
		ensure!(
			self.total_represented(step) == self.next_seq,
			StorageError::State(format!(
				"fragment tree stands for {} batches but next_seq is {}",
				self.total_represented(step),
				self.next_seq
			))
		);
		Ok(())
	}

	/// Loads and validates the tree file of an array.
	pub fn load(path: &Path, step: u32) -> Result<FragmentTree> {
		let blob = read_file(path).context("loading fragment tree")?;
		let mut reader = ValueReaderSlice::from_blob(&blob);
		let entry_num = reader.read_u32()? as usize;
		if blob.len() != 4 + 8 * entry_num as u64 + 8 {
			bail!(StorageError::State(format!(
				"fragment tree file holds {} bytes for {entry_num} entries",
				blob.len()
			)));
		}
		let mut entries = Vec::with_capacity(entry_num);
		for _ in 0..entry_num {
			let level = reader.read_u32()?;
			let count = reader.read_u32()?;
			entries.push((level, count));
		}
		let next_seq = reader.read_u64()?;
		let tree = FragmentTree { entries, next_seq };
		tree.validate(step)?;
		Ok(tree)
	}

	/// Stores the tree (validated against `step` first) under a temporary
	/// name and renames it into place.
	pub fn store(&self, path: &Path, step: u32) -> Result<()> {
		self.validate(step)?;
		let parent = path.parent().unwrap_or(Path::new("."));
		let temp = parent.join(format!("{TREE_FILE}.tmp"));
		let mut writer = ValueWriterFile::from_path(&temp)?;
		writer.write_u32(self.entries.len() as u32)?;
		for &(level, count) in &self.entries {
			writer.write_u32(level)?;
			writer.write_u32(count)?;
		}
		writer.write_u64(self.next_seq)?;
		writer.finish()?;
		std::fs::rename(&temp, path)
			.map_err(|source| StorageError::io("renaming fragment tree into place".to_string(), source))?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	/// Plays `n` batch arrivals through the tree at the given step,
	/// applying every pending merge, and returns the merge outputs.
	fn play(tree: &mut FragmentTree, step: u32, n: u64) -> Vec<FragmentName> {
		let mut merges = Vec::new();
		for _ in 0..n {
			tree.add_leaf();
			while let Some(plan) = tree.pending_merge(step) {
				merges.push(plan.output);
				tree.apply_merge(step);
			}
		}
		merges
	}

	#[test]
	fn three_leaves_fuse_into_one_node() {
		let mut tree = FragmentTree::new();
		let merges = play(&mut tree, 3, 3);
		assert_eq!(merges, vec![FragmentName::new(0, 2)]);
		assert_eq!(tree.entries(), &[(1, 1)]);
		assert_eq!(tree.suffixes(3), vec![FragmentName::new(0, 2)]);
	}

	#[test]
	fn merges_cascade_up_the_levels() {
		let mut tree = FragmentTree::new();
		let merges = play(&mut tree, 3, 9);
		// Three level-0 merges, then the level-1 fuse over the whole range.
		assert_eq!(
			merges,
			vec![
				FragmentName::new(0, 2),
				FragmentName::new(3, 5),
				FragmentName::new(6, 8),
				FragmentName::new(0, 8),
			]
		);
		assert_eq!(tree.entries(), &[(2, 1)]);
	}

	#[test]
	fn suffixes_walk_levels_oldest_first() {
		let mut tree = FragmentTree::new();
		play(&mut tree, 3, 11);
		assert_eq!(tree.entries(), &[(2, 1), (0, 2)]);
		assert_eq!(
			tree.suffixes(3),
			vec![
				FragmentName::new(0, 8),
				FragmentName::new(9, 9),
				FragmentName::new(10, 10),
			]
		);
		assert_eq!(tree.total_represented(3), 11);
	}

	#[test]
	fn merge_inputs_cover_the_output_window() {
		let mut tree = FragmentTree::new();
		play(&mut tree, 3, 8);
		tree.add_leaf();
		let plan = tree.pending_merge(3).unwrap();
		assert_eq!(plan.output, FragmentName::new(6, 8));
		assert_eq!(
			tree.merge_inputs(3),
			vec![
				FragmentName::new(6, 6),
				FragmentName::new(7, 7),
				FragmentName::new(8, 8),
			]
		);
	}

	#[test]
	fn store_and_load_round_trip() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join(TREE_FILE);
		let mut tree = FragmentTree::new();
		play(&mut tree, 3, 11);
		tree.store(&path, 3)?;
		assert_eq!(FragmentTree::load(&path, 3)?, tree);
		Ok(())
	}

	#[test]
	fn corrupt_trees_are_a_state_error() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join(TREE_FILE);
		let mut tree = FragmentTree::new();
		play(&mut tree, 3, 4);
		tree.store(&path, 3)?;

		// Truncate the file.
		let bytes = std::fs::read(&path)?;
		std::fs::write(&path, &bytes[..bytes.len() - 3])?;
		let error = FragmentTree::load(&path, 3).unwrap_err();
		assert!(matches!(
			gridtiles_core::storage_error(&error),
			Some(StorageError::State(_))
		));

		// A count at the step limit is invalid in a stored tree.
		std::fs::write(&path, bytes)?;
		let loaded = FragmentTree::load(&path, 3)?;
		assert_eq!(loaded.entries(), &[(1, 1), (0, 1)]);
		assert!(FragmentTree::load(&path, 2).is_err());
		Ok(())
	}
}
