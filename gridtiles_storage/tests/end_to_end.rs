//! End-to-end scenarios over the public array surface: CSV in, fragments
//! and consolidation in the middle, ordered cells out.

use anyhow::Result;
use gridtiles_core::{
	ArraySchema, Attribute, CellOrder, Datatype, Dimension, StorageConfig,
};
use gridtiles_storage::csv::{export_csv, load_csv};
use gridtiles_storage::fragment::FragmentName;
use gridtiles_storage::{ArrayHandle, ArrayMode, Cell, StorageManager, Workspace};
use std::io::BufRead;
use std::rc::Rc;

/// The reference setup: a 2-D array over `[0,50]²`, attributes `a1:int32`
/// and `a2:float32`, irregular tiles of capacity 5, Hilbert cell order,
/// consolidation step 3.
fn schema() -> ArraySchema {
	ArraySchema::irregular(
		"weather",
		vec![
			Dimension::new("x", 0.0, 50.0).unwrap(),
			Dimension::new("y", 0.0, 50.0).unwrap(),
		],
		vec![
			Attribute::new("a1", Datatype::Int32).unwrap(),
			Attribute::new("a2", Datatype::Float32).unwrap(),
		],
		Datatype::Int32,
		CellOrder::Hilbert,
		5,
	)
	.unwrap()
}

fn config() -> StorageConfig {
	StorageConfig {
		segment_size: 40,
		write_buffer_size: 400,
		consolidation_step: 3,
	}
}

const EVERYTHING: [(f64, f64); 2] = [(0.0, 50.0), (0.0, 50.0)];

fn open_workspace(root: &std::path::Path) -> Result<(Workspace, ArrayHandle)> {
	let _ = env_logger::builder().is_test(true).try_init();
	let mut ws = Workspace::open(root, config())?;
	ws.create_array(&schema())?;
	let handle = ws.open_array("weather", ArrayMode::Write)?;
	Ok((ws, handle))
}

/// Decodes a result cell into `(x, y, a1, a2)`.
fn decode(ws: &Workspace, handle: ArrayHandle, cell: &Cell) -> (f64, f64, i32, f32) {
	let ops = ws.schema(handle).unwrap().coord_ops().unwrap();
	(
		ops.value_at(&cell.coords, 0),
		ops.value_at(&cell.coords, 1),
		i32::from_le_bytes(cell.attrs[0].as_slice().try_into().unwrap()),
		f32::from_le_bytes(cell.attrs[1].as_slice().try_into().unwrap()),
	)
}

#[test]
fn scenario_1_load_then_export() -> Result<()> {
	let root = tempfile::tempdir()?;
	let (mut ws, handle) = open_workspace(root.path())?;

	let loaded = load_csv(&mut ws, handle, "3,4,10,1.5\n7,8,20,2.5\n".as_bytes())?;
	assert_eq!(loaded, 2);

	let cells = ws.read(handle, &EVERYTHING)?;
	let decoded: Vec<_> = cells.iter().map(|c| decode(&ws, handle, c)).collect();
	assert_eq!(decoded.len(), 2);
	assert!(decoded.contains(&(3.0, 4.0, 10, 1.5)));
	assert!(decoded.contains(&(7.0, 8.0, 20, 2.5)));

	// The cells come back in Hilbert order, and the export streams the
	// same sequence.
	let schema = ws.schema(handle)?.clone();
	let ops = schema.coord_ops()?;
	let domain = schema.domain();
	let keys: Vec<i64> = cells
		.iter()
		.map(|c| ops.hilbert_key(&c.coords, &domain))
		.collect::<Result<_>>()?;
	assert!(keys.windows(2).all(|pair| pair[0] <= pair[1]));

	let mut exported = Vec::new();
	assert_eq!(export_csv(&mut ws, handle, &EVERYTHING, &mut exported)?, 2);
	let lines: Vec<String> = exported.as_slice().lines().collect::<std::io::Result<_>>()?;
	assert_eq!(lines.len(), 2);
	assert!(lines.contains(&"3,4,10,1.5".to_string()));
	assert!(lines.contains(&"7,8,20,2.5".to_string()));
	// The export order matches the read order.
	let (x, y, ..) = decoded[0];
	assert!(lines[0].starts_with(&format!("{},{}", x as i32, y as i32)));

	ws.close_array(handle)?;
	Ok(())
}

#[test]
fn scenario_2_three_loads_trigger_a_merge() -> Result<()> {
	let root = tempfile::tempdir()?;
	let (mut ws, handle) = open_workspace(root.path())?;

	load_csv(&mut ws, handle, "1,1,1,0.1\n2,2,2,0.2\n3,3,3,0.3\n".as_bytes())?;
	load_csv(&mut ws, handle, "11,11,4,0.4\n12,12,5,0.5\n13,13,6,0.6\n".as_bytes())?;
	load_csv(&mut ws, handle, "21,21,7,0.7\n22,22,8,0.8\n23,23,9,0.9\n".as_bytes())?;

	// Exactly one fragment remains, covering batches 0..2.
	assert_eq!(
		ws.live_fragments(handle)?,
		vec![FragmentName::new(0, 2)]
	);
	let array_dir = root.path().join("weather");
	let fragment_dirs: Vec<String> = std::fs::read_dir(&array_dir)?
		.filter_map(|entry| {
			let entry = entry.ok()?;
			entry
				.file_type()
				.ok()?
				.is_dir()
				.then(|| entry.file_name().to_string_lossy().into_owned())
		})
		.collect();
	assert_eq!(fragment_dirs, vec!["A_0_2".to_string()]);

	let cells = ws.read(handle, &EVERYTHING)?;
	assert_eq!(cells.len(), 9);
	let values: std::collections::BTreeSet<i32> = cells
		.iter()
		.map(|c| decode(&ws, handle, c).2)
		.collect();
	assert_eq!(values, (1..=9).collect());

	ws.close_array(handle)?;
	Ok(())
}

#[test]
fn scenario_3_deletion_masks_the_cell() -> Result<()> {
	let root = tempfile::tempdir()?;
	let (mut ws, handle) = open_workspace(root.path())?;

	load_csv(&mut ws, handle, "5,5,10,1.0\n".as_bytes())?;
	load_csv(&mut ws, handle, "5,5,*,*\n".as_bytes())?;

	assert!(ws.read(handle, &EVERYTHING)?.is_empty());
	ws.close_array(handle)?;
	Ok(())
}

#[test]
fn scenario_4_overwrite_precedence() -> Result<()> {
	let root = tempfile::tempdir()?;
	let (mut ws, handle) = open_workspace(root.path())?;

	load_csv(&mut ws, handle, "5,5,10,1.0\n".as_bytes())?;
	load_csv(&mut ws, handle, "5,5,99,9.9\n".as_bytes())?;

	let cells = ws.read(handle, &EVERYTHING)?;
	assert_eq!(cells.len(), 1);
	assert_eq!(decode(&ws, handle, &cells[0]), (5.0, 5.0, 99, 9.9));
	ws.close_array(handle)?;
	Ok(())
}

#[test]
fn scenario_5_partial_overlap_classification() -> Result<()> {
	let root = tempfile::tempdir()?;
	let (mut ws, handle) = open_workspace(root.path())?;

	// One tile whose MBR is [0..10, 0..10].
	load_csv(&mut ws, handle, "0,0,1,0.1\n10,10,2,0.2\n0,10,3,0.3\n".as_bytes())?;
	ws.close_array(handle)?;

	let mut manager = StorageManager::new(root.path().to_path_buf(), config())?;
	let schema = Rc::new(schema());
	let fragment = manager.open_fragment_read(&schema, "weather", &FragmentName::single(0))?;
	let state = manager.read_state(fragment)?;
	let hits = state.overlapping_tile_ids(&[(5.0, 15.0), (5.0, 15.0)])?;
	assert_eq!(hits.len(), 1);
	let (tile_id, fully_contained) = hits[0];
	assert!(!fully_contained);
	assert_eq!(state.tile_rank(tile_id), Some(0));
	manager.close_fragment_read(fragment)?;
	Ok(())
}

#[test]
fn scenario_6_segment_boundary_read() -> Result<()> {
	let root = tempfile::tempdir()?;
	let (mut ws, handle) = open_workspace(root.path())?;

	// 25 cells at capacity 5: five tiles, each a1 payload of 20 bytes. The
	// 40-byte segment holds exactly two tiles per refill.
	let mut csv = String::new();
	for i in 0..25 {
		csv.push_str(&format!("{},{},{},{}.5\n", i * 2, i % 2, i, i));
	}
	load_csv(&mut ws, handle, csv.as_bytes())?;
	ws.close_array(handle)?;

	let mut manager = StorageManager::new(root.path().to_path_buf(), config())?;
	let schema = Rc::new(schema());
	let fragment = manager.open_fragment_read(&schema, "weather", &FragmentName::single(0))?;
	let state = manager.read_state(fragment)?;
	assert_eq!(state.tile_num(), 5);

	let mut cell_total = 0usize;
	for tile in state.tile_iter(0) {
		cell_total += tile?.cell_num();
	}
	assert_eq!(cell_total, 25);
	// Five 20-byte tiles through a 40-byte segment: refills at tile 0, 2
	// and 4.
	assert_eq!(state.fill_count(), 3);

	// The coordinate stream is monotone in Hilbert order.
	let ops = schema.coord_ops()?;
	let domain = schema.domain();
	let mut keys = Vec::new();
	for tile in state.tile_iter(schema.attribute_num()) {
		let tile = tile?;
		for cell in tile.cells() {
			keys.push(ops.hilbert_key(cell, &domain)?);
		}
	}
	assert!(keys.windows(2).all(|pair| pair[0] <= pair[1]));
	manager.close_fragment_read(fragment)?;
	Ok(())
}

#[test]
fn merge_idempotence_under_newest_wins() -> Result<()> {
	let root = tempfile::tempdir()?;
	let (mut ws, handle) = open_workspace(root.path())?;

	// Batch 0 and 1 overlap at (5,5); batch 2 deletes (1,1) from batch 0.
	load_csv(&mut ws, handle, "5,5,10,1.0\n1,1,11,1.1\n9,9,12,1.2\n".as_bytes())?;
	load_csv(&mut ws, handle, "5,5,20,2.0\n4,4,21,2.1\n".as_bytes())?;
	let before: Vec<_> = ws
		.read(handle, &EVERYTHING)?
		.iter()
		.map(|c| decode(&ws, handle, c))
		.collect();

	// The third load triggers the 3-way merge; the readout must not change.
	load_csv(&mut ws, handle, "1,1,*,*\n".as_bytes())?;
	assert_eq!(ws.live_fragments(handle)?, vec![FragmentName::new(0, 2)]);

	let mut expected: Vec<_> = before.into_iter().filter(|c| (c.0, c.1) != (1.0, 1.0)).collect();
	let mut merged: Vec<_> = ws
		.read(handle, &EVERYTHING)?
		.iter()
		.map(|c| decode(&ws, handle, c))
		.collect();
	expected.sort_by(|a, b| a.partial_cmp(b).unwrap());
	merged.sort_by(|a, b| a.partial_cmp(b).unwrap());
	assert_eq!(merged, expected);
	assert!(merged.contains(&(5.0, 5.0, 20, 2.0)));
	ws.close_array(handle)?;
	Ok(())
}

#[test]
fn multiset_round_trip_across_many_batches() -> Result<()> {
	let root = tempfile::tempdir()?;
	let (mut ws, handle) = open_workspace(root.path())?;

	// Eleven single-cell batches exercise a two-level fragment tree:
	// after batch 9 the tree holds one level-2 fragment plus stragglers.
	for i in 0..11 {
		load_csv(
			&mut ws,
			handle,
			format!("{},{},{},{}.25\n", i, 50 - i, i, i).as_bytes(),
		)?;
	}
	assert_eq!(
		ws.live_fragments(handle)?,
		vec![
			FragmentName::new(0, 8),
			FragmentName::new(9, 9),
			FragmentName::new(10, 10),
		]
	);

	let cells = ws.read(handle, &EVERYTHING)?;
	assert_eq!(cells.len(), 11);
	let values: std::collections::BTreeSet<i32> = cells
		.iter()
		.map(|c| decode(&ws, handle, c).2)
		.collect();
	assert_eq!(values, (0..=10).collect());

	// A fresh read-mode open over the restarted workspace sees the same.
	ws.close_array(handle)?;
	drop(ws);
	let mut ws = Workspace::open(root.path(), config())?;
	let reader = ws.open_array("weather", ArrayMode::Read)?;
	assert_eq!(ws.read(reader, &EVERYTHING)?.len(), 11);
	ws.close_array(reader)?;
	Ok(())
}

#[test]
fn variable_sized_attributes_survive_the_pipeline() -> Result<()> {
	use gridtiles_core::CellValNum;

	let var_schema = ArraySchema::irregular(
		"series",
		vec![
			Dimension::new("x", 0.0, 50.0).unwrap(),
			Dimension::new("y", 0.0, 50.0).unwrap(),
		],
		vec![
			Attribute::new("a1", Datatype::Int32).unwrap(),
			Attribute::with_cell_val_num("samples", Datatype::Float32, CellValNum::Var).unwrap(),
		],
		Datatype::Int32,
		CellOrder::Hilbert,
		5,
	)
	.unwrap();

	let root = tempfile::tempdir()?;
	let mut ws = Workspace::open(root.path(), config())?;
	ws.create_array(&var_schema)?;
	let handle = ws.open_array("series", ArrayMode::Write)?;

	// Three loads force the 3-way merge over variable-sized payloads.
	load_csv(&mut ws, handle, "1,1,10,3,0.1,0.2,0.3\n2,2,11,1,7\n".as_bytes())?;
	load_csv(&mut ws, handle, "3,3,12,0\n".as_bytes())?;
	load_csv(&mut ws, handle, "1,1,13,2,9,9.5\n".as_bytes())?;
	assert_eq!(ws.live_fragments(handle)?, vec![FragmentName::new(0, 2)]);

	let mut exported = Vec::new();
	export_csv(&mut ws, handle, &EVERYTHING, &mut exported)?;
	let mut lines: Vec<String> = exported.as_slice().lines().collect::<std::io::Result<_>>()?;
	lines.sort();
	assert_eq!(
		lines,
		vec![
			"1,1,13,2,9,9.5".to_string(),
			"2,2,11,1,7".to_string(),
			"3,3,12,0".to_string(),
		]
	);
	ws.close_array(handle)?;
	Ok(())
}

#[test]
fn range_reads_filter_and_keep_order() -> Result<()> {
	let root = tempfile::tempdir()?;
	let (mut ws, handle) = open_workspace(root.path())?;

	let mut csv = String::new();
	for x in (0..50).step_by(5) {
		for y in (0..50).step_by(5) {
			csv.push_str(&format!("{x},{y},{},0.5\n", x * 100 + y));
		}
	}
	load_csv(&mut ws, handle, csv.as_bytes())?;

	let cells = ws.read(handle, &[(10.0, 20.0), (10.0, 20.0)])?;
	let decoded: Vec<_> = cells.iter().map(|c| decode(&ws, handle, c)).collect();
	assert_eq!(decoded.len(), 9);
	assert!(decoded.iter().all(|&(x, y, _, _)| {
		(10.0..=20.0).contains(&x) && (10.0..=20.0).contains(&y)
	}));
	ws.close_array(handle)?;
	Ok(())
}
