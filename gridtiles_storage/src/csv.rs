//! CSV load and export.
//!
//! One cell per line: the first `dim_num` comma-separated values are the
//! coordinates, followed by the attribute values in schema order. A
//! variable-sized attribute is written as `count, v_0, …, v_{count-1}`. The
//! token `*` is the NULL sentinel; a line whose every attribute value is
//! `*` is a deletion.

use crate::array::{ArrayHandle, Workspace};
use crate::cells::Cell;
use anyhow::{Context, Result, bail, ensure};
use gridtiles_core::order::CoordOps;
use gridtiles_core::{ArraySchema, CellValNum, StorageError};
use std::io::{BufRead, Write};
use std::path::Path;

fn next_token<'a>(tokens: &[&'a str], pos: &mut usize, what: &str) -> Result<&'a str> {
	let Some(&token) = tokens.get(*pos) else {
		bail!(StorageError::Format(format!("line ends before {what}")));
	};
	*pos += 1;
	Ok(token)
}

/// Parses one CSV line into a cell.
fn parse_line(schema: &ArraySchema, line: &str) -> Result<Cell> {
	let tokens: Vec<&str> = line.split(',').map(str::trim).collect();
	let mut pos = 0usize;

	let coord_type = schema.coord_type();
	let mut coords = Vec::with_capacity(schema.coords_size());
	for dimension in schema.dimensions() {
		let token = next_token(&tokens, &mut pos, &format!("coordinate {:?}", dimension.name))?;
		coords.extend_from_slice(&coord_type.parse_text(token)?);
	}

	let mut attrs = Vec::with_capacity(schema.attribute_num());
	for attribute in schema.attributes() {
		let payload = match attribute.cell_val_num {
			CellValNum::Fixed(n) => {
				let mut payload = Vec::with_capacity(n as usize * attribute.datatype.size());
				for _ in 0..n {
					let token =
						next_token(&tokens, &mut pos, &format!("value of {:?}", attribute.name))?;
					payload.extend_from_slice(&attribute.datatype.parse_text(token)?);
				}
				payload
			}
			CellValNum::Var => {
				let token =
					next_token(&tokens, &mut pos, &format!("count of {:?}", attribute.name))?;
				if token == "*" {
					attribute.null_payload()
				} else {
					let count: i32 = token.parse().map_err(|_| {
						StorageError::Format(format!(
							"cannot parse {token:?} as the value count of {:?}",
							attribute.name
						))
					})?;
					ensure!(
						count >= 0,
						StorageError::Format(format!("negative value count {count}"))
					);
					let mut payload = count.to_le_bytes().to_vec();
					for _ in 0..count {
						let token =
							next_token(&tokens, &mut pos, &format!("value of {:?}", attribute.name))?;
						payload.extend_from_slice(&attribute.datatype.parse_text(token)?);
					}
					payload
				}
			}
		};
		attrs.push(payload);
	}

	if pos != tokens.len() {
		bail!(StorageError::Format(format!(
			"line carries more values than the schema: {line:?}"
		)));
	}
	Ok(Cell::new(coords, attrs))
}

/// Formats one cell as a CSV line.
fn format_cell(schema: &ArraySchema, ops: &CoordOps, cell: &Cell) -> String {
	let mut fields = Vec::new();
	let coord_type = schema.coord_type();
	for d in 0..schema.dim_num() {
		fields.push(coord_type.format_value(ops.scalar_at(&cell.coords, d)));
	}
	for (attribute, payload) in schema.attributes().iter().zip(cell.attrs.iter()) {
		let size = attribute.datatype.size();
		match attribute.cell_val_num {
			CellValNum::Fixed(_) => {
				for value in payload.chunks_exact(size) {
					fields.push(attribute.datatype.format_value(value));
				}
			}
			CellValNum::Var => {
				if attribute.payload_is_null(payload) {
					fields.push("*".to_string());
				} else {
					let count = (payload.len() - 4) / size;
					fields.push(count.to_string());
					for value in payload[4..].chunks_exact(size) {
						fields.push(attribute.datatype.format_value(value));
					}
				}
			}
		}
	}
	fields.join(",")
}

/// Loads CSV lines as one cell batch into an array open in write mode.
/// Returns the number of cells written.
pub fn load_csv(ws: &mut Workspace, handle: ArrayHandle, input: impl BufRead) -> Result<usize> {
	let schema = ws.schema(handle)?.clone();
	let mut cells = Vec::new();
	for (index, line) in input.lines().enumerate() {
		let line =
			line.map_err(|source| StorageError::io("reading CSV input".to_string(), source))?;
		if line.trim().is_empty() {
			continue;
		}
		cells.push(
			parse_line(&schema, &line).with_context(|| format!("CSV line {}", index + 1))?,
		);
	}
	let count = cells.len();
	ws.write_cells(handle, cells)?;
	log::debug!("loaded {count} cells from CSV");
	Ok(count)
}

/// Convenience wrapper over [`load_csv`] for a file path.
pub fn load_csv_path(ws: &mut Workspace, handle: ArrayHandle, path: &Path) -> Result<usize> {
	let file = std::fs::File::open(path)
		.map_err(|source| StorageError::io(format!("opening {}", path.display()), source))?;
	load_csv(ws, handle, std::io::BufReader::new(file))
}

/// Exports every live cell of `range` as CSV, in global cell order.
/// Returns the number of cells written.
pub fn export_csv(
	ws: &mut Workspace,
	handle: ArrayHandle,
	range: &[(f64, f64)],
	output: &mut impl Write,
) -> Result<usize> {
	let schema = ws.schema(handle)?.clone();
	let ops = schema.coord_ops()?;
	let cells = ws.read(handle, range)?;
	for cell in &cells {
		writeln!(output, "{}", format_cell(&schema, &ops, cell))
			.map_err(|source| StorageError::io("writing CSV output".to_string(), source))?;
	}
	Ok(cells.len())
}

#[cfg(test)]
mod tests {
	use super::*;
	use gridtiles_core::{Attribute, CellOrder, Datatype, Dimension};

	fn schema() -> ArraySchema {
		ArraySchema::irregular(
			"test",
			vec![
				Dimension::new("x", 0.0, 50.0).unwrap(),
				Dimension::new("y", 0.0, 50.0).unwrap(),
			],
			vec![
				Attribute::new("a1", Datatype::Int32).unwrap(),
				Attribute::with_cell_val_num("a2", Datatype::Float32, CellValNum::Var).unwrap(),
			],
			Datatype::Int32,
			CellOrder::Hilbert,
			5,
		)
		.unwrap()
	}

	#[test]
	fn parse_format_round_trip() -> Result<()> {
		let schema = schema();
		let ops = schema.coord_ops()?;
		for line in ["3,4,10,2,1.5,2.5", "7,8,20,1,9", "5,5,*,*"] {
			let cell = parse_line(&schema, line)?;
			assert_eq!(format_cell(&schema, &ops, &cell), line);
		}
		Ok(())
	}

	#[test]
	fn deletion_lines_become_tombstones() -> Result<()> {
		let schema = schema();
		let cell = parse_line(&schema, "5,5,*,*")?;
		assert!(cell.is_deletion(&schema));
		Ok(())
	}

	#[rstest::rstest]
	#[case::missing_count("3,4,10")]
	#[case::short_var_run("3,4,10,2,1.5")]
	#[case::bad_count("3,4,10,x,1.5")]
	#[case::trailing_value("3,4,10,1,1.5,9")]
	fn malformed_lines_are_rejected(#[case] line: &str) {
		let schema = schema();
		assert!(parse_line(&schema, line).is_err(), "{line:?} parsed");
	}
}
