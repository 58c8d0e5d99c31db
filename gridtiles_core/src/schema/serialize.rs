//! Binary form of the array schema.
//!
//! One self-describing little-endian blob per array, stored next to its
//! fragments. Field order:
//!
//! ```text
//! i32  name_len; byte name[name_len]
//! u8   dense
//! u8   tile_order
//! u8   cell_order
//! i64  capacity
//! i32  attr_num;  (i32 len, bytes) per attribute name
//! i32  dim_num;   (i32 len, bytes) per dimension name
//! i32  domain_bytes;      2 * dim_num coordinates
//! i32  tile_extent_bytes; dim_num coordinates, 0 if irregular
//! u8   type[attr_num + 1]            (last entry = coordinate type)
//! u32  cell_val_num[attr_num]
//! u8   compressor[attr_num + 1]
//! i32  compression_level[attr_num + 1]
//! ```

use crate::io::{ValueReaderSlice, ValueWriter, ValueWriterBlob};
use crate::order::CoordOps;
use crate::schema::{ArraySchema, Attribute, Dimension};
use crate::types::{Blob, CellOrder, CellValNum, Codec, Datatype, StorageError, TileOrder};
use anyhow::{Context, Result, bail};

impl ArraySchema {
	/// Serializes the schema into its on-disk blob.
	pub fn to_blob(&self) -> Result<Blob> {
		let ops = self.coord_ops()?;
		let mut writer = ValueWriterBlob::new();

		writer.write_len_string(self.name())?;
		writer.write_u8(u8::from(self.dense()))?;
		writer.write_u8(self.tile_order().as_u8())?;
		writer.write_u8(self.cell_order().as_u8())?;
		writer.write_i64(self.capacity() as i64)?;

		writer.write_i32(self.attribute_num() as i32)?;
		for attribute in self.attributes() {
			writer.write_len_string(&attribute.name)?;
		}
		writer.write_i32(self.dim_num() as i32)?;
		for dimension in self.dimensions() {
			writer.write_len_string(&dimension.name)?;
		}

		let mut domain = Vec::with_capacity(2 * self.coords_size());
		for dimension in self.dimensions() {
			ops.append_f64(dimension.lo, &mut domain);
			ops.append_f64(dimension.hi, &mut domain);
		}
		writer.write_i32(domain.len() as i32)?;
		writer.write_slice(&domain)?;

		let mut extents = Vec::new();
		if let Some(values) = self.tile_extents() {
			for &value in values {
				ops.append_f64(value, &mut extents);
			}
		}
		writer.write_i32(extents.len() as i32)?;
		writer.write_slice(&extents)?;

		for index in 0..=self.attribute_num() {
			writer.write_u8(self.attr_datatype(index).as_u8())?;
		}
		for attribute in self.attributes() {
			writer.write_u32(attribute.cell_val_num.as_u32())?;
		}
		for index in 0..=self.attribute_num() {
			writer.write_u8(self.attr_codec(index).0.as_u8())?;
		}
		for index in 0..=self.attribute_num() {
			writer.write_i32(self.attr_codec(index).1)?;
		}

		Ok(writer.into_blob())
	}

	/// Parses a schema from its on-disk blob.
	pub fn from_blob(blob: &Blob) -> Result<ArraySchema> {
		let mut reader = ValueReaderSlice::from_blob(blob);

		let name = reader.read_len_string().context("reading array name")?;
		let dense = reader.read_u8()? != 0;
		let tile_order = TileOrder::from_u8(reader.read_u8()?)?;
		let cell_order = CellOrder::from_u8(reader.read_u8()?)?;
		let capacity = reader.read_i64()?;
		if capacity < 1 {
			bail!(StorageError::Format(format!(
				"schema of {name:?} carries capacity {capacity}"
			)));
		}

		let attr_num = reader.read_i32()?;
		if attr_num < 1 {
			bail!(StorageError::Format(format!(
				"schema of {name:?} carries {attr_num} attributes"
			)));
		}
		let mut attribute_names = Vec::with_capacity(attr_num as usize);
		for _ in 0..attr_num {
			attribute_names.push(reader.read_len_string()?);
		}
		let dim_num = reader.read_i32()?;
		if dim_num < 1 {
			bail!(StorageError::Format(format!(
				"schema of {name:?} carries {dim_num} dimensions"
			)));
		}
		let mut dimension_names = Vec::with_capacity(dim_num as usize);
		for _ in 0..dim_num {
			dimension_names.push(reader.read_len_string()?);
		}

		let domain_bytes = reader.read_i32()?;
		let domain_raw = reader.read_slice(domain_bytes.max(0) as usize)?;
		let extent_bytes = reader.read_i32()?;
		let extent_raw = reader.read_slice(extent_bytes.max(0) as usize)?;

		let mut types = Vec::with_capacity(attr_num as usize + 1);
		for _ in 0..=attr_num {
			types.push(Datatype::from_u8(reader.read_u8()?)?);
		}
		let coord_type = types[attr_num as usize];

		let mut cell_val_nums = Vec::with_capacity(attr_num as usize);
		for _ in 0..attr_num {
			cell_val_nums.push(CellValNum::from_u32(reader.read_u32()?)?);
		}
		let mut codecs = Vec::with_capacity(attr_num as usize + 1);
		for _ in 0..=attr_num {
			codecs.push(Codec::from_u8(reader.read_u8()?)?);
		}
		let mut levels = Vec::with_capacity(attr_num as usize + 1);
		for _ in 0..=attr_num {
			levels.push(reader.read_i32()?);
		}
		if reader.has_remaining() {
			bail!(StorageError::Format(format!(
				"schema of {name:?} has {} trailing bytes",
				reader.remaining()
			)));
		}

		// Decode the domain now that the coordinate type is known.
		let ops = CoordOps::new(coord_type, dim_num as usize)?;
		if domain_raw.len() != 2 * ops.coords_size() {
			bail!(StorageError::Format(format!(
				"schema of {name:?}: domain holds {} bytes, expected {}",
				domain_raw.len(),
				2 * ops.coords_size()
			)));
		}
		let scalar_size = ops.scalar_size();
		let mut dimensions = Vec::with_capacity(dim_num as usize);
		for (d, dimension_name) in dimension_names.into_iter().enumerate() {
			let lo = ops.value_at(&domain_raw[2 * d * scalar_size..], 0);
			let hi = ops.value_at(&domain_raw[(2 * d + 1) * scalar_size..], 0);
			dimensions.push(Dimension::new(dimension_name, lo, hi)?);
		}

		let tile_extents = if extent_raw.is_empty() {
			None
		} else {
			if extent_raw.len() != ops.coords_size() {
				bail!(StorageError::Format(format!(
					"schema of {name:?}: tile extents hold {} bytes, expected {}",
					extent_raw.len(),
					ops.coords_size()
				)));
			}
			Some(
				(0..dim_num as usize)
					.map(|d| ops.value_at(&extent_raw[d * scalar_size..], 0))
					.collect(),
			)
		};

		let mut attributes = Vec::with_capacity(attr_num as usize);
		for (a, attribute_name) in attribute_names.into_iter().enumerate() {
			attributes.push(
				Attribute::with_cell_val_num(attribute_name, types[a], cell_val_nums[a])?
					.with_codec(codecs[a], levels[a]),
			);
		}

		ArraySchema::from_parts(
			name,
			dense,
			dimensions,
			attributes,
			coord_type,
			tile_extents,
			tile_order,
			cell_order,
			capacity as u64,
			codecs[attr_num as usize],
			levels[attr_num as usize],
		)
	}
}
