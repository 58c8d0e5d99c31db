//! Type-dispatched coordinate operations.
//!
//! The coordinate type of an array is only known at runtime. Instead of
//! matching on the datatype for every cell, a [`CoordOps`] table is built
//! once (per schema, reused per open fragment) with monomorphic function
//! pointers for the hot operations: scalar compare, f64 conversion and
//! sentinel-free byte access. Everything downstream — comparators, MBR
//! maintenance, Hilbert quantization — runs through this table.

use crate::order::hilbert;
use crate::types::{Datatype, StorageError};
use anyhow::{Result, bail};
use byteorder::{ByteOrder, LittleEndian};
use num_traits::ToPrimitive;
use std::cmp::Ordering;

trait CoordScalar: Copy {
	const SIZE: usize;
	fn read_le(bytes: &[u8]) -> Self;
	fn write_le(self, out: &mut Vec<u8>);
	fn cmp_scalar(a: Self, b: Self) -> Ordering;
	fn to_f64(self) -> f64;
	fn from_f64(value: f64) -> Self;
}

macro_rules! int_scalar {
	($type:ty, $size:expr, $read:expr, $write:expr) => {
		impl CoordScalar for $type {
			const SIZE: usize = $size;
			fn read_le(bytes: &[u8]) -> Self {
				$read(bytes)
			}
			fn write_le(self, out: &mut Vec<u8>) {
				let start = out.len();
				out.resize(start + Self::SIZE, 0);
				$write(&mut out[start..], self);
			}
			fn cmp_scalar(a: Self, b: Self) -> Ordering {
				a.cmp(&b)
			}
			fn to_f64(self) -> f64 {
				ToPrimitive::to_f64(&self).unwrap_or(0.0)
			}
			fn from_f64(value: f64) -> Self {
				value as $type
			}
		}
	};
}

impl CoordScalar for i8 {
	const SIZE: usize = 1;
	fn read_le(bytes: &[u8]) -> Self {
		bytes[0] as i8
	}
	fn write_le(self, out: &mut Vec<u8>) {
		out.push(self as u8);
	}
	fn cmp_scalar(a: Self, b: Self) -> Ordering {
		a.cmp(&b)
	}
	fn to_f64(self) -> f64 {
		self as f64
	}
	fn from_f64(value: f64) -> Self {
		value as i8
	}
}

impl CoordScalar for u8 {
	const SIZE: usize = 1;
	fn read_le(bytes: &[u8]) -> Self {
		bytes[0]
	}
	fn write_le(self, out: &mut Vec<u8>) {
		out.push(self);
	}
	fn cmp_scalar(a: Self, b: Self) -> Ordering {
		a.cmp(&b)
	}
	fn to_f64(self) -> f64 {
		self as f64
	}
	fn from_f64(value: f64) -> Self {
		value as u8
	}
}

int_scalar!(i16, 2, LittleEndian::read_i16, LittleEndian::write_i16);
int_scalar!(i32, 4, LittleEndian::read_i32, LittleEndian::write_i32);
int_scalar!(i64, 8, LittleEndian::read_i64, LittleEndian::write_i64);
int_scalar!(u16, 2, LittleEndian::read_u16, LittleEndian::write_u16);
int_scalar!(u32, 4, LittleEndian::read_u32, LittleEndian::write_u32);
int_scalar!(u64, 8, LittleEndian::read_u64, LittleEndian::write_u64);

macro_rules! float_scalar {
	($type:ty, $size:expr, $read:expr, $write:expr) => {
		impl CoordScalar for $type {
			const SIZE: usize = $size;
			fn read_le(bytes: &[u8]) -> Self {
				$read(bytes)
			}
			fn write_le(self, out: &mut Vec<u8>) {
				let start = out.len();
				out.resize(start + Self::SIZE, 0);
				$write(&mut out[start..], self);
			}
			fn cmp_scalar(a: Self, b: Self) -> Ordering {
				// Total order so the comparators stay transitive even for
				// NaN payloads that never occur in valid coordinates.
				a.total_cmp(&b)
			}
			fn to_f64(self) -> f64 {
				self as f64
			}
			fn from_f64(value: f64) -> Self {
				value as $type
			}
		}
	};
}

float_scalar!(f32, 4, LittleEndian::read_f32, LittleEndian::write_f32);
float_scalar!(f64, 8, LittleEndian::read_f64, LittleEndian::write_f64);

fn cmp_fn<T: CoordScalar>(a: &[u8], b: &[u8]) -> Ordering {
	T::cmp_scalar(T::read_le(a), T::read_le(b))
}

fn to_f64_fn<T: CoordScalar>(bytes: &[u8]) -> f64 {
	T::read_le(bytes).to_f64()
}

fn from_f64_fn<T: CoordScalar>(value: f64, out: &mut Vec<u8>) {
	T::from_f64(value).write_le(out);
}

/// Coordinate operations specialized for one datatype and dimensionality.
#[derive(Clone, Debug)]
pub struct CoordOps {
	datatype: Datatype,
	dim_num: usize,
	cmp: fn(&[u8], &[u8]) -> Ordering,
	to_f64: fn(&[u8]) -> f64,
	from_f64: fn(f64, &mut Vec<u8>),
}

impl CoordOps {
	/// Builds the table. Fails for non-numeric coordinate types.
	pub fn new(datatype: Datatype, dim_num: usize) -> Result<CoordOps> {
		if !datatype.is_numeric() {
			bail!(StorageError::Schema(format!(
				"{datatype:?} cannot be a coordinate type"
			)));
		}
		if dim_num == 0 {
			bail!(StorageError::Schema("arrays need at least one dimension".to_string()));
		}
		fn table<T: CoordScalar>() -> (
			fn(&[u8], &[u8]) -> Ordering,
			fn(&[u8]) -> f64,
			fn(f64, &mut Vec<u8>),
		) {
			(cmp_fn::<T>, to_f64_fn::<T>, from_f64_fn::<T>)
		}
		use Datatype::*;
		let (cmp, to_f64, from_f64) = match datatype {
			Int8 => table::<i8>(),
			Int16 => table::<i16>(),
			Int32 => table::<i32>(),
			Int64 => table::<i64>(),
			UInt8 => table::<u8>(),
			UInt16 => table::<u16>(),
			UInt32 => table::<u32>(),
			UInt64 => table::<u64>(),
			Float32 => table::<f32>(),
			Float64 => table::<f64>(),
			Char => unreachable!(),
		};
		Ok(CoordOps {
			datatype,
			dim_num,
			cmp,
			to_f64,
			from_f64,
		})
	}

	pub fn datatype(&self) -> Datatype {
		self.datatype
	}

	pub fn dim_num(&self) -> usize {
		self.dim_num
	}

	/// Bytes of one scalar.
	pub fn scalar_size(&self) -> usize {
		self.datatype.size()
	}

	/// Bytes of one full coordinate tuple.
	pub fn coords_size(&self) -> usize {
		self.dim_num * self.scalar_size()
	}

	/// The raw bytes of dimension `d` inside a coordinate tuple.
	pub fn scalar_at<'a>(&self, coords: &'a [u8], d: usize) -> &'a [u8] {
		let size = self.scalar_size();
		&coords[d * size..(d + 1) * size]
	}

	/// Dimension `d` of a coordinate tuple as f64.
	pub fn value_at(&self, coords: &[u8], d: usize) -> f64 {
		(self.to_f64)(self.scalar_at(coords, d))
	}

	/// Compares dimension `d` of two coordinate tuples.
	pub fn compare_at(&self, a: &[u8], b: &[u8], d: usize) -> Ordering {
		(self.cmp)(self.scalar_at(a, d), self.scalar_at(b, d))
	}

	/// Left-to-right comparison of two coordinate tuples.
	pub fn compare_row_major(&self, a: &[u8], b: &[u8]) -> Ordering {
		for d in 0..self.dim_num {
			match self.compare_at(a, b, d) {
				Ordering::Equal => {}
				other => return other,
			}
		}
		Ordering::Equal
	}

	/// Right-to-left comparison of two coordinate tuples.
	pub fn compare_col_major(&self, a: &[u8], b: &[u8]) -> Ordering {
		for d in (0..self.dim_num).rev() {
			match self.compare_at(a, b, d) {
				Ordering::Equal => {}
				other => return other,
			}
		}
		Ordering::Equal
	}

	/// Appends `value` converted to the coordinate type.
	pub fn append_f64(&self, value: f64, out: &mut Vec<u8>) {
		(self.from_f64)(value, out);
	}

	/// Encodes a full tuple from f64 values.
	pub fn coords_from_f64(&self, values: &[f64]) -> Vec<u8> {
		let mut out = Vec::with_capacity(self.coords_size());
		for &value in values {
			self.append_f64(value, &mut out);
		}
		out
	}

	/// Decodes a full tuple into f64 values.
	pub fn coords_to_f64(&self, coords: &[u8]) -> Vec<f64> {
		(0..self.dim_num).map(|d| self.value_at(coords, d)).collect()
	}

	/// `true` if the tuple lies inside the closed per-dimension `range`.
	pub fn in_range(&self, coords: &[u8], range: &[(f64, f64)]) -> bool {
		(0..self.dim_num).all(|d| {
			let value = self.value_at(coords, d);
			value >= range[d].0 && value <= range[d].1
		})
	}

	/// A fresh MBR covering exactly one tuple: `lo_i == hi_i == coords_i`.
	pub fn init_mbr(&self, coords: &[u8]) -> Vec<u8> {
		let size = self.scalar_size();
		let mut mbr = Vec::with_capacity(2 * self.coords_size());
		for d in 0..self.dim_num {
			mbr.extend_from_slice(&coords[d * size..(d + 1) * size]);
			mbr.extend_from_slice(&coords[d * size..(d + 1) * size]);
		}
		mbr
	}

	/// Grows `mbr` (layout `lo_0 hi_0 lo_1 hi_1 …`) to cover `coords`.
	pub fn expand_mbr(&self, mbr: &mut [u8], coords: &[u8]) {
		let size = self.scalar_size();
		for d in 0..self.dim_num {
			let scalar = self.scalar_at(coords, d);
			let lo = 2 * d * size;
			let hi = lo + size;
			if (self.cmp)(scalar, &mbr[lo..lo + size]) == Ordering::Less {
				mbr[lo..lo + size].copy_from_slice(scalar);
			}
			if (self.cmp)(scalar, &mbr[hi..hi + size]) == Ordering::Greater {
				mbr[hi..hi + size].copy_from_slice(scalar);
			}
		}
	}

	/// Decodes an MBR into per-dimension `(lo, hi)` pairs.
	pub fn mbr_to_ranges(&self, mbr: &[u8]) -> Vec<(f64, f64)> {
		let size = self.scalar_size();
		(0..self.dim_num)
			.map(|d| {
				let lo = (self.to_f64)(&mbr[2 * d * size..(2 * d + 1) * size]);
				let hi = (self.to_f64)(&mbr[(2 * d + 1) * size..(2 * d + 2) * size]);
				(lo, hi)
			})
			.collect()
	}

	/// The Hilbert sort key of a tuple, quantized into the grid derived from
	/// `domain`. Floats are never fed to the curve directly.
	pub fn hilbert_key(&self, coords: &[u8], domain: &[(f64, f64)]) -> Result<i64> {
		let bits = hilbert::bits_per_dimension(self.dim_num);
		let grid = (1u64 << bits) as f64;
		let mut axes = Vec::with_capacity(self.dim_num);
		for d in 0..self.dim_num {
			let value = self.value_at(coords, d);
			let (lo, hi) = domain[d];
			let span = if self.datatype.is_float() { hi - lo } else { hi - lo + 1.0 };
			let offset = (value - lo).max(0.0);
			let axis = if span <= grid && !self.datatype.is_float() {
				offset as u64
			} else if span <= 0.0 {
				0
			} else {
				((offset / span) * (grid - 1.0)).floor() as u64
			};
			axes.push(axis.min((1u64 << bits) - 1));
		}
		Ok(hilbert::axes_to_index(&axes, bits)? as i64)
	}
}
