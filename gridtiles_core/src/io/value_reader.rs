//! Little-endian value reading.
//!
//! Mirror of [`crate::io::ValueWriter`]: parses the primitive records of
//! book-keeping and schema files from a slice, a [`Blob`] or a file region.

use crate::types::{Blob, StorageError};
use anyhow::{Result, bail};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

fn io_error(what: &'static str) -> impl FnOnce(std::io::Error) -> anyhow::Error {
	move |source| StorageError::io(format!("reading {what}"), source).into()
}

/// Reads little-endian values from an in-memory byte slice.
pub struct ValueReaderSlice<'a> {
	cursor: Cursor<&'a [u8]>,
}

impl<'a> ValueReaderSlice<'a> {
	pub fn new(bytes: &'a [u8]) -> ValueReaderSlice<'a> {
		ValueReaderSlice {
			cursor: Cursor::new(bytes),
		}
	}

	pub fn from_blob(blob: &'a Blob) -> ValueReaderSlice<'a> {
		Self::new(blob.as_slice())
	}

	pub fn len(&self) -> u64 {
		self.cursor.get_ref().len() as u64
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn position(&self) -> u64 {
		self.cursor.position()
	}

	pub fn set_position(&mut self, position: u64) -> Result<()> {
		if position > self.len() {
			bail!(StorageError::Format(format!(
				"cannot seek to {position} in a reader of {} bytes",
				self.len()
			)));
		}
		self.cursor.set_position(position);
		Ok(())
	}

	pub fn remaining(&self) -> u64 {
		self.len() - self.position()
	}

	pub fn has_remaining(&self) -> bool {
		self.remaining() > 0
	}

	pub fn read_u8(&mut self) -> Result<u8> {
		self.cursor.read_u8().map_err(io_error("u8"))
	}

	pub fn read_i32(&mut self) -> Result<i32> {
		self.cursor.read_i32::<LittleEndian>().map_err(io_error("i32"))
	}

	pub fn read_u32(&mut self) -> Result<u32> {
		self.cursor.read_u32::<LittleEndian>().map_err(io_error("u32"))
	}

	pub fn read_i64(&mut self) -> Result<i64> {
		self.cursor.read_i64::<LittleEndian>().map_err(io_error("i64"))
	}

	pub fn read_u64(&mut self) -> Result<u64> {
		self.cursor.read_u64::<LittleEndian>().map_err(io_error("u64"))
	}

	/// Reads exactly `length` bytes.
	pub fn read_slice(&mut self, length: usize) -> Result<Vec<u8>> {
		if (length as u64) > self.remaining() {
			bail!(StorageError::Format(format!(
				"cannot read {length} bytes, only {} remaining",
				self.remaining()
			)));
		}
		let start = self.position() as usize;
		let bytes = self.cursor.get_ref()[start..start + length].to_vec();
		self.cursor.set_position((start + length) as u64);
		Ok(bytes)
	}

	/// Reads a string written as `i32 len` followed by its bytes.
	pub fn read_len_string(&mut self) -> Result<String> {
		let length = self.read_i32()?;
		if length < 0 {
			bail!(StorageError::Format(format!(
				"negative string length {length}"
			)));
		}
		let bytes = self.read_slice(length as usize)?;
		String::from_utf8(bytes)
			.map_err(|_| StorageError::Format("string is not valid utf-8".to_string()).into())
	}
}

/// Reads a whole file into a [`Blob`].
pub fn read_file(path: &std::path::Path) -> Result<Blob> {
	let bytes = std::fs::read(path)
		.map_err(|source| StorageError::io(format!("reading {}", path.display()), source))?;
	log::trace!("read {} ({} bytes)", path.display(), bytes.len());
	Ok(Blob::from(bytes))
}

/// The size of the file at `path`.
pub fn file_size(path: &std::path::Path) -> Result<u64> {
	let metadata = std::fs::metadata(path)
		.map_err(|source| StorageError::io(format!("inspecting {}", path.display()), source))?;
	Ok(metadata.len())
}
