//! Little-endian value writing.
//!
//! The [`ValueWriter`] trait writes the primitive records all book-keeping
//! and schema files are made of. Every multi-byte value in the engine is
//! little-endian, so the trait is not generic over byte order.

use crate::types::{Blob, StorageError};
use anyhow::Result;
use byteorder::{LittleEndian, WriteBytesExt};
use std::{
	fs::File,
	io::{BufWriter, Cursor, Write},
	path::Path,
};

fn io_error(what: &'static str) -> impl FnOnce(std::io::Error) -> anyhow::Error {
	move |source| StorageError::io(format!("writing {what}"), source).into()
}

/// Writes little-endian values to an underlying byte sink.
pub trait ValueWriter {
	fn get_writer(&mut self) -> &mut dyn Write;

	/// The number of bytes written so far.
	fn position(&self) -> u64;

	fn write_u8(&mut self, value: u8) -> Result<()> {
		self.get_writer().write_u8(value).map_err(io_error("u8"))
	}

	fn write_i32(&mut self, value: i32) -> Result<()> {
		self
			.get_writer()
			.write_i32::<LittleEndian>(value)
			.map_err(io_error("i32"))
	}

	fn write_u32(&mut self, value: u32) -> Result<()> {
		self
			.get_writer()
			.write_u32::<LittleEndian>(value)
			.map_err(io_error("u32"))
	}

	fn write_i64(&mut self, value: i64) -> Result<()> {
		self
			.get_writer()
			.write_i64::<LittleEndian>(value)
			.map_err(io_error("i64"))
	}

	fn write_u64(&mut self, value: u64) -> Result<()> {
		self
			.get_writer()
			.write_u64::<LittleEndian>(value)
			.map_err(io_error("u64"))
	}

	fn write_slice(&mut self, bytes: &[u8]) -> Result<()> {
		self.get_writer().write_all(bytes).map_err(io_error("slice"))
	}

	/// Writes a string as `i32 len` followed by its bytes.
	fn write_len_string(&mut self, value: &str) -> Result<()> {
		self.write_i32(value.len() as i32)?;
		self.write_slice(value.as_bytes())
	}
}

/// A [`ValueWriter`] collecting into an in-memory [`Blob`].
pub struct ValueWriterBlob {
	cursor: Cursor<Vec<u8>>,
}

impl ValueWriterBlob {
	pub fn new() -> ValueWriterBlob {
		ValueWriterBlob {
			cursor: Cursor::new(Vec::new()),
		}
	}

	pub fn into_blob(self) -> Blob {
		Blob::from(self.cursor.into_inner())
	}
}

impl Default for ValueWriterBlob {
	fn default() -> Self {
		Self::new()
	}
}

impl ValueWriter for ValueWriterBlob {
	fn get_writer(&mut self) -> &mut dyn Write {
		&mut self.cursor
	}

	fn position(&self) -> u64 {
		self.cursor.position()
	}
}

/// A [`ValueWriter`] appending to a buffered file.
pub struct ValueWriterFile {
	writer: CountingWriter,
}

impl ValueWriterFile {
	/// Creates (truncating) the file at `path`.
	pub fn from_path(path: &Path) -> Result<ValueWriterFile> {
		let file = File::create(path)
			.map_err(|source| StorageError::io(format!("creating {}", path.display()), source))?;
		Ok(ValueWriterFile {
			writer: CountingWriter {
				inner: BufWriter::new(file),
				position: 0,
			},
		})
	}

	/// Flushes buffered bytes to the filesystem.
	pub fn finish(mut self) -> Result<()> {
		self
			.writer
			.flush()
			.map_err(|source| StorageError::io("flushing file writer".to_string(), source))?;
		Ok(())
	}
}

impl ValueWriter for ValueWriterFile {
	fn get_writer(&mut self) -> &mut dyn Write {
		&mut self.writer
	}

	fn position(&self) -> u64 {
		self.writer.position
	}
}

struct CountingWriter {
	inner: BufWriter<File>,
	position: u64,
}

impl Write for CountingWriter {
	fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
		let written = self.inner.write(buf)?;
		self.position += written as u64;
		Ok(written)
	}

	fn flush(&mut self) -> std::io::Result<()> {
		self.inner.flush()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn blob_writer_encodes_little_endian() -> Result<()> {
		let mut writer = ValueWriterBlob::new();
		writer.write_u8(0xab)?;
		writer.write_slice(&[0x01, 0x02])?;
		writer.write_i32(-2)?;
		assert_eq!(writer.position(), 7);
		let blob = writer.into_blob();
		assert_eq!(
			blob.as_slice(),
			&[0xab, 0x01, 0x02, 0xfe, 0xff, 0xff, 0xff]
		);
		Ok(())
	}

	#[test]
	fn len_string_round_trips_by_eye() -> Result<()> {
		let mut writer = ValueWriterBlob::new();
		writer.write_len_string("a1")?;
		let blob = writer.into_blob();
		assert_eq!(blob.as_slice(), &[2, 0, 0, 0, b'a', b'1']);
		Ok(())
	}

	#[test]
	fn file_writer_counts_positions() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join("values.bin");
		let mut writer = ValueWriterFile::from_path(&path)?;
		writer.write_u64(7)?;
		writer.write_u64(9)?;
		assert_eq!(writer.position(), 16);
		writer.finish()?;
		assert_eq!(std::fs::metadata(&path)?.len(), 16);
		Ok(())
	}
}
