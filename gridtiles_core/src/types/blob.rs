//! A simple owned byte buffer.
//!
//! [`Blob`] carries tile payloads, segment buffers and whole book-keeping
//! files through the engine. It is a thin wrapper around `Vec<u8>` with the
//! conversions the I/O layer needs.

use std::fmt;

/// An owned, growable sequence of bytes.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Blob(Vec<u8>);

impl Blob {
	/// Creates an empty blob.
	pub fn new() -> Blob {
		Blob(Vec::new())
	}

	/// Creates an empty blob with `capacity` bytes preallocated.
	pub fn with_capacity(capacity: usize) -> Blob {
		Blob(Vec::with_capacity(capacity))
	}

	pub fn len(&self) -> u64 {
		self.0.len() as u64
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn as_slice(&self) -> &[u8] {
		&self.0
	}

	pub fn as_mut_slice(&mut self) -> &mut [u8] {
		&mut self.0
	}

	/// Appends the given bytes to the end of the blob.
	pub fn push_slice(&mut self, bytes: &[u8]) {
		self.0.extend_from_slice(bytes);
	}

	/// Drops the contents, keeping the allocation.
	pub fn clear(&mut self) {
		self.0.clear();
	}

	pub fn into_vec(self) -> Vec<u8> {
		self.0
	}

	/// Returns the bytes in `range`, panicking if the range is out of bounds.
	pub fn get_range(&self, range: std::ops::Range<usize>) -> &[u8] {
		&self.0[range]
	}
}

impl From<Vec<u8>> for Blob {
	fn from(value: Vec<u8>) -> Blob {
		Blob(value)
	}
}

impl From<&[u8]> for Blob {
	fn from(value: &[u8]) -> Blob {
		Blob(value.to_vec())
	}
}

impl fmt::Debug for Blob {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Blob({} bytes)", self.0.len())
	}
}
