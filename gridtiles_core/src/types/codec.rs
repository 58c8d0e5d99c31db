//! Tile payload compression codecs.

use crate::types::error::StorageError;
use anyhow::{Result, bail};

/// The compression applied to every tile payload of one attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Codec {
	None,
	Gzip,
	Brotli,
}

impl Codec {
	pub fn as_u8(&self) -> u8 {
		match self {
			Codec::None => 0,
			Codec::Gzip => 1,
			Codec::Brotli => 2,
		}
	}

	pub fn from_u8(tag: u8) -> Result<Codec> {
		Ok(match tag {
			0 => Codec::None,
			1 => Codec::Gzip,
			2 => Codec::Brotli,
			_ => bail!(StorageError::Format(format!("unknown codec tag {tag}"))),
		})
	}
}
