//! Compress and decompress tile payloads.
//!
//! The codec and level come from the array schema, per attribute. Payloads
//! are compressed when a tile is appended to its segment buffer and
//! decompressed when a segment is parsed back into tiles.

use crate::types::{Blob, Codec};
use anyhow::{Context, Result};
use brotli::{BrotliCompress, BrotliDecompress, enc::BrotliEncoderParams};
use flate2::bufread::{GzDecoder, GzEncoder};
use std::io::{Cursor, Read};

/// Compresses `blob` with the given codec and level. `Codec::None` returns
/// the input unchanged.
pub fn compress(blob: Blob, codec: Codec, level: i32) -> Result<Blob> {
	match codec {
		Codec::None => Ok(blob),
		Codec::Gzip => compress_gzip(&blob, level),
		Codec::Brotli => compress_brotli(&blob, level),
	}
}

/// Undoes [`compress`].
pub fn decompress(blob: Blob, codec: Codec) -> Result<Blob> {
	match codec {
		Codec::None => Ok(blob),
		Codec::Gzip => decompress_gzip(&blob),
		Codec::Brotli => decompress_brotli(&blob),
	}
}

fn gzip_level(level: i32) -> flate2::Compression {
	if (0..=9).contains(&level) {
		flate2::Compression::new(level as u32)
	} else {
		flate2::Compression::default()
	}
}

fn compress_gzip(blob: &Blob, level: i32) -> Result<Blob> {
	let mut encoder = GzEncoder::new(blob.as_slice(), gzip_level(level));
	let mut compressed = Vec::new();
	encoder
		.read_to_end(&mut compressed)
		.context("compressing payload with gzip")?;
	Ok(Blob::from(compressed))
}

fn decompress_gzip(blob: &Blob) -> Result<Blob> {
	let mut decoder = GzDecoder::new(blob.as_slice());
	let mut decompressed = Vec::new();
	decoder
		.read_to_end(&mut decompressed)
		.context("decompressing gzip payload")?;
	Ok(Blob::from(decompressed))
}

fn compress_brotli(blob: &Blob, level: i32) -> Result<Blob> {
	let params = BrotliEncoderParams {
		quality: if (0..=11).contains(&level) { level } else { 10 },
		lgwin: 19,
		size_hint: blob.len() as usize,
		..Default::default()
	};
	let mut input = Cursor::new(blob.as_slice());
	let mut output = Vec::new();
	BrotliCompress(&mut input, &mut output, &params).context("compressing payload with brotli")?;
	Ok(Blob::from(output))
}

fn decompress_brotli(blob: &Blob) -> Result<Blob> {
	let mut input = Cursor::new(blob.as_slice());
	let mut output = Vec::new();
	BrotliDecompress(&mut input, &mut output).context("decompressing brotli payload")?;
	Ok(Blob::from(output))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn test_payload() -> Blob {
		let mut bytes = Vec::new();
		for i in 0..10_000u32 {
			bytes.extend_from_slice(&(i % 251).to_le_bytes());
		}
		Blob::from(bytes)
	}

	#[test]
	fn gzip_round_trip() -> Result<()> {
		let payload = test_payload();
		let compressed = compress(payload.clone(), Codec::Gzip, 6)?;
		assert!(compressed.len() < payload.len());
		assert_eq!(decompress(compressed, Codec::Gzip)?, payload);
		Ok(())
	}

	#[test]
	fn brotli_round_trip() -> Result<()> {
		let payload = test_payload();
		let compressed = compress(payload.clone(), Codec::Brotli, 5)?;
		assert!(compressed.len() < payload.len());
		assert_eq!(decompress(compressed, Codec::Brotli)?, payload);
		Ok(())
	}

	#[test]
	fn none_is_identity() -> Result<()> {
		let payload = test_payload();
		assert_eq!(compress(payload.clone(), Codec::None, 0)?, payload);
		Ok(())
	}
}
