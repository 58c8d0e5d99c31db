//! Cell value datatypes.
//!
//! Every attribute and the coordinate tuple carry one of these types. The
//! enum knows its on-disk tag, its byte width, its NULL sentinel (the value
//! a deletion cell stores) and how to parse/print a single value as text for
//! the CSV front-end.

use crate::types::error::StorageError;
use anyhow::{Result, bail};
use byteorder::{ByteOrder, LittleEndian};

/// Bit pattern of the canonical `f32` quiet NaN used as the NULL sentinel.
const NULL_F32_BITS: u32 = 0x7fc0_0000;
/// Bit pattern of the canonical `f64` quiet NaN used as the NULL sentinel.
const NULL_F64_BITS: u64 = 0x7ff8_0000_0000_0000;
/// NULL sentinel for `char` values, matching the CSV deletion token.
const NULL_CHAR: u8 = b'*';

/// The scalar type of an attribute value or coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Datatype {
	Int8,
	Int16,
	Int32,
	Int64,
	UInt8,
	UInt16,
	UInt32,
	UInt64,
	Float32,
	Float64,
	Char,
}

impl Datatype {
	/// The width of one value in bytes.
	pub fn size(&self) -> usize {
		use Datatype::*;
		match self {
			Int8 | UInt8 | Char => 1,
			Int16 | UInt16 => 2,
			Int32 | UInt32 | Float32 => 4,
			Int64 | UInt64 | Float64 => 8,
		}
	}

	/// The on-disk type tag.
	pub fn as_u8(&self) -> u8 {
		use Datatype::*;
		match self {
			Int8 => 0,
			Int16 => 1,
			Int32 => 2,
			Int64 => 3,
			UInt8 => 4,
			UInt16 => 5,
			UInt32 => 6,
			UInt64 => 7,
			Float32 => 8,
			Float64 => 9,
			Char => 10,
		}
	}

	pub fn from_u8(tag: u8) -> Result<Datatype> {
		use Datatype::*;
		Ok(match tag {
			0 => Int8,
			1 => Int16,
			2 => Int32,
			3 => Int64,
			4 => UInt8,
			5 => UInt16,
			6 => UInt32,
			7 => UInt64,
			8 => Float32,
			9 => Float64,
			10 => Char,
			_ => bail!(StorageError::Format(format!("unknown datatype tag {tag}"))),
		})
	}

	pub fn is_float(&self) -> bool {
		matches!(self, Datatype::Float32 | Datatype::Float64)
	}

	/// `true` for every type a dimension may use.
	pub fn is_numeric(&self) -> bool {
		!matches!(self, Datatype::Char)
	}

	/// The little-endian bytes of the NULL sentinel for one value.
	pub fn null_bytes(&self) -> Vec<u8> {
		use Datatype::*;
		match self {
			Int8 => vec![i8::MIN as u8],
			Int16 => i16::MIN.to_le_bytes().to_vec(),
			Int32 => i32::MIN.to_le_bytes().to_vec(),
			Int64 => i64::MIN.to_le_bytes().to_vec(),
			UInt8 => vec![u8::MAX],
			UInt16 => u16::MAX.to_le_bytes().to_vec(),
			UInt32 => u32::MAX.to_le_bytes().to_vec(),
			UInt64 => u64::MAX.to_le_bytes().to_vec(),
			Float32 => NULL_F32_BITS.to_le_bytes().to_vec(),
			Float64 => NULL_F64_BITS.to_le_bytes().to_vec(),
			Char => vec![NULL_CHAR],
		}
	}

	/// Checks whether the single value in `bytes` is the NULL sentinel.
	/// Comparison is exact on the bit pattern, also for floats.
	pub fn value_is_null(&self, bytes: &[u8]) -> bool {
		debug_assert_eq!(bytes.len(), self.size());
		bytes == self.null_bytes().as_slice()
	}

	/// Parses one textual value into its little-endian byte form.
	/// The token `*` always parses to the NULL sentinel.
	pub fn parse_text(&self, token: &str) -> Result<Vec<u8>> {
		use Datatype::*;
		let token = token.trim();
		if token == "*" {
			return Ok(self.null_bytes());
		}
		let parse_error =
			|| StorageError::Format(format!("cannot parse {token:?} as {self:?}"));
		Ok(match self {
			Int8 => (token.parse::<i8>().map_err(|_| parse_error())? as u8)
				.to_le_bytes()
				.to_vec(),
			Int16 => token
				.parse::<i16>()
				.map_err(|_| parse_error())?
				.to_le_bytes()
				.to_vec(),
			Int32 => token
				.parse::<i32>()
				.map_err(|_| parse_error())?
				.to_le_bytes()
				.to_vec(),
			Int64 => token
				.parse::<i64>()
				.map_err(|_| parse_error())?
				.to_le_bytes()
				.to_vec(),
			UInt8 => token
				.parse::<u8>()
				.map_err(|_| parse_error())?
				.to_le_bytes()
				.to_vec(),
			UInt16 => token
				.parse::<u16>()
				.map_err(|_| parse_error())?
				.to_le_bytes()
				.to_vec(),
			UInt32 => token
				.parse::<u32>()
				.map_err(|_| parse_error())?
				.to_le_bytes()
				.to_vec(),
			UInt64 => token
				.parse::<u64>()
				.map_err(|_| parse_error())?
				.to_le_bytes()
				.to_vec(),
			Float32 => token
				.parse::<f32>()
				.map_err(|_| parse_error())?
				.to_le_bytes()
				.to_vec(),
			Float64 => token
				.parse::<f64>()
				.map_err(|_| parse_error())?
				.to_le_bytes()
				.to_vec(),
			Char => {
				if token.len() != 1 || !token.is_ascii() {
					bail!(parse_error());
				}
				vec![token.as_bytes()[0]]
			}
		})
	}

	/// Formats one value from its little-endian byte form. NULL sentinels
	/// print as `*`.
	pub fn format_value(&self, bytes: &[u8]) -> String {
		use Datatype::*;
		if self.value_is_null(bytes) {
			return "*".to_string();
		}
		match self {
			Int8 => (bytes[0] as i8).to_string(),
			Int16 => LittleEndian::read_i16(bytes).to_string(),
			Int32 => LittleEndian::read_i32(bytes).to_string(),
			Int64 => LittleEndian::read_i64(bytes).to_string(),
			UInt8 => bytes[0].to_string(),
			UInt16 => LittleEndian::read_u16(bytes).to_string(),
			UInt32 => LittleEndian::read_u32(bytes).to_string(),
			UInt64 => LittleEndian::read_u64(bytes).to_string(),
			Float32 => LittleEndian::read_f32(bytes).to_string(),
			Float64 => LittleEndian::read_f64(bytes).to_string(),
			Char => (bytes[0] as char).to_string(),
		}
	}
}
