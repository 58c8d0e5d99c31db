//! Fragment naming.
//!
//! A fragment directory is named `A_lo_hi`, where `[lo, hi]` is the
//! inclusive range of update batch sequence numbers it covers. A freshly
//! written batch is `A_s_s`; consolidation widens the window.

use anyhow::{Result, bail};
use gridtiles_core::StorageError;
use std::fmt;

/// The sequence window of one fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentName {
	pub lo: u64,
	pub hi: u64,
}

impl FragmentName {
	pub fn new(lo: u64, hi: u64) -> FragmentName {
		debug_assert!(lo <= hi);
		FragmentName { lo, hi }
	}

	/// The name of the fragment holding the single batch `seq`.
	pub fn single(seq: u64) -> FragmentName {
		FragmentName { lo: seq, hi: seq }
	}

	/// Parses a directory name of the form `A_lo_hi`.
	pub fn parse(name: &str) -> Result<FragmentName> {
		let error = || StorageError::Format(format!("invalid fragment name {name:?}"));
		let rest = name.strip_prefix("A_").ok_or_else(error)?;
		let (lo, hi) = rest.split_once('_').ok_or_else(error)?;
		let lo: u64 = lo.parse().map_err(|_| error())?;
		let hi: u64 = hi.parse().map_err(|_| error())?;
		if lo > hi {
			bail!(error());
		}
		Ok(FragmentName { lo, hi })
	}

	/// The number of update batches the fragment covers.
	pub fn batch_num(&self) -> u64 {
		self.hi - self.lo + 1
	}
}

impl fmt::Display for FragmentName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "A_{}_{}", self.lo, self.hi)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_and_format_round_trip() -> Result<()> {
		let name = FragmentName::parse("A_0_2")?;
		assert_eq!(name, FragmentName::new(0, 2));
		assert_eq!(name.to_string(), "A_0_2");
		assert_eq!(name.batch_num(), 3);
		assert_eq!(FragmentName::single(7).to_string(), "A_7_7");
		Ok(())
	}

	#[test]
	fn malformed_names_are_rejected() {
		for name in ["A_1", "B_0_1", "A_2_1", "A_x_1", "A_1_1_1"] {
			assert!(FragmentName::parse(name).is_err(), "{name} parsed");
		}
	}
}
