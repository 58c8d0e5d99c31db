//! Error kinds shared by the whole engine.
//!
//! Every fallible operation returns `anyhow::Result`, but the error value at
//! the failure site is always one of the [`StorageError`] kinds below, so a
//! caller that needs to react to a specific class of failure can
//! `downcast_ref::<StorageError>()` while intermediate layers keep attaching
//! plain-text context.

use thiserror::Error;

/// The error kinds surfaced by the storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Construction or validation of an array schema failed.
	#[error("schema error: {0}")]
	Schema(String),

	/// A handle was misused: write on a read-mode descriptor, reuse after
	/// close, double-open in write mode.
	#[error("state error: {0}")]
	State(String),

	/// An on-disk layout inconsistency was discovered during load.
	#[error("format error: {0}")]
	Format(String),

	/// An underlying filesystem call failed.
	#[error("io error while {context}: {source}")]
	Io {
		context: String,
		#[source]
		source: std::io::Error,
	},

	/// A caller-provided buffer was exhausted during a result copy.
	#[error("overflow error: {0}")]
	Overflow(String),
}

impl StorageError {
	/// Wraps an `std::io::Error` with a description of the failed operation.
	pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
		StorageError::Io {
			context: context.into(),
			source,
		}
	}
}

/// Extracts the [`StorageError`] kind from an `anyhow::Error`, if the chain
/// was started by one.
pub fn storage_error(error: &anyhow::Error) -> Option<&StorageError> {
	error.downcast_ref::<StorageError>()
}
