//! Error taxonomy.
//!
//! Mirrors the taxonomy in the design doc: most failures in this crate are
//! not meant to be recovered from by a caller (a supervisor that can't block
//! signals has nothing sensible to fall back to), so the bulk of the crate
//! still aborts via [`fatal`](crate::platform::fatal). [`Error`] exists for
//! the handful of call sites — setup of the signal multiplexer, parsing
//! `/proc` records, and control-line parsing — where returning a typed error
//! to the caller (rather than aborting the process outright) is the right
//! shape, e.g. because a caller may want to retry or report rather than die.

use std::fmt;

/// Errors surfaced by the public API of this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// The host environment lacks a facility this crate requires (no
	/// `/proc/<pid>/stat`, the subreaper attribute was rejected, etc).
	/// Detected at startup; callers should treat this as unrecoverable.
	#[error("environment does not support {0}")]
	Environmental(&'static str),

	/// A primitive syscall failed in a way that isn't one of the expected
	/// transient conditions (`EAGAIN`, `ECONNRESET`, "no such process"
	/// during descendant discovery).
	#[error("{operation} failed: {source}")]
	Resource {
		/// What we were trying to do, for the diagnostic.
		operation: &'static str,
		/// The underlying OS error.
		source: nix::Error,
	},

	/// A record read from `/proc` could not be parsed into the shape we
	/// expect (e.g. the rightmost `)` in a stat line could not be found).
	#[error("could not parse {what}: {detail}")]
	Parse {
		/// What was being parsed.
		what: &'static str,
		/// Why it failed.
		detail: String,
	},

	/// A line on the control channel did not match any recognised command.
	/// Per spec this is not itself fatal — unknown commands are ignored —
	/// but the parser surfaces it so callers that want strict mode may log
	/// or count it.
	#[error("unrecognised control command: {0:?}")]
	UnknownCommand(String),
}

impl Error {
	pub(crate) fn resource(operation: &'static str, source: nix::Error) -> Self {
		Error::Resource { operation, source }
	}
	pub(crate) fn parse(what: &'static str, detail: impl fmt::Display) -> Self {
		Error::Parse { what, detail: detail.to_string() }
	}
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
