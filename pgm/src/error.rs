use std::io;

use thiserror::Error;

/// The sum-typed error surface for the transport.
///
/// Categories mirror `pgm_transport_error_from_errno`'s switch in the original implementation:
/// most `io::Error`s are mapped onto the closest category via [`From`] rather than surfaced
/// verbatim, so callers can match on intent instead of `ErrorKind`.
#[derive(Debug, Error)]
pub enum Error {
	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	#[error("permission denied: {0}")]
	Permission(String),

	#[error("resource exhausted: {0}")]
	Resource(String),

	#[error("network unreachable")]
	NetworkUnreachable,

	#[error("host unreachable")]
	HostUnreachable,

	#[error("operation would block")]
	WouldBlock,

	#[error("invalid operation for current state: {0}")]
	BadState(&'static str),

	#[error("protocol error: {0}")]
	Protocol(String),

	#[error("system error: {0}")]
	System(io::Error),
}

pub type Result<T = ()> = std::result::Result<T, Error>;

impl Error {
	/// Whether this error is transient, i.e. a retry of the same operation might succeed. Used by
	/// the packet emitter to decide whether to wait on writability and retry once (spec §4.4).
	pub fn is_transient(&self) -> bool {
		!matches!(self, Error::NetworkUnreachable | Error::HostUnreachable | Error::WouldBlock)
	}
}

impl From<io::Error> for Error {
	/// Maps a kernel error onto the closest category, matching
	/// `pgm_transport_error_from_errno`'s switch in the original implementation.
	fn from(err: io::Error) -> Self {
		match err.raw_os_error() {
			Some(libc::ENETUNREACH) => Error::NetworkUnreachable,
			Some(libc::EHOSTUNREACH) => Error::HostUnreachable,
			Some(libc::EACCES | libc::EPERM) => Error::Permission(err.to_string()),
			Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM | libc::EADDRINUSE) => Error::Resource(err.to_string()),
			_ if err.kind() == io::ErrorKind::WouldBlock => Error::WouldBlock,
			_ => Error::System(err),
		}
	}
}

