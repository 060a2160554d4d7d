//! Thin wrappers over the platform's readiness-polling primitive, used to wait for a socket to
//! become writable (or readable) without spinning.

use std::io;
use std::time::Duration;

#[cfg(target_family = "unix")]
mod sys {
	pub use std::os::fd::{AsRawFd, RawFd};

	pub use libc::{poll, pollfd as Poll, POLLIN, POLLOUT};
}

#[cfg(target_family = "windows")]
mod sys {
	pub use std::os::windows::io::AsRawSocket as AsRawFd;

	pub use windows_sys::Win32::Networking::WinSock::{WSAPoll as poll, POLLRDNORM as POLLIN, POLLWRNORM as POLLOUT, SOCKET as RawFd, WSAPOLLFD as Poll};
}

pub use sys::AsRawFd;
use sys::*;

fn as_raw<T: AsRawFd>(t: &T) -> RawFd {
	#[cfg(target_family = "unix")]
	return t.as_raw_fd();
	#[cfg(target_family = "windows")]
	return t.as_raw_socket() as _;
}

fn as_timeout(t: Option<Duration>) -> i32 {
	t.and_then(|d| d.as_millis().try_into().ok()).unwrap_or(-1)
}

/// Blocks until `socket` is ready for the requested event, or `timeout` elapses. Returns whether
/// it became ready.
fn wait<T: AsRawFd>(socket: &T, events: i16, timeout: Option<Duration>) -> io::Result<bool> {
	let mut fd = Poll { fd: as_raw(socket), events, revents: 0 };

	let ret = unsafe { poll(&mut fd, 1, as_timeout(timeout)) };

	if ret < 0 {
		return Err(io::Error::last_os_error());
	}

	Ok(ret > 0)
}

/// Waits for `socket` to become writable, up to `timeout`.
pub fn wait_writable<T: AsRawFd>(socket: &T, timeout: Duration) -> io::Result<bool> {
	wait(socket, POLLOUT as i16, Some(timeout))
}

/// Waits for `socket` to become readable. `None` blocks indefinitely.
pub fn wait_readable<T: AsRawFd>(socket: &T, timeout: Option<Duration>) -> io::Result<bool> {
	wait(socket, POLLIN as i16, timeout)
}
