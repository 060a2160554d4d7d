//! The packet emitter: the single chokepoint every outgoing SPM, NAK, or data packet flows
//! through (spec §4.4). Grounded on `_pgm_sendto` in the original implementation's `net.c`: pick
//! the mutex/socket pair by `use_router_alert`, optionally consult the rate regulator, send, and
//! on a transient failure wait once for writability before a single retry.

use std::net::UdpSocket;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::rate::Regulator;

/// 500ms: the original implementation's hard-coded retry wait, not user-tunable (spec §4.4/§5).
const RETRY_TIMEOUT: Duration = Duration::from_millis(500);

/// IPv4/UDP header overhead accounted against the rate regulator per packet, matching the
/// original implementation's `TRANSPORT_DATA_OVERHEAD` style accounting.
const PACKET_OVERHEAD: usize = 28;

/// The two egress sockets an endpoint owns, each behind its own mutex — the "xor" pair of spec
/// §4.1's lock hierarchy. At most one of the two is ever held by a given send.
pub struct Emitter {
	send: Mutex<UdpSocket>,
	send_with_router_alert: Mutex<UdpSocket>,
	regulator: Option<Regulator>,
}

impl Emitter {
	pub fn new(send: UdpSocket, send_with_router_alert: UdpSocket, regulator: Option<Regulator>) -> Self {
		Self { send: Mutex::new(send), send_with_router_alert: Mutex::new(send_with_router_alert), regulator }
	}

	/// Sends `buf` to `destination`, selecting the mutex/socket pair by `use_router_alert` and
	/// consulting the rate regulator first if `use_rate_limit`.
	pub fn send_to(&self, use_rate_limit: bool, use_router_alert: bool, nonblocking: bool, buf: &[u8], destination: std::net::SocketAddr) -> Result<usize> {
		if use_rate_limit {
			if let Some(regulator) = &self.regulator {
				loop {
					match regulator.check(buf.len(), PACKET_OVERHEAD) {
						Ok(()) => break,
						Err(Error::WouldBlock) if nonblocking => return Err(Error::WouldBlock),
						Err(Error::WouldBlock) => std::thread::sleep(regulator.wait_for(buf.len(), PACKET_OVERHEAD)),
						Err(other) => return Err(other),
					}
				}
			}
		}

		let mutex = if use_router_alert { &self.send_with_router_alert } else { &self.send };
		let socket = mutex.lock().unwrap();

		match socket.send_to(buf, destination) {
			Ok(n) => Ok(n),
			Err(err) => {
				let mapped = Error::from(err);
				if !mapped.is_transient() {
					return Err(mapped);
				}

				log::warn!("sendto {destination} failed transiently, waiting up to {RETRY_TIMEOUT:?} for writability");
				match runtime::poll::wait_writable(&*socket, RETRY_TIMEOUT) {
					Ok(true) => socket.send_to(buf, destination).map_err(|e| {
						log::warn!("retried sendto {destination} still failed: {e}");
						Error::from(e)
					}),
					Ok(false) => {
						log::warn!("sendto {destination} socket timed out waiting for writability");
						Err(mapped)
					}
					Err(poll_err) => {
						log::warn!("poll on send socket failed: {poll_err}");
						Err(mapped)
					}
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn udp() -> UdpSocket {
		UdpSocket::bind("127.0.0.1:0").unwrap()
	}

	#[test]
	fn sends_over_the_plain_socket_by_default() {
		let recv = udp();
		let addr = recv.local_addr().unwrap();

		let emitter = Emitter::new(udp(), udp(), None);
		emitter.send_to(false, false, false, b"hello", addr).unwrap();

		let mut buf = [0u8; 16];
		let (n, _) = recv.recv_from(&mut buf).unwrap();
		assert_eq!(&buf[..n], b"hello");
	}

	#[test]
	fn rate_limited_nonblocking_send_returns_would_block_when_exhausted() {
		let recv = udp();
		let addr = recv.local_addr().unwrap();

		let emitter = Emitter::new(udp(), udp(), Some(Regulator::new(1, 1)));
		assert!(matches!(emitter.send_to(true, false, true, b"hello world", addr), Err(Error::WouldBlock)));
	}
}
