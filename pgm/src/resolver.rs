//! Named collaborators the transport core depends on but that are out of this crate's
//! implementation depth (spec §9's "peripheral functionality... treated as external
//! collaborators with named interfaces"): interface resolution and per-address-family socket
//! option handling.

use std::net::IpAddr;

use crate::error::{Error, Result};

/// Interface name/index/address resolution, standing in for
/// `pgm_if_indextoaddr`/`pgm_if_getnodeaddr` in the original implementation.
pub trait InterfaceResolver {
	fn index_to_address(&self, index: u32) -> Result<IpAddr>;
	fn name_to_index(&self, name: &str) -> Result<u32>;
}

/// Resolves interfaces via the OS, using `libc::if_nametoindex` on Unix.
#[cfg(unix)]
pub struct SystemResolver;

#[cfg(unix)]
impl InterfaceResolver for SystemResolver {
	fn index_to_address(&self, index: u32) -> Result<IpAddr> {
		let mut name = [0u8; libc::IF_NAMESIZE];
		if unsafe { libc::if_indextoname(index, name.as_mut_ptr() as *mut libc::c_char) }.is_null() {
			return Err(Error::System(std::io::Error::last_os_error()));
		}
		// A node address still needs a `getifaddrs` walk the system resolver doesn't perform;
		// callers needing a bound address should supply one explicitly via `TransportInfo`.
		Err(Error::InvalidArgument(format!("no address bound to interface index {index}")))
	}

	fn name_to_index(&self, name: &str) -> Result<u32> {
		let c_name = std::ffi::CString::new(name).map_err(|_| Error::InvalidArgument("interface name contains a NUL byte".into()))?;
		let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
		if index == 0 {
			return Err(Error::InvalidArgument(format!("no such interface: {name}")));
		}
		Ok(index)
	}
}

/// A fixed interface table for tests, standing in for the OS when no real NIC is required.
pub struct StaticResolver {
	entries: Vec<(u32, String, IpAddr)>,
}

impl StaticResolver {
	pub fn new() -> Self {
		Self { entries: Vec::new() }
	}

	pub fn with(mut self, index: u32, name: &str, addr: IpAddr) -> Self {
		self.entries.push((index, name.to_string(), addr));
		self
	}
}

impl Default for StaticResolver {
	fn default() -> Self {
		Self::new()
	}
}

impl InterfaceResolver for StaticResolver {
	fn index_to_address(&self, index: u32) -> Result<IpAddr> {
		self.entries.iter().find(|(i, ..)| *i == index).map(|(_, _, a)| *a).ok_or_else(|| Error::InvalidArgument(format!("no such interface index: {index}")))
	}

	fn name_to_index(&self, name: &str) -> Result<u32> {
		self.entries.iter().find(|(_, n, _)| n == name).map(|(i, ..)| *i).ok_or_else(|| Error::InvalidArgument(format!("no such interface: {name}")))
	}
}

/// The per-address-family capability table (design note §9: "provide a small capability table
/// keyed by family rather than branching at each call site"). IPv4 and IPv6 differ in their
/// socket option names and `sockaddr` layouts; implementations of this trait isolate that
/// difference so the bind/join/configure paths in `transport.rs` stay family-agnostic.
pub trait SocketFamily {
	/// The `IPPROTO_*` level multicast-TTL/hop-limit option.
	fn hop_limit_option(&self) -> (i32, i32);
	/// The multicast loopback option.
	fn loopback_option(&self) -> (i32, i32);
	/// The multicast-interface-selection option.
	fn multicast_if_option(&self) -> (i32, i32);
}

#[cfg(unix)]
pub struct Ipv4Family;
#[cfg(unix)]
pub struct Ipv6Family;

#[cfg(unix)]
impl SocketFamily for Ipv4Family {
	fn hop_limit_option(&self) -> (i32, i32) {
		(libc::IPPROTO_IP, libc::IP_MULTICAST_TTL)
	}
	fn loopback_option(&self) -> (i32, i32) {
		(libc::IPPROTO_IP, libc::IP_MULTICAST_LOOP)
	}
	fn multicast_if_option(&self) -> (i32, i32) {
		(libc::IPPROTO_IP, libc::IP_MULTICAST_IF)
	}
}

#[cfg(unix)]
impl SocketFamily for Ipv6Family {
	fn hop_limit_option(&self) -> (i32, i32) {
		(libc::IPPROTO_IPV6, libc::IPV6_MULTICAST_HOPS)
	}
	fn loopback_option(&self) -> (i32, i32) {
		(libc::IPPROTO_IPV6, libc::IPV6_MULTICAST_LOOP)
	}
	fn multicast_if_option(&self) -> (i32, i32) {
		(libc::IPPROTO_IPV6, libc::IPV6_MULTICAST_IF)
	}
}

#[cfg(all(test, unix))]
mod tests {
	use super::*;
	use std::net::Ipv4Addr;

	#[test]
	fn static_resolver_round_trips_name_and_index() {
		let resolver = StaticResolver::new().with(2, "eth0", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
		assert_eq!(resolver.name_to_index("eth0").unwrap(), 2);
		assert_eq!(resolver.index_to_address(2).unwrap(), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
	}

	#[test]
	fn ipv4_and_ipv6_families_select_distinct_options() {
		assert_ne!(Ipv4Family.hop_limit_option(), Ipv6Family.hop_limit_option());
	}
}
