use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use collections::bytes::Cursor;
use utils::bytes::Cast;
use utils::endian::U16Be;

use super::header::Afi;

/// A Network Layer Address: the address family varies per packet (ASM senders typically carry an
/// IPv4 NLA even over an IPv6 transport bind, since it only identifies the path, not the group),
/// so it is encoded/decoded as a small variable-length field rather than a fixed `Cast` struct.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Nla {
	V4(Ipv4Addr),
	V6(Ipv6Addr),
}

impl Nla {
	pub fn afi(self) -> u16 {
		match self {
			Nla::V4(_) => Afi::IP,
			Nla::V6(_) => Afi::IP6,
		}
	}

	pub fn wire_len(self) -> usize {
		match self {
			Nla::V4(_) => 4,
			Nla::V6(_) => 16,
		}
	}

	pub fn write(self, mut cursor: Cursor) -> Cursor {
		cursor = cursor.push(&Afi(U16Be::from(self.afi())));
		// Two reserved bytes, as the common header's options octet already carries the real flags.
		cursor = cursor.push(&U16Be::from(0u16));

		match self {
			Nla::V4(addr) => cursor.push(&addr.octets()),
			Nla::V6(addr) => cursor.push(&addr.octets()),
		}
	}

	pub fn read(packet: &mut collections::bytes::Packet) -> Option<Self> {
		let afi = *packet.split::<Afi>();
		let _reserved = *packet.split::<U16Be>();

		match afi.0.get() {
			Afi::IP => {
				let octets: [u8; 4] = *packet.split();
				Some(Nla::V4(octets.into()))
			}
			Afi::IP6 => {
				let octets: [u8; 16] = *packet.split();
				Some(Nla::V6(octets.into()))
			}
			_ => None,
		}
	}
}

impl From<IpAddr> for Nla {
	fn from(addr: IpAddr) -> Self {
		match addr {
			IpAddr::V4(a) => Nla::V4(a),
			IpAddr::V6(a) => Nla::V6(a),
		}
	}
}

impl From<Nla> for IpAddr {
	fn from(nla: Nla) -> Self {
		match nla {
			Nla::V4(a) => IpAddr::V4(a),
			Nla::V6(a) => IpAddr::V6(a),
		}
	}
}
