//! Endpoint configuration: the Rust analogue of `pgm_transport_info_t`, validated before
//! `Transport::bind` is ever attempted (spec §4.1 `create`, SPEC §2's "configuration" ambient
//! concern).

use std::net::IpAddr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::tsi::Tsi;
use crate::txw::Capacity;

/// FEC parameters (spec §3's endpoint FEC config).
#[derive(Clone, Copy)]
pub struct FecConfig {
	pub n: usize,
	pub k: usize,
	pub proactive_h: usize,
	pub use_ondemand_parity: bool,
	pub use_varpkt_len: bool,
}

/// A multicast group plus optional source-specific filter and bound interface, as used by
/// `join_group`/`join_source_group` and friends (spec §4.1).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct GroupSourceRequest {
	pub group: IpAddr,
	pub source: Option<IpAddr>,
	pub interface: Option<u32>,
}

pub struct TransportInfo {
	pub tsi: Tsi,
	pub dport: u16,
	pub udp_encap_ucast_port: Option<u16>,
	pub udp_encap_mcast_port: Option<u16>,

	pub max_tpdu: u16,
	pub hops: u8,
	pub sndbuf: Option<usize>,
	pub rcvbuf: Option<usize>,

	pub multicast_loop: bool,
	pub send_only: bool,
	pub recv_only: bool,
	/// Set by `set_recv_only`'s `is_passive` argument. A passive receive-only transport never
	/// NAKs — it listens and delivers whatever arrives without requesting retransmission of gaps
	/// (`pgm_transport_set_recv_only(transport, is_passive)` in the original implementation).
	pub passive: bool,
	pub abort_on_reset: bool,
	pub nonblocking: bool,

	pub fec: Option<FecConfig>,
	pub txw_capacity: Capacity,

	pub spm_ambient_interval: Duration,
	pub spm_heartbeat_interval: Vec<Duration>,

	pub recv_groups: Vec<GroupSourceRequest>,
	pub send_group: Option<GroupSourceRequest>,
}

impl TransportInfo {
	pub fn new(tsi: Tsi, dport: u16) -> Self {
		Self {
			tsi,
			dport,
			udp_encap_ucast_port: None,
			udp_encap_mcast_port: None,
			max_tpdu: 1500,
			hops: 16,
			sndbuf: None,
			rcvbuf: None,
			multicast_loop: false,
			send_only: false,
			recv_only: false,
			passive: false,
			abort_on_reset: false,
			nonblocking: false,
			fec: None,
			txw_capacity: Capacity::Sqns(1024),
			spm_ambient_interval: Duration::from_secs(30),
			spm_heartbeat_interval: vec![
				Duration::from_millis(100),
				Duration::from_millis(100),
				Duration::from_millis(100),
				Duration::from_millis(100),
				Duration::from_millis(1600),
				Duration::from_secs(3),
				Duration::from_secs(10),
				Duration::from_secs(30),
			],
			recv_groups: Vec::new(),
			send_group: None,
		}
	}

	/// Validates the configuration surface enumerated in spec §6, matching
	/// `pgm_transport_info_t`'s construction-time checks in the original implementation.
	pub fn validate(&self) -> Result<()> {
		if self.send_only && self.recv_only {
			return Err(Error::InvalidArgument("a transport cannot be both send_only and recv_only".into()));
		}

		if self.udp_encap_ucast_port.is_some() != self.udp_encap_mcast_port.is_some() {
			return Err(Error::InvalidArgument("UDP encapsulation requires both the unicast and multicast ports".into()));
		}

		if let Some(ucast) = self.udp_encap_ucast_port {
			if ucast == self.dport {
				return Err(Error::InvalidArgument("source and destination ports must be distinct".into()));
			}
		}

		if !(16..65536).contains(&(self.max_tpdu as usize)) {
			return Err(Error::InvalidArgument("max_tpdu must be at least large enough for the PGM+IP headers".into()));
		}

		if !(1..256).contains(&self.hops) {
			return Err(Error::InvalidArgument("hops must be in (0,256)".into()));
		}

		if let Some(fec) = self.fec {
			if !(2..=128).contains(&fec.k) || !fec.k.is_power_of_two() {
				return Err(Error::InvalidArgument("fec.k must be a power of two in [2,128]".into()));
			}
			if !(fec.k + 1..=255).contains(&fec.n) {
				return Err(Error::InvalidArgument("fec.n must be in [k+1,255]".into()));
			}
			if fec.proactive_h > fec.n - fec.k {
				return Err(Error::InvalidArgument("fec.proactive_h must be at most n-k".into()));
			}
			if fec.k > 223 && (fec.proactive_h * 223) / fec.k < 1 {
				return Err(Error::InvalidArgument("fec.proactive_h too small for k > 223".into()));
			}
		}

		let family = |addr: IpAddr| matches!(addr, IpAddr::V6(_));
		if let Some(first) = self.recv_groups.first() {
			let v6 = family(first.group);
			if self.recv_groups.iter().any(|g| family(g.group) != v6) {
				return Err(Error::InvalidArgument("all receive group-source requests must share an address family".into()));
			}
		}

		if let Some(send) = self.send_group {
			if let Some(source) = send.source {
				if family(send.group) != family(source) {
					return Err(Error::InvalidArgument("the send request's group and source must share an address family".into()));
				}
			}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn tsi() -> Tsi {
		Tsi::new([1, 2, 3, 4, 5, 6], 7500)
	}

	#[test]
	fn default_configuration_validates() {
		assert!(TransportInfo::new(tsi(), 7500).validate().is_ok());
	}

	#[test]
	fn send_only_and_recv_only_are_mutually_exclusive() {
		let mut info = TransportInfo::new(tsi(), 7500);
		info.send_only = true;
		info.recv_only = true;
		assert!(info.validate().is_err());
	}

	#[test]
	fn udp_encapsulation_requires_both_ports() {
		let mut info = TransportInfo::new(tsi(), 7500);
		info.udp_encap_ucast_port = Some(3056);
		assert!(info.validate().is_err());
	}

	#[test]
	fn mixed_address_families_across_receive_groups_are_rejected() {
		use std::net::{Ipv4Addr, Ipv6Addr};

		let mut info = TransportInfo::new(tsi(), 7500);
		info.recv_groups.push(GroupSourceRequest { group: IpAddr::V4(Ipv4Addr::new(239, 192, 0, 1)), source: None, interface: None });
		info.recv_groups.push(GroupSourceRequest { group: IpAddr::V6(Ipv6Addr::LOCALHOST), source: None, interface: None });
		assert!(info.validate().is_err());
	}
}
