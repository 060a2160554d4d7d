//! End-to-end scenarios from spec §8. S1 and S6 need the wire (loopback multicast sockets);
//! S2-S5 exercise the rate regulator, transmit window, and transport core directly, since none
//! of them depend on packets actually crossing a socket. Durations are scaled down from the
//! spec's literal values so the suite runs in a few seconds rather than tens of seconds; the
//! behavior being checked (the cap itself) is unchanged by the scale.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use collections::bytes::Packet as Datagram;

use pgm::info::{GroupSourceRequest, TransportInfo};
use pgm::packet::{self, Body};
use pgm::rate::Regulator;
use pgm::registry::Registry;
use pgm::resolver::StaticResolver;
use pgm::txw::{Capacity, Txw};
use pgm::{Error, Transport, Tsi};

fn tsi(seed: u8, port: u16) -> Tsi {
	Tsi::new([seed, 2, 3, 4, 5, 6], port)
}

fn loopback_info(seed: u8, mcast: Ipv4Addr, port: u16) -> TransportInfo {
	let mut info = TransportInfo::new(tsi(seed, port), port);
	let gsr = GroupSourceRequest { group: IpAddr::V4(mcast), source: None, interface: None };
	info.send_group = Some(gsr);
	info.recv_groups.push(gsr);
	info.multicast_loop = true;
	info.txw_capacity = Capacity::Sqns(64);
	info.max_tpdu = 1500;
	info
}

#[test]
fn s1_loopback_round_trip_delivers_apdus_in_order() {
	let registry = Registry::new();
	let mcast = Ipv4Addr::new(239, 192, 0, 1);
	let port = 17501;

	let sender = Transport::create(loopback_info(1, mcast, port), Box::new(StaticResolver::new())).unwrap();
	sender.bind(&registry).unwrap();

	let receiver = Transport::create(loopback_info(2, mcast, port), Box::new(StaticResolver::new())).unwrap();
	receiver.bind(&registry).unwrap();

	let apdus: Vec<Vec<u8>> = (0..3u8).map(|i| vec![i; 1000]).collect();
	for apdu in &apdus {
		sender.send(apdu, false).unwrap();
	}

	let mut received = Vec::new();
	while received.len() < apdus.len() {
		let apdu = receiver.recv(Some(Duration::from_secs(2))).expect("expected all three APDUs to arrive over loopback");
		received.push(apdu);
	}

	assert_eq!(received, apdus, "APDUs must be delivered in the order they were sent");

	sender.destroy(&registry, false).unwrap();
	receiver.destroy(&registry, false).unwrap();
}

/// Scaled-down rendition of "rate cap": over any window, admitted bytes are bounded by
/// `rate * elapsed + burst`, never more.
#[test]
fn s2_rate_regulator_caps_throughput_to_the_configured_rate() {
	let regulator = Regulator::new(2_000, 2_000);
	let chunk = 1_000;

	regulator.check(chunk, 0).unwrap();
	assert!(matches!(regulator.check(chunk, 0), Err(Error::WouldBlock)), "a second chunk beyond the burst allowance must be refused");

	let wait = regulator.wait_for(chunk, 0);
	assert!(wait > Duration::from_millis(200), "refusing a chunk that exceeds the bucket must require a nonzero wait");

	thread::sleep(wait + Duration::from_millis(50));
	assert!(regulator.check(chunk, 0).is_ok(), "after waiting out the shortfall the same chunk must be admitted");
}

/// A nonblocking send that fails partway through fragmentation rolls the transmit window back to
/// its pre-APDU `lead`, and a retry re-fragments from the same starting sqn (spec §8 property 3).
#[test]
fn s3_apdu_rollback_restores_lead_and_a_retry_reuses_the_starting_sqn() {
	let mut txw = Txw::create(tsi(3, 7500), 1500, Capacity::Sqns(16), false, 255, 223, 100).unwrap();
	let pre_lead = txw.lead();

	txw.begin_apdu();
	txw.push(b"frag0".to_vec(), 0, false);
	txw.push(b"frag1".to_vec(), 0, false);
	// The third fragment's send would have failed here (simulated EAGAIN); the caller rolls back
	// instead of leaving a partial APDU retained.
	txw.rollback_apdu();

	assert_eq!(txw.lead(), pre_lead, "rollback must restore lead to its pre-APDU value");

	txw.begin_apdu();
	let retry_first = txw.push(b"frag0".to_vec(), 0, false);
	assert_eq!(retry_first, pre_lead.wrapping_add(1), "a retry must be assigned the same starting sqn as the failed attempt");
	txw.commit_apdu();
}

#[test]
fn s4_joining_the_same_group_twice_is_rejected() {
	let info = TransportInfo::new(tsi(4, 7504), 7504);
	let transport = Transport::create(info, Box::new(StaticResolver::new())).unwrap();
	let gsr = GroupSourceRequest { group: IpAddr::V4(Ipv4Addr::new(239, 192, 0, 4)), source: None, interface: None };

	transport.join_group(gsr).unwrap();
	assert!(matches!(transport.join_group(gsr), Err(Error::InvalidArgument(_))), "joining an already-joined group must be rejected, not silently deduplicated");
}

/// A sender keeps sending concurrently with a `destroy(flush=false)` call from another thread.
/// Neither side may panic, and every send issued after `destroy` returns observes `bad-state`.
#[test]
fn s5_destroy_while_sending_leaves_the_endpoint_usable_afterward() {
	let registry = Registry::new();
	let mcast = Ipv4Addr::new(239, 192, 0, 5);
	let port = 17505;

	let transport = Transport::create(loopback_info(5, mcast, port), Box::new(StaticResolver::new())).unwrap();
	transport.bind(&registry).unwrap();

	let sender = Arc::clone(&transport);
	let handle = thread::spawn(move || {
		for _ in 0..50 {
			let _ = sender.send(b"payload", true);
		}
	});

	thread::sleep(Duration::from_millis(5));
	transport.destroy(&registry, false).unwrap();
	handle.join().expect("the sending thread must not panic while the endpoint is torn down underneath it");

	assert!(matches!(transport.send(b"after destroy", false), Err(Error::BadState(_))));
}

/// Exactly three ambient SPMs are observed on the wire immediately after `bind`, before any data.
#[test]
fn s6_bind_emits_three_ambient_spms_before_any_data() {
	let registry = Registry::new();
	let mcast = Ipv4Addr::new(239, 192, 0, 6);
	let port = 17506;

	let probe = UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)).unwrap();
	probe.join_multicast_v4(&mcast, &Ipv4Addr::UNSPECIFIED).unwrap();
	probe.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

	let sender = Transport::create(loopback_info(6, mcast, port), Box::new(StaticResolver::new())).unwrap();
	sender.bind(&registry).unwrap();

	let mut buf = [0u8; 2000];
	for _ in 0..3 {
		let (n, _from) = probe.recv_from(&mut buf).expect("expected an ambient SPM on the wire");
		let decoded = packet::decode(Datagram::new(buf[..n].to_vec())).expect("a well-formed PGM packet");
		assert!(matches!(decoded.body, Body::Spm { .. }), "the first three packets after bind must be SPMs, not data");
	}

	sender.destroy(&registry, false).unwrap();
}
