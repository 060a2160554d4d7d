//! Transport core: endpoint lifecycle, multicast group management, and the send/receive paths
//! (spec §4.1). Grounded on `pgm_transport_create`/`pgm_transport_bind`/`pgm_transport_destroy`
//! and friends in the original implementation's `transport.c`, reimplemented around explicit OS
//! threads and a strict lock hierarchy instead of the original's single global lock:
//! `endpoint.mutex` → `peers_lock` (owned by [`PeerTable`]) → `window_lock` (`txw`/`timers`) →
//! `send_mutex` xor `send_with_router_alert_mutex` (owned by [`Emitter`], acquired last and never
//! while `window_lock` is also held by the same call). `Regulator`'s mutex sits below even the
//! send mutexes and is never held across a blocking sleep (see `rate.rs`).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use collections::bytes::Packet as Datagram;

use crate::error::{Error, Result};
use crate::fec::{self, Rs};
use crate::info::{FecConfig, GroupSourceRequest, TransportInfo};
use crate::net::Emitter;
use crate::packet::{self, Body, DataKind, Fragment, Nla, NakKind, Parity};
use crate::peer::{Peer, PeerTable};
use crate::rate::Regulator;
use crate::registry::Registry;
use crate::resolver::{InterfaceResolver, Ipv4Family, Ipv6Family, SocketFamily};
use crate::timer::{NakTimeout, Timers};
use crate::tsi::Tsi;
use crate::txw::{Capacity, Txw};

/// Header/option margin reserved against `max_tpdu` when fragmenting a send, matching the
/// codec's own per-packet allocation slack in `packet::encode_data`.
const DATA_OVERHEAD_ESTIMATE: usize = 64;

const RDATA_WAIT: Duration = Duration::from_millis(500);
const REPEAT_NAK_WAIT: Duration = Duration::from_secs(2);
const NCF_WAIT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
	Unbound,
	Bound,
	Destroyed,
}

/// `endpoint.mutex`: guards lifecycle phase and pre-bind configuration (spec §5).
struct Endpoint {
	phase: Phase,
	info: TransportInfo,
}

/// Resources allocated at `bind()` time. Cheaply `Clone`, so callers take a snapshot and release
/// `Transport::bound` immediately rather than holding it across a send or receive.
#[derive(Clone)]
struct Bound {
	emitter: Arc<Emitter>,
	recv_socket: Arc<UdpSocket>,
	send_addr: SocketAddr,
	rxw_capacity: usize,
	fec: Option<(usize, usize)>,
}

/// A PGM endpoint: one transmit window, one multicast send group, and the set of peers heard
/// from on its receive groups (spec §3 "Transport").
pub struct Transport {
	tsi: Tsi,
	endpoint: Mutex<Endpoint>,
	peers: PeerTable,
	txw: Mutex<Option<Txw>>,
	timers: Mutex<Option<Timers>>,
	bound: Mutex<Option<Bound>>,
	resolver: Box<dyn InterfaceResolver + Send + Sync>,
	spm_sqn: AtomicU32,
}

impl Transport {
	/// Validates `info` and constructs an unbound endpoint. Sockets are not opened until
	/// [`Self::bind`] (spec §4.1: `pgm_transport_create` never touches the network).
	pub fn create(info: TransportInfo, resolver: Box<dyn InterfaceResolver + Send + Sync>) -> Result<Arc<Self>> {
		info.validate()?;
		let tsi = info.tsi;

		Ok(Arc::new(Self {
			tsi,
			endpoint: Mutex::new(Endpoint { phase: Phase::Unbound, info }),
			peers: PeerTable::new(),
			txw: Mutex::new(None),
			timers: Mutex::new(None),
			bound: Mutex::new(None),
			resolver,
			spm_sqn: AtomicU32::new(0),
		}))
	}

	pub fn tsi(&self) -> Tsi {
		self.tsi
	}

	/// Resolves a named interface (e.g. `"eth0"`) to the index used by `GroupSourceRequest` and
	/// `block_source`/`unblock_source`, matching `pgm_if_nametoindex` in the original
	/// implementation.
	pub fn resolve_interface(&self, name: &str) -> Result<u32> {
		self.resolver.name_to_index(name)
	}

	fn with_info<R>(&self, f: impl FnOnce(&TransportInfo) -> R) -> R {
		f(&self.endpoint.lock().unwrap().info)
	}

	fn configure(&self, f: impl FnOnce(&mut TransportInfo)) -> Result<()> {
		let mut endpoint = self.endpoint.lock().unwrap();
		if endpoint.phase != Phase::Unbound {
			return Err(Error::BadState("endpoint configuration is immutable once bound"));
		}
		f(&mut endpoint.info);
		endpoint.info.validate()
	}

	fn bound(&self) -> Result<Bound> {
		self.bound.lock().unwrap().clone().ok_or(Error::BadState("transport is not bound"))
	}

	// -- pre-bind configuration (spec §4.1 "set_*"), matching `pgm_transport_set_*` --

	pub fn set_max_tpdu(&self, tpdu: u16) -> Result<()> {
		self.configure(|i| i.max_tpdu = tpdu)
	}

	pub fn set_hops(&self, hops: u8) -> Result<()> {
		self.configure(|i| i.hops = hops)
	}

	pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
		self.configure(|i| i.nonblocking = nonblocking)
	}

	pub fn set_send_only(&self, yes: bool) -> Result<()> {
		self.configure(|i| i.send_only = yes)
	}

	/// `is_passive` mirrors `pgm_transport_set_recv_only`'s second argument: a passive receiver
	/// never generates NAKs for gaps it observes, it only delivers what arrives.
	pub fn set_recv_only(&self, is_passive: bool) -> Result<()> {
		self.configure(|i| {
			i.recv_only = true;
			i.passive = is_passive;
		})
	}

	pub fn set_abort_on_reset(&self, yes: bool) -> Result<()> {
		self.configure(|i| i.abort_on_reset = yes)
	}

	pub fn set_multicast_loop(&self, yes: bool) -> Result<()> {
		self.configure(|i| i.multicast_loop = yes)
	}

	pub fn set_fec(&self, fec: FecConfig) -> Result<()> {
		self.configure(|i| i.fec = Some(fec))
	}

	pub fn set_txw_capacity(&self, capacity: Capacity) -> Result<()> {
		self.configure(|i| i.txw_capacity = capacity)
	}

	pub fn set_sndbuf(&self, bytes: usize) -> Result<()> {
		self.configure(|i| i.sndbuf = Some(bytes))
	}

	pub fn set_rcvbuf(&self, bytes: usize) -> Result<()> {
		self.configure(|i| i.rcvbuf = Some(bytes))
	}

	pub fn set_send_group(&self, gsr: GroupSourceRequest) -> Result<()> {
		self.configure(|i| i.send_group = Some(gsr))
	}

	// -- group membership --

	pub fn join_group(&self, gsr: GroupSourceRequest) -> Result<()> {
		let mut endpoint = self.endpoint.lock().unwrap();
		if endpoint.info.recv_groups.contains(&gsr) {
			return Err(Error::InvalidArgument("group is already joined".into()));
		}
		endpoint.info.recv_groups.push(gsr);
		drop(endpoint);

		if let Some(bound) = self.bound.lock().unwrap().as_ref() {
			apply_membership(&bound.recv_socket, gsr, true)?;
		}
		Ok(())
	}

	/// §9(b): the original implementation's guard on this path is inverted — it proceeds when
	/// `recv_gsr_len == 0`, backwards from the only sensible precondition. Leaving a group only
	/// makes sense once at least one is joined.
	pub fn leave_group(&self, gsr: GroupSourceRequest) -> Result<()> {
		let mut endpoint = self.endpoint.lock().unwrap();
		if endpoint.info.recv_groups.is_empty() {
			return Err(Error::BadState("no receive groups are joined"));
		}
		endpoint.info.recv_groups.retain(|g| g != &gsr);
		drop(endpoint);

		if let Some(bound) = self.bound.lock().unwrap().as_ref() {
			apply_membership(&bound.recv_socket, gsr, false)?;
		}
		Ok(())
	}

	/// §9(c): the original implementation stores a pointer into a caller-owned
	/// `struct group_source_req` rather than copying it, so the request can dangle or alias by
	/// the time it is used. `GroupSourceRequest` is `Copy` here, so every call site always stores
	/// its own value — there is no pointer to alias.
	pub fn join_source_group(&self, gsr: GroupSourceRequest) -> Result<()> {
		if gsr.source.is_none() {
			return Err(Error::InvalidArgument("join_source_group requires a source address".into()));
		}
		self.join_group(gsr)
	}

	pub fn leave_source_group(&self, gsr: GroupSourceRequest) -> Result<()> {
		self.leave_group(gsr)
	}

	/// Source-specific multicast filtering (IPv4 only; see `DESIGN.md`). `block` adds `source` to
	/// the group's exclusion list without leaving the group outright.
	pub fn block_source(&self, group: IpAddr, source: IpAddr, interface: Option<u32>) -> Result<()> {
		let bound = self.bound()?;
		set_source_filter(&bound.recv_socket, group, source, interface, true)
	}

	pub fn unblock_source(&self, group: IpAddr, source: IpAddr, interface: Option<u32>) -> Result<()> {
		let bound = self.bound()?;
		set_source_filter(&bound.recv_socket, group, source, interface, false)
	}

	// -- lifecycle --

	/// Opens the send/receive sockets, joins the configured groups, registers with `registry`,
	/// and emits the first three ambient SPMs back-to-back (spec §4.6, §8 scenario S6).
	pub fn bind(self: &Arc<Self>, registry: &Registry) -> Result<()> {
		let mut endpoint = self.endpoint.lock().unwrap();
		if endpoint.phase != Phase::Unbound {
			return Err(Error::BadState("transport already bound or destroyed"));
		}

		let recv_port = endpoint.info.udp_encap_mcast_port.unwrap_or(endpoint.info.dport);
		let recv_family_v6 = endpoint.info.recv_groups.first().map(|g| g.group.is_ipv6()).unwrap_or(false);
		let recv_bind_addr = SocketAddr::new(if recv_family_v6 { IpAddr::V6(Ipv6Addr::UNSPECIFIED) } else { IpAddr::V4(Ipv4Addr::UNSPECIFIED) }, recv_port);
		let recv_socket = bind_reuseaddr(recv_bind_addr)?;

		for &gsr in &endpoint.info.recv_groups {
			apply_membership(&recv_socket, gsr, true)?;
		}
		configure_socket(&recv_socket, endpoint.info.hops, endpoint.info.multicast_loop)?;
		if let Some(rcvbuf) = endpoint.info.rcvbuf {
			set_buffer_size(&recv_socket, libc::SO_RCVBUF, rcvbuf)?;
		}

		let send_ucast_port = endpoint.info.udp_encap_ucast_port.unwrap_or(0);
		let send_family_v6 = endpoint.info.send_group.map(|g| g.group.is_ipv6()).unwrap_or(recv_family_v6);
		let send_bind_addr = SocketAddr::new(if send_family_v6 { IpAddr::V6(Ipv6Addr::UNSPECIFIED) } else { IpAddr::V4(Ipv4Addr::UNSPECIFIED) }, send_ucast_port);
		let send_socket = bind_reuseaddr(send_bind_addr)?;
		let send_ra_socket = bind_reuseaddr(send_bind_addr)?;
		configure_socket(&send_socket, endpoint.info.hops, endpoint.info.multicast_loop)?;
		configure_socket(&send_ra_socket, endpoint.info.hops, endpoint.info.multicast_loop)?;
		if let Some(sndbuf) = endpoint.info.sndbuf {
			set_buffer_size(&send_socket, libc::SO_SNDBUF, sndbuf)?;
			set_buffer_size(&send_ra_socket, libc::SO_SNDBUF, sndbuf)?;
		}

		let regulator = match endpoint.info.txw_capacity {
			Capacity::TimeRate { rate_bytes_per_sec, .. } => Some(Regulator::new(rate_bytes_per_sec, rate_bytes_per_sec)),
			Capacity::Sqns(_) => None,
		};
		let emitter = Arc::new(Emitter::new(send_socket, send_ra_socket, regulator));

		let send_group = endpoint.info.send_group.ok_or(Error::BadState("no send group configured"))?;
		let send_addr = SocketAddr::new(send_group.group, endpoint.info.udp_encap_mcast_port.unwrap_or(endpoint.info.dport));

		let (n, k) = endpoint.info.fec.map(|f| (f.n, f.k)).unwrap_or((fec::DEFAULT_N, fec::DEFAULT_K));
		let fec = endpoint.info.fec.map(|_| (n, k));

		let initial_sqn = rand::random::<u32>();
		let txw = Txw::create(self.tsi, endpoint.info.max_tpdu as usize, endpoint.info.txw_capacity, endpoint.info.fec.is_some(), n, k, initial_sqn)?;

		let rxw_capacity = match endpoint.info.txw_capacity {
			Capacity::Sqns(sqns) => sqns as usize,
			Capacity::TimeRate { secs, rate_bytes_per_sec } => ((secs * rate_bytes_per_sec as f64) / endpoint.info.max_tpdu as f64).ceil() as usize,
		};

		let now = Instant::now();
		let timers = Timers::new(now, endpoint.info.spm_ambient_interval, endpoint.info.spm_heartbeat_interval.clone());

		*self.txw.lock().unwrap() = Some(txw);
		*self.timers.lock().unwrap() = Some(timers);
		*self.bound.lock().unwrap() = Some(Bound { emitter, recv_socket: Arc::new(recv_socket), send_addr, rxw_capacity, fec });

		endpoint.phase = Phase::Bound;
		drop(endpoint);

		registry.register(self);

		for _ in 0..3 {
			self.send_spm()?;
		}
		if let Some(timers) = self.timers.lock().unwrap().as_mut() {
			timers.consume_ambient_burst(Instant::now());
		}

		Ok(())
	}

	/// Tears the endpoint down. If `flush` is set, blocks up to `FLUSH_WINDOW` waiting for the
	/// transmit window to drain (spec §9(a)): a bounded grace period, not an unconditional wait
	/// for every retained entry's lifetime to expire, since a stalled receiver must not hang
	/// `destroy` forever.
	pub fn destroy(self: &Arc<Self>, registry: &Registry, flush: bool) -> Result<()> {
		const FLUSH_WINDOW: Duration = Duration::from_millis(500);

		let mut endpoint = self.endpoint.lock().unwrap();
		if endpoint.phase == Phase::Destroyed {
			return Ok(());
		}

		if flush {
			drop(endpoint);
			let deadline = Instant::now() + FLUSH_WINDOW;
			while Instant::now() < deadline {
				let drained = self.txw.lock().unwrap().as_ref().map(|txw| txw.trail() == txw.lead()).unwrap_or(true);
				if drained {
					break;
				}
				std::thread::sleep(Duration::from_millis(10));
			}
			endpoint = self.endpoint.lock().unwrap();
		}

		endpoint.phase = Phase::Destroyed;
		drop(endpoint);

		if let Some(txw) = self.txw.lock().unwrap().as_mut() {
			txw.shutdown();
		}
		*self.bound.lock().unwrap() = None;
		registry.unregister(self);

		Ok(())
	}

	// -- send path --

	/// Fragments `apdu` across consecutive sqns if it exceeds one TPDU's payload capacity,
	/// retains every fragment in the transmit window for retransmission, and sends each over the
	/// wire (spec §4.2). A nonblocking send that cannot complete every fragment rolls the window
	/// back to its pre-send state rather than leaving a partial APDU retained (spec §8 property
	/// 3) — none of the rolled-back fragments reached the socket, since the rate regulator (or a
	/// transient socket error) rejected them before the syscall.
	pub fn send(&self, apdu: &[u8], nonblocking: bool) -> Result<usize> {
		if self.with_info(|i| i.recv_only) {
			return Err(Error::BadState("a recv_only transport cannot send"));
		}

		let bound = self.bound()?;
		let (dport, use_rate_limit, max_tpdu) = self.with_info(|i| (i.dport, true, i.max_tpdu as usize));

		let payload_len = max_tpdu.saturating_sub(DATA_OVERHEAD_ESTIMATE).max(1);
		let chunks: Vec<&[u8]> = if apdu.is_empty() { vec![&[][..]] } else { apdu.chunks(payload_len).collect() };

		let mut guard = self.txw.lock().unwrap();
		let txw = guard.as_mut().ok_or(Error::BadState("transport is not bound"))?;

		let k = bound.fec.map(|(_, k)| k).unwrap_or(1) as u32;
		let first_sqn = txw.lead().wrapping_add(1);

		txw.begin_apdu();
		let mut sqns = Vec::with_capacity(chunks.len());
		for chunk in &chunks {
			let sqn = txw.lead().wrapping_add(1);
			let tg_sqn = sqn - (sqn % k);
			sqns.push(txw.push(chunk.to_vec(), tg_sqn, false));
		}

		for (i, &sqn) in sqns.iter().enumerate() {
			let entry = txw.peek(sqn).expect("just pushed");
			let fragment = (sqns.len() > 1).then_some(Fragment { first_sqn, offset: (i * payload_len) as u32, apdu_length: apdu.len() as u32 });
			let parity = Parity { tg_sqn: bound.fec.map(|_| entry.tg_sqn), var_length: None };
			let buf = packet::encode_data(DataKind::Original, self.tsi, dport, entry.sqn, txw.trail(), fragment, parity, false, &entry.payload);

			if let Err(err) = bound.emitter.send_to(use_rate_limit, false, nonblocking, &buf, bound.send_addr) {
				txw.rollback_apdu();
				return Err(err);
			}
		}
		txw.commit_apdu();

		let last_sqn = *sqns.last().unwrap();
		let group_complete = bound.fec.is_some() && (last_sqn.wrapping_add(1) % k == 0);
		if group_complete {
			let tg_sqn = last_sqn - (last_sqn % k);
			self.emit_proactive_parity(&bound, txw, tg_sqn, dport, use_rate_limit, nonblocking)?;
		}

		drop(guard);

		if let Some(timers) = self.timers.lock().unwrap().as_mut() {
			timers.on_data_sent(Instant::now());
		}

		Ok(apdu.len())
	}

	fn emit_proactive_parity(&self, bound: &Bound, txw: &mut Txw, tg_sqn: u32, dport: u16, use_rate_limit: bool, nonblocking: bool) -> Result<()> {
		let proactive_h = self.with_info(|i| i.fec.map(|f| f.proactive_h).unwrap_or(0));

		for parity_index in 0..proactive_h {
			let symbol = txw.build_parity(tg_sqn, parity_index)?;
			let sqn = txw.push(symbol.clone(), tg_sqn, true);
			let buf = packet::encode_data(DataKind::Repair, self.tsi, dport, sqn, txw.trail(), None, Parity { tg_sqn: Some(tg_sqn), var_length: None }, true, &symbol);
			bound.emitter.send_to(use_rate_limit, false, nonblocking, &buf, bound.send_addr)?;
		}
		Ok(())
	}

	fn send_spm(&self) -> Result<()> {
		let bound = self.bound()?;
		let (dport, nla) = self.with_info(|i| (i.dport, i.send_group.map(|g| Nla::from(g.group)).unwrap_or(Nla::V4(Ipv4Addr::UNSPECIFIED))));

		let (trail, lead) = self.txw.lock().unwrap().as_ref().map(|w| (w.trail(), w.lead())).unwrap_or((0, 0));
		let sqn = self.spm_sqn.fetch_add(1, Ordering::Relaxed);

		let buf = packet::encode_spm(self.tsi, dport, sqn, trail, lead, nla);
		bound.emitter.send_to(false, false, false, &buf, bound.send_addr)?;

		if let Some(timers) = self.timers.lock().unwrap().as_mut() {
			timers.on_spm_sent();
		}
		Ok(())
	}

	// -- receive path --

	/// Reads and processes datagrams until a fully reassembled APDU is ready, servicing due
	/// timers while it waits. `timeout` bounds the whole call; `None` waits indefinitely unless
	/// the endpoint is configured nonblocking.
	pub fn recv(&self, timeout: Option<Duration>) -> Result<Vec<u8>> {
		let deadline = timeout.map(|t| Instant::now() + t);
		let nonblocking = self.with_info(|i| i.nonblocking);

		loop {
			let bound = self.bound()?;

			let wait = deadline.map(|d| d.saturating_duration_since(Instant::now())).or(Some(Duration::from_millis(200)));
			let ready = runtime::poll::wait_readable(&*bound.recv_socket, wait)?;

			if ready {
				let max_tpdu = self.with_info(|i| i.max_tpdu as usize);
				let mut buf = vec![0u8; max_tpdu];
				match bound.recv_socket.recv_from(&mut buf) {
					Ok((n, _from)) => {
						buf.truncate(n);
						if let Some(apdu) = self.on_datagram(Datagram::new(buf))? {
							return Ok(apdu);
						}
					}
					Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
					Err(err) => return Err(Error::from(err)),
				}
			}

			self.service_timers(&bound)?;

			if let Some(deadline) = deadline {
				if Instant::now() >= deadline {
					return Err(Error::WouldBlock);
				}
			} else if nonblocking && !ready {
				return Err(Error::WouldBlock);
			}
		}
	}

	fn on_datagram(&self, datagram: Datagram) -> Result<Option<Vec<u8>>> {
		let decoded = match packet::decode(datagram) {
			Ok(decoded) => decoded,
			Err(_) => return Ok(None),
		};

		match decoded.body {
			Body::Spm { .. } => {
				let peer = self.peers.get_or_insert(decoded.tsi, || self.make_peer(decoded.tsi));
				peer.lock().unwrap().touch();
				Ok(None)
			}
			Body::Data { sqn, fragment, parity, is_parity, payload, .. } => {
				let peer_handle = self.peers.get_or_insert(decoded.tsi, || self.make_peer(decoded.tsi));
				let mut peer = peer_handle.lock().unwrap();
				peer.touch();

				let tg_sqn = parity.tg_sqn.unwrap_or(sqn);
				peer.rxw.on_data(sqn, tg_sqn, payload.to_vec(), is_parity);
				peer.note_fragment(sqn, fragment);
				if let Some(timers) = self.timers.lock().unwrap().as_mut() {
					timers.disarm(decoded.tsi, sqn);
				}
				peer.rxw.try_recover_group(tg_sqn);

				for delivered in peer.rxw.drain() {
					if let Some(apdu) = peer.reassemble(delivered.sqn, delivered.payload) {
						return Ok(Some(apdu));
					}
				}
				Ok(None)
			}
			Body::Nak { kind: NakKind::Nak, sqn, .. } => {
				self.on_nak(sqn, decoded.dport)?;
				Ok(None)
			}
			Body::Nak { .. } | Body::Poll { .. } | Body::Polr { .. } => Ok(None),
		}
	}

	/// Answers a NAK by retransmitting the original payload when the transmit window still
	/// retains it. If it has already been evicted and on-demand parity is enabled, synthesizes a
	/// repair symbol for the sqn's parity group instead of leaving the NAK unanswered — the same
	/// construction `emit_proactive_parity` uses ahead of time, done lazily here.
	fn on_nak(&self, sqn: u32, dport: u16) -> Result<()> {
		let bound = self.bound()?;
		let use_rate_limit = true;

		let mut guard = self.txw.lock().unwrap();
		let txw = guard.as_mut().ok_or(Error::BadState("transport is not bound"))?;

		if let Some(buf) = txw.retransmit(dport, sqn) {
			bound.emitter.send_to(use_rate_limit, false, false, &buf, bound.send_addr)?;
			return Ok(());
		}

		let use_ondemand_parity = self.with_info(|i| i.fec.map(|f| f.use_ondemand_parity).unwrap_or(false));
		if !use_ondemand_parity {
			return Ok(());
		}
		let Some((_, k)) = bound.fec else { return Ok(()) };

		let tg_sqn = sqn - (sqn % k as u32);
		let Ok(symbol) = txw.build_parity(tg_sqn, 0) else { return Ok(()) };
		let repair_sqn = txw.push(symbol.clone(), tg_sqn, true);
		let repair_buf = packet::encode_data(DataKind::Repair, self.tsi, dport, repair_sqn, txw.trail(), None, Parity { tg_sqn: Some(tg_sqn), var_length: None }, true, &symbol);
		bound.emitter.send_to(use_rate_limit, false, false, &repair_buf, bound.send_addr)?;
		Ok(())
	}

	/// Generates NAKs for every sqn a peer's receive window still lists as `Missing`, and
	/// advances any NAK-resolution timeouts that have fired (spec §4.6).
	fn service_timers(&self, bound: &Bound) -> Result<()> {
		let now = Instant::now();
		let events = {
			let mut guard = self.timers.lock().unwrap();
			let Some(timers) = guard.as_mut() else { return Ok(()) };
			timers.poll(now)
		};

		for event in events {
			match event {
				crate::timer::Event::AmbientSpm | crate::timer::Event::HeartbeatSpm => {
					self.send_spm()?;
				}
				crate::timer::Event::NakTimeout(tsi, sqn, stage) => {
					self.on_nak_timeout(bound, tsi, sqn, stage, now)?;
				}
			}
		}

		if self.with_info(|i| i.passive) {
			return Ok(());
		}

		for peer in self.peers.enumerate() {
			let (tsi, missing) = {
				let p = peer.lock().unwrap();
				(p.tsi, p.rxw.missing())
			};
			for sqn in missing {
				{
					let mut p = peer.lock().unwrap();
					p.rxw.mark_nak_pending(sqn);
				}
				self.send_nak(bound, tsi, sqn)?;
				if let Some(timers) = self.timers.lock().unwrap().as_mut() {
					timers.arm_nak(tsi, sqn, NakTimeout::RdataWait, now, RDATA_WAIT);
				}
			}
		}

		Ok(())
	}

	fn send_nak(&self, bound: &Bound, tsi: Tsi, sqn: u32) -> Result<()> {
		let dport = self.with_info(|i| i.dport);
		let nla = self.with_info(|i| i.send_group.map(|g| Nla::from(g.group)).unwrap_or(Nla::V4(Ipv4Addr::UNSPECIFIED)));
		let buf = packet::encode_nak(NakKind::Nak, tsi, dport, sqn, nla, nla);
		bound.emitter.send_to(true, true, false, &buf, bound.send_addr)?;
		Ok(())
	}

	fn on_nak_timeout(&self, bound: &Bound, tsi: Tsi, sqn: u32, stage: NakTimeout, now: Instant) -> Result<()> {
		let Some(peer) = self.peers.get(&tsi) else { return Ok(()) };

		match stage {
			NakTimeout::RdataWait => {
				self.send_nak(bound, tsi, sqn)?;
				if let Some(timers) = self.timers.lock().unwrap().as_mut() {
					timers.arm_nak(tsi, sqn, NakTimeout::RepeatNakWait, now, REPEAT_NAK_WAIT + crate::timer::jitter(Duration::from_millis(100)));
				}
			}
			NakTimeout::RepeatNakWait => {
				if let Some(timers) = self.timers.lock().unwrap().as_mut() {
					timers.arm_nak(tsi, sqn, NakTimeout::NcfWait, now, NCF_WAIT);
				}
			}
			NakTimeout::NcfWait => {
				peer.lock().unwrap().rxw.mark_lost(sqn);
			}
		}
		Ok(())
	}

	fn make_peer(&self, tsi: Tsi) -> Peer {
		let (rxw_capacity, rs, k) = self
			.bound
			.lock()
			.unwrap()
			.as_ref()
			.map(|b| (b.rxw_capacity, b.fec.map(|(n, k)| Rs::new(n, k).ok()).flatten(), b.fec.map(|(_, k)| k).unwrap_or(1)))
			.unwrap_or((1024, None, 1));
		Peer::new(tsi, rxw_capacity, 0, rs, k)
	}
}

/// Binds a UDP socket with `SO_REUSEADDR` set beforehand, so more than one endpoint on this host
/// can bind the same multicast port (spec §6 "Socket options applied"). `std::net::UdpSocket` has
/// no pre-bind hook for this, hence the detour through `socket2`.
fn bind_reuseaddr(addr: SocketAddr) -> Result<UdpSocket> {
	let domain = if addr.is_ipv6() { socket2::Domain::IPV6 } else { socket2::Domain::IPV4 };
	let socket = socket2::Socket::new(domain, socket2::Type::DGRAM, None)?;
	socket.set_reuse_address(true)?;
	socket.bind(&addr.into())?;
	Ok(socket.into())
}

fn apply_membership(socket: &UdpSocket, gsr: GroupSourceRequest, join: bool) -> Result<()> {
	match gsr.group {
		IpAddr::V4(group) => {
			// `interface` carries a packed IPv4 address for this family (std's join_multicast_v4
			// wants a local address, not an index, unlike the IPv6 case below).
			let interface = gsr.interface.map(Ipv4Addr::from).unwrap_or(Ipv4Addr::UNSPECIFIED);
			if join {
				socket.join_multicast_v4(&group, &interface)?;
			} else {
				socket.leave_multicast_v4(&group, &interface)?;
			}
		}
		IpAddr::V6(group) => {
			let interface = gsr.interface.unwrap_or(0);
			if join {
				socket.join_multicast_v6(&group, interface)?;
			} else {
				socket.leave_multicast_v6(&group, interface)?;
			}
		}
	}
	Ok(())
}

#[cfg(unix)]
fn configure_socket(socket: &UdpSocket, hops: u8, multicast_loop: bool) -> Result<()> {
	use std::os::fd::AsRawFd;

	let family: &dyn SocketFamily = if matches!(socket.local_addr()?, SocketAddr::V6(_)) { &Ipv6Family } else { &Ipv4Family };
	let fd = socket.as_raw_fd();

	setsockopt_int(fd, family.hop_limit_option(), hops as libc::c_int)?;
	setsockopt_int(fd, family.loopback_option(), multicast_loop as libc::c_int)?;
	Ok(())
}

#[cfg(unix)]
fn setsockopt_int(fd: std::os::fd::RawFd, (level, name): (i32, i32), value: libc::c_int) -> Result<()> {
	let ret = unsafe { libc::setsockopt(fd, level, name, &value as *const _ as *const libc::c_void, std::mem::size_of::<libc::c_int>() as libc::socklen_t) };
	if ret != 0 {
		return Err(Error::System(std::io::Error::last_os_error()));
	}
	Ok(())
}

#[cfg(unix)]
fn set_buffer_size(socket: &UdpSocket, name: libc::c_int, bytes: usize) -> Result<()> {
	use std::os::fd::AsRawFd;
	setsockopt_int(socket.as_raw_fd(), (libc::SOL_SOCKET, name), bytes as libc::c_int)
}

/// Source-specific multicast filtering (`IP_BLOCK_SOURCE`/`IP_UNBLOCK_SOURCE`), IPv4 only — the
/// IPv6 equivalent (`MCAST_BLOCK_SOURCE` on a `group_source_req`) is not implemented (`DESIGN.md`).
#[cfg(target_os = "linux")]
fn set_source_filter(socket: &UdpSocket, group: IpAddr, source: IpAddr, interface: Option<u32>, block: bool) -> Result<()> {
	use std::os::fd::AsRawFd;

	let (IpAddr::V4(group), IpAddr::V4(source)) = (group, source) else {
		return Err(Error::InvalidArgument("source filtering is only implemented for IPv4".into()));
	};

	let mreq = libc::ip_mreq_source {
		imr_multiaddr: libc::in_addr { s_addr: u32::from_ne_bytes(group.octets()) },
		imr_sourceaddr: libc::in_addr { s_addr: u32::from_ne_bytes(source.octets()) },
		imr_interface: libc::in_addr { s_addr: interface.unwrap_or(0) },
	};

	let name = if block { libc::IP_BLOCK_SOURCE } else { libc::IP_UNBLOCK_SOURCE };
	let ret = unsafe {
		libc::setsockopt(
			socket.as_raw_fd(),
			libc::IPPROTO_IP,
			name,
			&mreq as *const _ as *const libc::c_void,
			std::mem::size_of::<libc::ip_mreq_source>() as libc::socklen_t,
		)
	};
	if ret != 0 {
		return Err(Error::System(std::io::Error::last_os_error()));
	}
	Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_source_filter(_socket: &UdpSocket, _group: IpAddr, _source: IpAddr, _interface: Option<u32>, _block: bool) -> Result<()> {
	Err(Error::InvalidArgument("source filtering is only implemented on Linux".into()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::resolver::StaticResolver;
	use std::net::Ipv4Addr;

	fn tsi() -> Tsi {
		Tsi::new([1, 2, 3, 4, 5, 6], 7500)
	}

	fn loopback_info() -> TransportInfo {
		let mut info = TransportInfo::new(tsi(), 0);
		info.send_group = Some(GroupSourceRequest { group: IpAddr::V4(Ipv4Addr::new(239, 255, 0, 1)), source: None, interface: None });
		info.recv_groups.push(GroupSourceRequest { group: IpAddr::V4(Ipv4Addr::new(239, 255, 0, 1)), source: None, interface: None });
		info.multicast_loop = true;
		info.txw_capacity = Capacity::Sqns(64);
		info
	}

	#[test]
	fn configuration_is_rejected_once_bound() {
		let transport = Transport::create(loopback_info(), Box::new(StaticResolver::new())).unwrap();
		transport.endpoint.lock().unwrap().phase = Phase::Bound;
		assert!(matches!(transport.set_hops(5), Err(Error::BadState(_))));
	}

	#[test]
	fn leave_group_rejects_when_nothing_is_joined() {
		let mut info = loopback_info();
		info.recv_groups.clear();
		let transport = Transport::create(info, Box::new(StaticResolver::new())).unwrap();

		let gsr = GroupSourceRequest { group: IpAddr::V4(Ipv4Addr::new(239, 255, 0, 1)), source: None, interface: None };
		assert!(transport.leave_group(gsr).is_err());
	}

	#[test]
	fn send_before_bind_fails_with_bad_state() {
		let transport = Transport::create(loopback_info(), Box::new(StaticResolver::new())).unwrap();
		assert!(matches!(transport.send(b"hello", false), Err(Error::BadState(_))));
	}

	#[test]
	fn set_recv_only_marks_passive_and_send_is_then_rejected() {
		let transport = Transport::create(loopback_info(), Box::new(StaticResolver::new())).unwrap();
		transport.set_recv_only(true).unwrap();

		assert!(transport.with_info(|i| i.recv_only && i.passive));
		assert!(matches!(transport.send(b"hello", false), Err(Error::BadState(_))));
	}

	/// A passive receiver must never NAK, even when its receive window has gaps (spec §6).
	#[test]
	fn passive_receiver_never_naks_a_missing_sqn() {
		let transport = Transport::create(loopback_info(), Box::new(StaticResolver::new())).unwrap();
		transport.set_recv_only(true).unwrap();

		let peer_tsi = Tsi::new([9, 2, 3, 4, 5, 6], 7500);
		let peer = transport.peers.get_or_insert(peer_tsi, || Peer::new(peer_tsi, 64, 0, None, 1));
		peer.lock().unwrap().rxw.on_data(5, 5, b"payload".to_vec(), false);
		assert!(!peer.lock().unwrap().rxw.missing().is_empty(), "sqns 0-4 must be Missing ahead of the received sqn 5");

		let probe = UdpSocket::bind("127.0.0.1:0").unwrap();
		let send_addr = probe.local_addr().unwrap();
		probe.set_read_timeout(Some(Duration::from_millis(50))).unwrap();

		let emitter = Arc::new(Emitter::new(UdpSocket::bind("127.0.0.1:0").unwrap(), UdpSocket::bind("127.0.0.1:0").unwrap(), None));
		let bound = Bound { emitter, recv_socket: Arc::new(UdpSocket::bind("127.0.0.1:0").unwrap()), send_addr, rxw_capacity: 64, fec: None };
		*transport.bound.lock().unwrap() = Some(bound.clone());
		let now = Instant::now();
		let mut timers = Timers::new(now, Duration::from_secs(30), vec![]);
		timers.consume_ambient_burst(now);
		*transport.timers.lock().unwrap() = Some(timers);

		transport.service_timers(&bound).unwrap();

		let mut buf = [0u8; 64];
		assert!(probe.recv_from(&mut buf).is_err(), "a passive receiver must not emit any NAK");
	}

	#[test]
	fn joining_the_same_group_twice_is_rejected_and_list_is_unchanged() {
		let transport = Transport::create(loopback_info(), Box::new(StaticResolver::new())).unwrap();
		let gsr = GroupSourceRequest { group: IpAddr::V4(Ipv4Addr::new(239, 192, 0, 1)), source: None, interface: None };

		transport.join_group(gsr).unwrap();
		let len_before = transport.endpoint.lock().unwrap().info.recv_groups.len();

		assert!(matches!(transport.join_group(gsr), Err(Error::InvalidArgument(_))));
		assert_eq!(transport.endpoint.lock().unwrap().info.recv_groups.len(), len_before);
	}
}
