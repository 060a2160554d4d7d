//! PGM wire codec: encodes and decodes the tagged packet variants of spec §6 (`SPM`, `ODATA`,
//! `RDATA`, `NAK`, `NCF`, `POLL`, `POLR`) plus their option chains (`opt_length`, `opt_fragment`,
//! `opt_parity`, `opt_var_pktlen`).
//!
//! Fixed-layout parts are `#[repr(C, packed)]` structs cast directly over the wire bytes (see
//! [`utils::bytes::Cast`]); the network-layer address and option chain are variable-length and are
//! assembled/parsed with a [`collections::bytes::Cursor`]/[`collections::bytes::Packet`] instead.

pub mod data;
pub mod header;
pub mod nak;
pub mod nla;
pub mod options;
pub mod poll;
pub mod spm;

pub use data::Data;
pub use header::{Header, Options as HeaderOptions, Type, HEADER_LEN};
pub use nak::Nak;
pub use nla::Nla;
pub use poll::{Poll, PollBackoff, Polr};
pub use spm::Spm;

use collections::bytes::{Cursor, Packet as Datagram};
use utils::bytes::Cast;
use utils::endian::U16Be;

use crate::checksum;
use crate::error::{Error, Result};
use crate::tsi::Tsi;

use options::{OptFragment, OptHeader, OptLength, OptParityGrp, OptVarPktlen};

/// The checksum field's byte offset within `Header` — fixed by field order, asserted by a test.
const CHECKSUM_OFFSET: usize = 6;

/// APDU reassembly metadata parsed from an `opt_fragment` entry.
#[derive(Clone, Copy, Debug)]
pub struct Fragment {
	pub first_sqn: u32,
	pub offset: u32,
	pub apdu_length: u32,
}

/// FEC metadata parsed from `opt_parity_grp`/`opt_var_pktlen` entries.
#[derive(Clone, Copy, Debug, Default)]
pub struct Parity {
	pub tg_sqn: Option<u32>,
	pub var_length: Option<u16>,
}

impl Parity {
	fn is_empty(self) -> bool {
		self.tg_sqn.is_none() && self.var_length.is_none()
	}
}

/// Distinguishes ODATA from RDATA; both share the same fixed payload layout.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DataKind {
	Original,
	Repair,
}

/// Distinguishes NAK/NNAK/NCF; all three share the same fixed payload layout.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NakKind {
	Nak,
	Nnak,
	Ncf,
}

/// A decoded PGM packet body, tagged by type (design note §9: "replace inheritance/union tricks
/// in the codec with a tagged sum").
pub enum Body {
	Spm { sqn: u32, trail: u32, lead: u32, nla: Nla },
	Data { kind: DataKind, sqn: u32, trail: u32, fragment: Option<Fragment>, parity: Parity, is_parity: bool, payload: Datagram },
	Nak { kind: NakKind, sqn: u32, src_nla: Nla, grp_nla: Nla },
	Poll { sqn: u32, round: u16, s_type: u16, nla: Nla, bo_ivl: u32, rand: u32, mask: u32 },
	Polr { sqn: u32, round: u16 },
}

/// A fully decoded packet: the common header's addressing fields plus its tagged body.
pub struct Decoded {
	pub tsi: Tsi,
	pub dport: u16,
	pub body: Body,
}

/// Allocates a send buffer of `capacity` bytes, runs `f` to lay out the packet, then patches in
/// the checksum.
fn assemble(capacity: usize, f: impl FnOnce(Cursor) -> Cursor) -> Vec<u8> {
	let mut vec = vec![0u8; capacity];
	Cursor::vec(&mut vec, f);

	let csum = checksum::compute(&vec);
	vec[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&csum);

	vec
}

fn header(tsi: Tsi, dport: u16, kind: Type, has_options: bool, tsdu_length: u16) -> Header {
	header_with_flags(tsi, dport, kind, has_options, false, tsdu_length)
}

/// Like [`header`], but also sets the options octet's network-significant bit — repurposed here
/// to flag a data packet's TSDU as an FEC parity symbol rather than original/repaired content
/// (spec §4.5: a receiver must tell parity and data apart before it decides whether to deliver).
fn header_with_flags(tsi: Tsi, dport: u16, kind: Type, has_options: bool, is_parity: bool, tsdu_length: u16) -> Header {
	Header {
		sport: tsi.port().into(),
		dport: dport.into(),
		kind,
		options: HeaderOptions::NONE.with_present(has_options).with_network_significant(is_parity),
		checksum: [0, 0],
		gsi: tsi.gsi(),
		tsdu_length: tsdu_length.into(),
	}
}

pub fn encode_spm(tsi: Tsi, dport: u16, sqn: u32, trail: u32, lead: u32, nla: Nla) -> Vec<u8> {
	assemble(HEADER_LEN + std::mem::size_of::<Spm>() + 24, |cursor| {
		let cursor = cursor.push(&header(tsi, dport, Type::SPM, false, 0));
		let cursor = cursor.push(&Spm { sqn: sqn.into(), trail: trail.into(), lead: lead.into() });
		nla.write(cursor)
	})
}

#[allow(clippy::too_many_arguments)]
pub fn encode_data(
	kind: DataKind,
	tsi: Tsi,
	dport: u16,
	sqn: u32,
	trail: u32,
	fragment: Option<Fragment>,
	parity: Parity,
	is_parity: bool,
	payload: &[u8],
) -> Vec<u8> {
	let has_options = fragment.is_some() || !parity.is_empty();
	let capacity = HEADER_LEN + std::mem::size_of::<Data>() + 64 + payload.len();

	assemble(capacity, |mut cursor| {
		let wire_kind = match kind {
			DataKind::Original => Type::ODATA,
			DataKind::Repair => Type::RDATA,
		};

		cursor = cursor.push(&header_with_flags(tsi, dport, wire_kind, has_options, is_parity, payload.len() as u16));
		cursor = cursor.push(&Data { sqn: sqn.into(), trail: trail.into() });

		if has_options {
			// opt_length's total covers itself plus every subsequent option TLV.
			let mut total = OptLength::LEN;

			if fragment.is_some() {
				total += std::mem::size_of::<OptHeader>() + std::mem::size_of::<OptFragment>();
			}
			if let Some(tg_sqn) = parity.tg_sqn {
				total += std::mem::size_of::<OptHeader>() + std::mem::size_of::<OptParityGrp>();
				let _ = tg_sqn;
			}
			if let Some(len) = parity.var_length {
				total += std::mem::size_of::<OptHeader>() + 2 + 1;
				let _ = len;
			}

			cursor = cursor.push(&OptLength::new(total as u16));

			let last_is_var_len = parity.var_length.is_some();
			let last_is_parity = parity.tg_sqn.is_some() && !last_is_var_len;

			if let Some(frag) = fragment {
				let last = !last_is_parity && !last_is_var_len;
				cursor = cursor.push(&OptHeader::new(options::OPT_FRAGMENT, std::mem::size_of::<OptFragment>() as u8, last));
				cursor = cursor.push(&OptFragment { reserved: 0, first_sqn: frag.first_sqn.into(), fragment_offset: frag.offset.into(), apdu_length: frag.apdu_length.into() });
			}

			if let Some(tg_sqn) = parity.tg_sqn {
				cursor = cursor.push(&OptHeader::new(options::OPT_PARITY_GRP, std::mem::size_of::<OptParityGrp>() as u8, !last_is_var_len));
				cursor = cursor.push(&OptParityGrp { reserved: 0, tg_sqn: tg_sqn.into() });
			}

			if let Some(len) = parity.var_length {
				cursor = cursor.push(&OptHeader::new(options::OPT_VAR_PKTLEN, 3, true));
				cursor = cursor.push(&options::OptVarPktlen { reserved: 0, data_bytes: len.into() });
			}
		}

		cursor.push(payload)
	})
}

pub fn encode_nak(kind: NakKind, tsi: Tsi, dport: u16, sqn: u32, src_nla: Nla, grp_nla: Nla) -> Vec<u8> {
	let wire_kind = match kind {
		NakKind::Nak => Type::NAK,
		NakKind::Nnak => Type::NNAK,
		NakKind::Ncf => Type::NCF,
	};

	assemble(HEADER_LEN + std::mem::size_of::<Nak>() + 48, |cursor| {
		let cursor = cursor.push(&header(tsi, dport, wire_kind, false, 0));
		let cursor = cursor.push(&Nak { sqn: sqn.into() });
		let cursor = src_nla.write(cursor);
		grp_nla.write(cursor)
	})
}

#[allow(clippy::too_many_arguments)]
pub fn encode_poll(tsi: Tsi, dport: u16, sqn: u32, round: u16, s_type: u16, nla: Nla, bo_ivl: u32, rand: u32, mask: u32) -> Vec<u8> {
	assemble(HEADER_LEN + std::mem::size_of::<Poll>() + std::mem::size_of::<PollBackoff>() + 24, |cursor| {
		let cursor = cursor.push(&header(tsi, dport, Type::POLL, false, 0));
		let cursor = cursor.push(&Poll { sqn: sqn.into(), round: round.into(), s_type: s_type.into() });
		let cursor = nla.write(cursor);
		cursor.push(&PollBackoff { bo_ivl: bo_ivl.into(), rand: rand.into(), mask: mask.into() })
	})
}

pub fn encode_polr(tsi: Tsi, dport: u16, sqn: u32, round: u16) -> Vec<u8> {
	assemble(HEADER_LEN + std::mem::size_of::<Polr>(), |cursor| {
		let cursor = cursor.push(&header(tsi, dport, Type::POLR, false, 0));
		cursor.push(&Polr { sqn: sqn.into(), round: round.into(), reserved: U16Be::from(0u16) })
	})
}

/// Parses the option chain following a data packet's fixed part.
fn read_options(packet: &mut Datagram) -> Result<(Option<Fragment>, Parity)> {
	let opt_length = *packet.split::<OptLength>();
	if opt_length.opt_type != options::OPT_LENGTH {
		return Err(Error::Protocol("expected opt_length as the first option".into()));
	}

	let mut fragment = None;
	let mut parity = Parity::default();

	loop {
		let opt = *packet.split::<OptHeader>();

		match opt.kind() {
			options::OPT_FRAGMENT => {
				let body = *packet.split::<OptFragment>();
				fragment = Some(Fragment {
					first_sqn: body.first_sqn.get(),
					offset: body.fragment_offset.get(),
					apdu_length: body.apdu_length.get(),
				});
			}
			options::OPT_PARITY_GRP => {
				let body = *packet.split::<OptParityGrp>();
				parity.tg_sqn = Some(body.tg_sqn.get());
			}
			options::OPT_VAR_PKTLEN => {
				let body = *packet.split::<options::OptVarPktlen>();
				parity.var_length = Some(body.data_bytes.get());
			}
			options::OPT_PARITY_PRM => {
				// Transmission-group parameters are advisory for an established receiver; skip.
				let _ = packet.split::<options::OptParityPrm>();
			}
			other => return Err(Error::Protocol(format!("unsupported option type {other:#x}"))),
		}

		if opt.is_last() {
			break;
		}
	}

	Ok((fragment, parity))
}

/// Decodes a received datagram into a tagged [`Decoded`] packet, verifying its checksum first.
pub fn decode(mut datagram: Datagram) -> Result<Decoded> {
	if !checksum::verify(&datagram) {
		return Err(Error::Protocol("checksum mismatch".into()));
	}

	let header = *datagram.split::<Header>();
	let tsi = Tsi::new(header.gsi, header.sport.get());
	let dport = header.dport.get();
	let has_options = header.options.has_options();

	let body = match header.kind {
		Type::SPM => {
			let spm = *datagram.split::<Spm>();
			let nla = Nla::read(&mut datagram).ok_or_else(|| Error::Protocol("bad SPM nla afi".into()))?;
			Body::Spm { sqn: spm.sqn.get(), trail: spm.trail.get(), lead: spm.lead.get(), nla }
		}
		Type::ODATA | Type::RDATA => {
			let data = *datagram.split::<Data>();

			let (fragment, parity) = if has_options { read_options(&mut datagram)? } else { (None, Parity::default()) };

			Body::Data {
				kind: if header.kind == Type::ODATA { DataKind::Original } else { DataKind::Repair },
				sqn: data.sqn.get(),
				trail: data.trail.get(),
				fragment,
				parity,
				is_parity: header.options.has_network_significant_option(),
				payload: datagram,
			}
		}
		Type::NAK | Type::NNAK | Type::NCF => {
			let nak = *datagram.split::<Nak>();
			let src_nla = Nla::read(&mut datagram).ok_or_else(|| Error::Protocol("bad NAK source nla afi".into()))?;
			let grp_nla = Nla::read(&mut datagram).ok_or_else(|| Error::Protocol("bad NAK group nla afi".into()))?;

			let kind = match header.kind {
				Type::NAK => NakKind::Nak,
				Type::NNAK => NakKind::Nnak,
				_ => NakKind::Ncf,
			};

			Body::Nak { kind, sqn: nak.sqn.get(), src_nla, grp_nla }
		}
		Type::POLL => {
			let poll = *datagram.split::<Poll>();
			let nla = Nla::read(&mut datagram).ok_or_else(|| Error::Protocol("bad POLL nla afi".into()))?;
			let backoff = *datagram.split::<PollBackoff>();

			Body::Poll {
				sqn: poll.sqn.get(),
				round: poll.round.get(),
				s_type: poll.s_type.get(),
				nla,
				bo_ivl: backoff.bo_ivl.get(),
				rand: backoff.rand.get(),
				mask: backoff.mask.get(),
			}
		}
		Type::POLR => {
			let polr = *datagram.split::<Polr>();
			Body::Polr { sqn: polr.sqn.get(), round: polr.round.get() }
		}
		other => return Err(Error::Protocol(format!("unrecognized packet type {:#x}", other.0))),
	};

	Ok(Decoded { tsi, dport, body })
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::net::Ipv4Addr;

	fn tsi() -> Tsi {
		Tsi::new([1, 2, 3, 4, 5, 6], 7500)
	}

	#[test]
	fn checksum_field_offset_matches_header_layout() {
		let h = header(tsi(), 7500, Type::SPM, false, 0);
		let bytes = utils::bytes::as_slice::<u8, _>(&h);
		assert_eq!(&bytes[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2], &[0, 0]);
	}

	#[test]
	fn spm_round_trips() {
		let nla = Nla::V4(Ipv4Addr::new(239, 192, 0, 1));
		let buf = encode_spm(tsi(), 7500, 10, 1, 9, nla);

		let decoded = decode(Datagram::new(buf)).unwrap();
		assert_eq!(decoded.tsi, tsi());
		assert_eq!(decoded.dport, 7500);

		match decoded.body {
			Body::Spm { sqn, trail, lead, nla: got } => {
				assert_eq!((sqn, trail, lead), (10, 1, 9));
				assert_eq!(got, nla);
			}
			_ => panic!("expected Spm"),
		}
	}

	#[test]
	fn odata_round_trips_with_fragment_option() {
		let fragment = Fragment { first_sqn: 5, offset: 1000, apdu_length: 3000 };
		let buf = encode_data(DataKind::Original, tsi(), 7500, 5, 0, Some(fragment), Parity::default(), false, b"hello world");

		let decoded = decode(Datagram::new(buf)).unwrap();

		match decoded.body {
			Body::Data { kind, sqn, fragment: Some(f), payload, .. } => {
				assert_eq!(kind, DataKind::Original);
				assert_eq!(sqn, 5);
				assert_eq!(f.apdu_length, 3000);
				assert_eq!(&*payload, b"hello world".as_slice());
			}
			_ => panic!("expected Data with fragment"),
		}
	}

	#[test]
	fn rdata_round_trips_with_parity_group() {
		let parity = Parity { tg_sqn: Some(100), var_length: Some(42) };
		let buf = encode_data(DataKind::Repair, tsi(), 7500, 103, 0, None, parity, true, b"parity symbol bytes");

		let decoded = decode(Datagram::new(buf)).unwrap();

		match decoded.body {
			Body::Data { kind, parity: got, payload, .. } => {
				assert_eq!(kind, DataKind::Repair);
				assert_eq!(got.tg_sqn, Some(100));
				assert_eq!(got.var_length, Some(42));
				assert_eq!(&*payload, b"parity symbol bytes".as_slice());
			}
			_ => panic!("expected Data"),
		}
	}

	#[test]
	fn nak_round_trips() {
		let src = Nla::V4(Ipv4Addr::new(10, 0, 0, 1));
		let grp = Nla::V4(Ipv4Addr::new(239, 192, 0, 1));
		let buf = encode_nak(NakKind::Nak, tsi(), 7500, 77, src, grp);

		let decoded = decode(Datagram::new(buf)).unwrap();
		match decoded.body {
			Body::Nak { kind, sqn, src_nla, grp_nla } => {
				assert_eq!(kind, NakKind::Nak);
				assert_eq!(sqn, 77);
				assert_eq!(src_nla, src);
				assert_eq!(grp_nla, grp);
			}
			_ => panic!("expected Nak"),
		}
	}

	#[test]
	fn corrupted_packet_fails_checksum() {
		let buf = encode_spm(tsi(), 7500, 1, 0, 0, Nla::V4(Ipv4Addr::UNSPECIFIED));
		let mut corrupt = buf.clone();
		corrupt[10] ^= 0xff;

		assert!(decode(Datagram::new(corrupt)).is_err());
		assert!(decode(Datagram::new(buf)).is_ok());
	}
}
