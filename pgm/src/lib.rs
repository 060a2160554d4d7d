//! A PGM (Pragmatic General Multicast, RFC 3208) reliable multicast transport.

pub mod checksum;
pub mod error;
pub mod fec;
pub mod info;
pub mod net;
pub mod packet;
pub mod peer;
pub mod rate;
pub mod registry;
pub mod resolver;
pub mod rxw;
pub mod timer;
pub mod transport;
pub mod tsi;
pub mod txw;

pub use error::{Error, Result};
pub use info::TransportInfo;
pub use transport::Transport;
pub use tsi::Tsi;
