//! Reliable UDP (RUDP): a connection-oriented, reliable, ordered datagram
//! service on top of UDP.
//!
//! The crate provides socket-like handles, a send primitive for discrete
//! datagrams and callback-based delivery of received datagrams and lifecycle
//! events. Reliability comes from sequence numbers, cumulative
//! acknowledgments over a fixed-size sliding window and time-based
//! retransmission with a bounded retry count.
//!
//! All state lives in a single [`Rudp`] value that the application owns and
//! drives from one thread:
//!
//! ```no_run
//! use rudp::{Config, Rudp};
//! use std::net::SocketAddrV4;
//!
//! let mut rudp = Rudp::new(Config::default())?;
//! let sock = rudp.socket(0)?;
//! rudp.set_recv_handler(sock, Box::new(|_rudp, sock, peer, data| {
//!     println!("{sock}: {} bytes from {peer}", data.len());
//!     Ok(())
//! }))?;
//!
//! let peer: SocketAddrV4 = "127.0.0.1:9000".parse().unwrap();
//! rudp.send_to(sock, b"hello", peer)?;
//! rudp.close(sock)?;
//! rudp.run()?;
//! # std::io::Result::Ok(())
//! ```

mod cfg;
mod event;
mod pkt;
mod session;
mod socket;

pub use cfg::Config;
pub use pkt::{PacketType, RudpPacket, SeqNo, MAX_PAYLOAD, RUDP_VERSION};
pub use socket::{EventHandler, RecvHandler, Rudp, RudpEvent, RudpHandle, SocketHandle};

#[cfg(test)]
mod tests;
