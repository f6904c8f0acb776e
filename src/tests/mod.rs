//! End-to-end scenarios over real loopback sockets, driven by one reactor.

use crate::{Config, Rudp, RudpEvent, SocketHandle};
use std::{
    cell::RefCell,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    rc::Rc,
    time::Duration,
};

mod loss;
mod peer;

/// Shrunk retransmission delay so loss scenarios settle in milliseconds.
fn quick() -> Config {
    Config {
        retransmit_timeout: Duration::from_millis(40),
        ..Config::default()
    }
}

/// The loopback address a peer must use to reach `sock`.
fn peer_addr(rudp: &Rudp, sock: SocketHandle) -> SocketAddrV4 {
    let SocketAddr::V4(addr) = rudp.local_addr(sock).unwrap() else {
        panic!("rudp sockets are v4");
    };
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, addr.port())
}

#[derive(Default)]
struct Log {
    delivered: Vec<(SocketHandle, SocketAddrV4, Vec<u8>)>,
    events: Vec<(SocketHandle, RudpEvent, SocketAddrV4)>,
}

impl Log {
    fn payloads_for(&self, sock: SocketHandle) -> Vec<Vec<u8>> {
        self.delivered
            .iter()
            .filter(|(s, _, _)| *s == sock)
            .map(|(_, _, data)| data.clone())
            .collect()
    }

    fn events_for(&self, sock: SocketHandle) -> Vec<(RudpEvent, SocketAddrV4)> {
        self.events
            .iter()
            .filter(|(s, _, _)| *s == sock)
            .map(|(_, event, peer)| (*event, *peer))
            .collect()
    }
}

type SharedLog = Rc<RefCell<Log>>;

/// Records every delivery; closes the socket after `close_after` datagrams.
fn deliver_into(rudp: &mut Rudp, sock: SocketHandle, log: &SharedLog, close_after: Option<usize>) {
    let log = log.clone();
    rudp.set_recv_handler(
        sock,
        Box::new(move |handle, sock, peer, data| {
            let mut log = log.borrow_mut();
            log.delivered.push((sock, peer, data.to_vec()));
            let seen = log
                .delivered
                .iter()
                .filter(|(s, _, _)| *s == sock)
                .count();
            drop(log);
            if Some(seen) == close_after {
                handle.close(sock)?;
            }
            Ok(())
        }),
    )
    .unwrap();
}

fn record_events(rudp: &mut Rudp, sock: SocketHandle, log: &SharedLog) {
    let log = log.clone();
    rudp.set_event_handler(
        sock,
        Box::new(move |_handle, sock, event, peer| {
            log.borrow_mut().events.push((sock, event, peer));
            Ok(())
        }),
    )
    .unwrap();
}
