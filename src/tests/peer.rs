use super::{deliver_into, peer_addr, quick, record_events, SharedLog};
use crate::{PacketType, Rudp, RudpPacket, SeqNo};
use std::{
    net::{SocketAddr, SocketAddrV4, UdpSocket},
    time::{Duration, Instant},
};

/// A scripted remote endpoint speaking raw RUDP over a std socket.
struct FakePeer {
    udp: UdpSocket,
    target: SocketAddrV4,
}

impl FakePeer {
    fn new(target: SocketAddrV4) -> FakePeer {
        let udp = UdpSocket::bind("127.0.0.1:0").unwrap();
        udp.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        FakePeer { udp, target }
    }

    fn send(&self, pkt: RudpPacket) {
        self.udp.send_to(&pkt.to_vec().unwrap(), self.target).unwrap();
    }

    fn expect(&self) -> RudpPacket {
        let mut buf = [0u8; 1100];
        let (n, _) = self.udp.recv_from(&mut buf).expect("expected a packet");
        RudpPacket::from_slice(&buf[..n]).unwrap()
    }

    fn expect_silence(&self) {
        let mut buf = [0u8; 1100];
        self.udp
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let silent = self.udp.recv_from(&mut buf).is_err();
        self.udp
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        assert!(silent, "expected no packet");
    }
}

/// Runs the reactor for `duration` so scripted traffic gets processed.
fn drive(rudp: &mut Rudp, duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        rudp.turn(Duration::from_millis(5)).unwrap();
    }
}

#[test]
fn late_and_duplicate_data_is_acked_but_not_redelivered() {
    let log: SharedLog = Default::default();
    let mut rudp = Rudp::new(quick()).unwrap();
    let rcv = rudp.socket(0).unwrap();
    deliver_into(&mut rudp, rcv, &log, None);

    let peer = FakePeer::new(peer_addr(&rudp, rcv));

    peer.send(RudpPacket::syn(SeqNo(100)));
    drive(&mut rudp, Duration::from_millis(20));
    assert_eq!(peer.expect(), RudpPacket::ack(SeqNo(101)));

    peer.send(RudpPacket::data(SeqNo(101), b"one".to_vec()));
    drive(&mut rudp, Duration::from_millis(20));
    assert_eq!(peer.expect(), RudpPacket::ack(SeqNo(102)));

    peer.send(RudpPacket::data(SeqNo(102), b"two".to_vec()));
    drive(&mut rudp, Duration::from_millis(20));
    assert_eq!(peer.expect(), RudpPacket::ack(SeqNo(103)));

    // retransmission of the newest delivered datagram: re-acked, not
    // re-delivered
    peer.send(RudpPacket::data(SeqNo(102), b"two".to_vec()));
    drive(&mut rudp, Duration::from_millis(20));
    assert_eq!(peer.expect(), RudpPacket::ack(SeqNo(103)));

    // expected - window - 1 is outside the re-ack range: dropped outright
    peer.send(RudpPacket::data(SeqNo(99), b"stale".to_vec()));
    drive(&mut rudp, Duration::from_millis(20));
    peer.expect_silence();

    assert_eq!(
        log.borrow().payloads_for(rcv),
        [b"one".to_vec(), b"two".to_vec()]
    );
}

#[test]
fn duplicate_syn_and_fin_are_idempotent() {
    let log: SharedLog = Default::default();
    let mut rudp = Rudp::new(quick()).unwrap();
    let rcv = rudp.socket(0).unwrap();
    deliver_into(&mut rudp, rcv, &log, None);

    let peer = FakePeer::new(peer_addr(&rudp, rcv));

    // duplicate SYN while still opening: re-acked
    peer.send(RudpPacket::syn(SeqNo(500)));
    drive(&mut rudp, Duration::from_millis(20));
    assert_eq!(peer.expect(), RudpPacket::ack(SeqNo(501)));
    peer.send(RudpPacket::syn(SeqNo(500)));
    drive(&mut rudp, Duration::from_millis(20));
    assert_eq!(peer.expect(), RudpPacket::ack(SeqNo(501)));

    peer.send(RudpPacket::data(SeqNo(501), b"payload".to_vec()));
    drive(&mut rudp, Duration::from_millis(20));
    assert_eq!(peer.expect(), RudpPacket::ack(SeqNo(502)));

    // a late SYN must not reset an open session
    peer.send(RudpPacket::syn(SeqNo(500)));
    drive(&mut rudp, Duration::from_millis(20));
    peer.expect_silence();

    // FIN acked, duplicate FIN re-acked, nothing re-delivered
    peer.send(RudpPacket::fin(SeqNo(502)));
    drive(&mut rudp, Duration::from_millis(20));
    assert_eq!(peer.expect(), RudpPacket::ack(SeqNo(503)));
    peer.send(RudpPacket::fin(SeqNo(502)));
    drive(&mut rudp, Duration::from_millis(20));
    assert_eq!(peer.expect(), RudpPacket::ack(SeqNo(503)));

    assert_eq!(log.borrow().payloads_for(rcv), [b"payload".to_vec()]);
}

#[test]
fn duplicate_and_stale_acks_are_ignored() {
    let log: SharedLog = Default::default();
    let mut rudp = Rudp::new(quick()).unwrap();
    let snd = rudp.socket(0).unwrap();
    record_events(&mut rudp, snd, &log);

    let peer = FakePeer::new(peer_addr(&rudp, snd));
    let SocketAddr::V4(peer_v4) = peer.udp.local_addr().unwrap() else {
        unreachable!()
    };

    rudp.send_to(snd, b"x", peer_v4).unwrap();
    let syn = peer.expect();
    assert_eq!(syn.typ, PacketType::Syn);
    let iss = syn.seq_no;

    // stale ACK before the handshake ack: ignored
    peer.send(RudpPacket::ack(iss));
    peer.send(RudpPacket::ack(iss.next()));
    drive(&mut rudp, Duration::from_millis(20));

    let data = peer.expect();
    assert_eq!(data, RudpPacket::data(iss.next(), b"x".to_vec()));

    peer.send(RudpPacket::ack(data.seq_no.next()));
    // duplicate DATA ack: ignored, nothing else transmitted
    peer.send(RudpPacket::ack(data.seq_no.next()));
    drive(&mut rudp, Duration::from_millis(20));
    peer.expect_silence();

    // close twice; the request is idempotent
    rudp.close(snd).unwrap();
    rudp.close(snd).unwrap();
    drive(&mut rudp, Duration::from_millis(20));

    let fin = peer.expect();
    assert_eq!(fin, RudpPacket::fin(data.seq_no.next()));
    peer.send(RudpPacket::ack(fin.seq_no.next()));
    drive(&mut rudp, Duration::from_millis(20));

    assert_eq!(
        log.borrow().events_for(snd),
        [(crate::RudpEvent::Closed, peer_v4)]
    );
}
