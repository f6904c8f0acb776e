use super::{deliver_into, peer_addr, quick, record_events, SharedLog};
use crate::{PacketType, Rudp, RudpEvent, SeqNo};
use serial_test::serial;
use std::{
    cell::RefCell,
    io::{Error, ErrorKind},
    rc::Rc,
};

#[test]
#[serial]
fn lost_ack_recovers_without_redelivery() {
    let log: SharedLog = Default::default();
    let mut rudp = Rudp::new(quick()).unwrap();

    let snd = rudp.socket(0).unwrap();
    let rcv = rudp.socket(0).unwrap();
    let rcv_peer = peer_addr(&rudp, rcv);

    deliver_into(&mut rudp, rcv, &log, Some(1));
    record_events(&mut rudp, snd, &log);
    record_events(&mut rudp, rcv, &log);

    // swallow the first ACK of the DATA packet and count DATA transmissions
    struct LossState {
        data_seq: Option<SeqNo>,
        data_txs: usize,
        dropped: bool,
    }
    let state = Rc::new(RefCell::new(LossState {
        data_seq: None,
        data_txs: 0,
        dropped: false,
    }));
    let tap_state = state.clone();
    rudp.set_tap(move |pkt, _to| {
        let mut state = tap_state.borrow_mut();
        match pkt.typ {
            PacketType::Data => {
                state.data_seq.get_or_insert(pkt.seq_no);
                state.data_txs += 1;
            }
            PacketType::Ack => {
                if !state.dropped && state.data_seq.map(SeqNo::next) == Some(pkt.seq_no) {
                    state.dropped = true;
                    return true;
                }
            }
            _ => {}
        }
        false
    });

    rudp.send_to(snd, b"hello", rcv_peer).unwrap();
    rudp.close(snd).unwrap();
    rudp.run().unwrap();

    let log = log.borrow();
    // delivered exactly once despite the retransmission
    assert_eq!(log.payloads_for(rcv), [b"hello".to_vec()]);
    assert_eq!(log.events_for(snd).len(), 1);
    assert_eq!(log.events_for(rcv).len(), 1);

    let state = state.borrow();
    assert!(state.dropped);
    assert_eq!(state.data_txs, 2);
}

#[test]
#[serial]
fn syn_timeout_after_exhausted_retries() {
    let mut rudp = Rudp::new(quick()).unwrap();
    let snd = rudp.socket(0).unwrap();

    let black_hole = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let std::net::SocketAddr::V4(peer) = black_hole.local_addr().unwrap() else {
        unreachable!()
    };

    let syn_txs = Rc::new(RefCell::new(0usize));
    let tap_txs = syn_txs.clone();
    rudp.set_tap(move |pkt, _to| {
        if pkt.typ == PacketType::Syn {
            *tap_txs.borrow_mut() += 1;
        }
        false
    });

    let expected_peer = peer;
    rudp.set_event_handler(
        snd,
        Box::new(move |_handle, _sock, event, peer| {
            assert_eq!(event, RudpEvent::Timeout);
            assert_eq!(peer, expected_peer);
            Err(Error::new(ErrorKind::TimedOut, "handshake gave up"))
        }),
    )
    .unwrap();

    rudp.send_to(snd, b"never arrives", peer).unwrap();
    let err = rudp.run().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TimedOut);

    // the first transmission plus max_retries retransmissions
    assert_eq!(*syn_txs.borrow(), quick().max_retries + 1);
}
