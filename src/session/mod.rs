//! Per-peer protocol state: a sender half, a receiver half, or both.

use crate::{
    cfg::Config,
    event::{EventLoop, TimerHandle},
    pkt::{RudpPacket, SeqNo},
    socket::{IoContext, SocketHandle, Tap},
};
use std::net::{SocketAddr, SocketAddrV4};

mod receiver;
mod sender;

pub(crate) use receiver::ReceiverHalf;
pub(crate) use sender::{AckOutcome, SenderHalf};

/// What a retransmission timer guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    Syn,
    Fin,
    Data(SeqNo),
}

/// Timer payload routed back into the engine by the event loop.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Timeout {
    pub(crate) sock: SocketHandle,
    pub(crate) peer: SocketAddrV4,
    pub(crate) kind: TimerKind,
}

/// Transmit and timer services for one (socket, peer) pair, borrowed for the
/// duration of a single engine step.
pub(crate) struct Io<'a> {
    pub(crate) events: &'a mut EventLoop<IoContext>,
    pub(crate) udp: &'a mio::net::UdpSocket,
    pub(crate) sock: SocketHandle,
    pub(crate) peer: SocketAddrV4,
    pub(crate) cfg: &'a Config,
    pub(crate) tap: &'a mut Tap,
}

impl Io<'_> {
    /// Sends a packet to the peer. A failed UDP send is logged and otherwise
    /// ignored; retransmission covers the loss.
    pub(crate) fn transmit(&mut self, pkt: &RudpPacket) {
        tracing::trace!(
            "{} tx {} seq={} ({} bytes) to {}",
            self.sock,
            pkt.typ,
            pkt.seq_no,
            pkt.content.len(),
            self.peer
        );
        if self.tap.drops(pkt, self.peer) {
            return;
        }
        let bytes = match pkt.to_vec() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("{} failed to encode {}: {}", self.sock, pkt.typ, e);
                return;
            }
        };
        if let Err(e) = self.udp.send_to(&bytes, SocketAddr::V4(self.peer)) {
            tracing::warn!("{} failed to send {} to {}: {}", self.sock, pkt.typ, self.peer, e);
        }
    }

    /// Arms a retransmission timer for this peer.
    pub(crate) fn schedule(&mut self, kind: TimerKind) -> TimerHandle {
        self.events.schedule_in(
            self.cfg.retransmit_timeout,
            Timeout {
                sock: self.sock,
                peer: self.peer,
                kind,
            },
        )
    }

    pub(crate) fn cancel(&mut self, timer: TimerHandle) {
        self.events.cancel(timer);
    }
}

/// The pair of half-state-machines for one (socket, peer) pair. Either half
/// may be absent: the sender half is created by the first user send, the
/// receiver half on receipt of a SYN.
pub(crate) struct Session {
    pub(crate) sender: Option<SenderHalf>,
    pub(crate) receiver: Option<ReceiverHalf>,
}

impl Session {
    pub(crate) fn new() -> Session {
        Session {
            sender: None,
            receiver: None,
        }
    }

    /// Both halves (where present) have reached their terminal state.
    pub(crate) fn is_done(&self) -> bool {
        self.sender.as_ref().map_or(true, SenderHalf::is_finished)
            && self.receiver.as_ref().map_or(true, |receiver| receiver.finished)
    }

    /// Must run before the session is dropped; a timer firing for a dead
    /// session would otherwise dangle.
    pub(crate) fn cancel_timers(&mut self, events: &mut EventLoop<IoContext>) {
        if let Some(sender) = &mut self.sender {
            sender.cancel_timers(events);
        }
    }
}
