use super::Io;
use crate::pkt::{RudpPacket, SeqNo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReceiverState {
    Opening,
    Open,
}

impl ReceiverState {
    fn transition_to(&mut self, new: Self) {
        tracing::debug!("receiver {:?} -> {:?}", self, new);
        *self = new;
    }
}

/// The receiving side of a session.
///
/// Tracks the next in-order sequence number and re-acks duplicates within
/// one window behind it, so a retransmitted DATA whose ACK was lost still
/// lets the sender advance.
pub(crate) struct ReceiverHalf {
    state: ReceiverState,
    expected: SeqNo,
    /// The peer's FIN arrived and was acked.
    pub(crate) finished: bool,
}

impl ReceiverHalf {
    /// Created on the first SYN from a peer; acks it immediately.
    pub(crate) fn open(io: &mut Io<'_>, syn_seq: SeqNo) -> ReceiverHalf {
        let expected = syn_seq.next();
        io.transmit(&RudpPacket::ack(expected));
        ReceiverHalf {
            state: ReceiverState::Opening,
            expected,
            finished: false,
        }
    }

    pub(crate) fn on_syn(&mut self, io: &mut Io<'_>, seq: SeqNo) {
        match self.state {
            ReceiverState::Opening => {
                // expected has not advanced yet, so tracking the
                // retransmitted SYN is safe
                self.expected = seq.next();
                io.transmit(&RudpPacket::ack(self.expected));
            }
            ReceiverState::Open => {
                tracing::trace!("{} ignoring SYN on open session from {}", io.sock, io.peer);
            }
        }
    }

    /// Returns `true` when the payload must be delivered to the application.
    pub(crate) fn on_data(&mut self, io: &mut Io<'_>, seq: SeqNo, window: usize) -> bool {
        if self.state == ReceiverState::Opening && seq == self.expected {
            self.state.transition_to(ReceiverState::Open);
        }

        if seq == self.expected {
            self.expected = self.expected.next();
            io.transmit(&RudpPacket::ack(self.expected));
            true
        } else if seq.at_or_after(self.expected.back(window as u32)) && seq.before(self.expected) {
            // our ACK was lost; re-ack without re-delivering
            io.transmit(&RudpPacket::ack(seq.next()));
            false
        } else {
            tracing::trace!(
                "{} dropping out-of-window DATA seq={} from {} (expected {})",
                io.sock,
                seq,
                io.peer,
                self.expected
            );
            false
        }
    }

    /// Returns `true` when the FIN was acked and teardown may proceed.
    pub(crate) fn on_fin(&mut self, io: &mut Io<'_>, seq: SeqNo) -> bool {
        if self.state != ReceiverState::Open || seq != self.expected {
            tracing::trace!("{} dropping FIN seq={} from {}", io.sock, seq, io.peer);
            return false;
        }
        io.transmit(&RudpPacket::ack(seq.next()));
        self.finished = true;
        true
    }
}
