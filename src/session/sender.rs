use super::{Io, TimerKind};
use crate::{
    event::{EventLoop, TimerHandle},
    pkt::{RudpPacket, SeqNo},
    socket::IoContext,
};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SenderState {
    SynSent,
    Open,
    FinSent,
    Finished,
}

impl SenderState {
    fn transition_to(&mut self, new: Self) {
        tracing::debug!("sender {:?} -> {:?}", self, new);
        *self = new;
    }
}

/// A transmitted-but-unacknowledged DATA packet. The slot owns the packet
/// and the handle of the timer guarding it.
struct WindowSlot {
    pkt: RudpPacket,
    retries: usize,
    timer: TimerHandle,
}

/// How an incoming ACK was consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AckOutcome {
    /// Out-of-order, stale or unexpected; state unchanged.
    Ignored,
    /// The handshake completed or the window advanced.
    Advanced,
    /// Our FIN was acknowledged; the half is finished.
    FinAcked,
}

/// The sending side of a session.
///
/// Outgoing datagrams pass through a FIFO queue into the sliding window:
/// a datagram is transmitted the moment it enters a window slot, and slots
/// free up strictly left-to-right as cumulative ACKs arrive. The window is
/// kept as a deque so slot 0 is always the oldest outstanding packet.
pub(crate) struct SenderHalf {
    state: SenderState,
    /// Sequence number of the most recently assigned packet.
    seq: SeqNo,
    window: VecDeque<WindowSlot>,
    queue: VecDeque<Vec<u8>>,
    syn_retries: usize,
    fin_retries: usize,
    syn_timer: Option<TimerHandle>,
    fin_timer: Option<TimerHandle>,
}

impl SenderHalf {
    /// Creates the half for a first user send: queues the datagram and
    /// transmits `SYN(iss)`.
    pub(crate) fn open(io: &mut Io<'_>, iss: SeqNo, data: Vec<u8>) -> SenderHalf {
        let mut half = SenderHalf {
            state: SenderState::SynSent,
            seq: iss,
            window: VecDeque::new(),
            queue: VecDeque::new(),
            syn_retries: 0,
            fin_retries: 0,
            syn_timer: None,
            fin_timer: None,
        };
        half.queue.push_back(data);
        io.transmit(&RudpPacket::syn(iss));
        half.syn_timer = Some(io.schedule(TimerKind::Syn));
        half
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.state == SenderState::Finished
    }

    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.window.is_empty()
    }

    /// Accepts a user datagram: transmitted directly when the queue is empty
    /// and a window slot is free, queued otherwise (strict FIFO).
    pub(crate) fn send(&mut self, io: &mut Io<'_>, data: Vec<u8>) {
        if self.state == SenderState::Open
            && self.queue.is_empty()
            && self.window.len() < io.cfg.window
        {
            self.transmit_data(io, data);
        } else {
            self.queue.push_back(data);
        }
    }

    fn transmit_data(&mut self, io: &mut Io<'_>, data: Vec<u8>) {
        self.seq = self.seq.next();
        let pkt = RudpPacket::data(self.seq, data);
        io.transmit(&pkt);
        let timer = io.schedule(TimerKind::Data(self.seq));
        self.window.push_back(WindowSlot {
            pkt,
            retries: 0,
            timer,
        });
    }

    fn fill_window(&mut self, io: &mut Io<'_>) {
        while self.window.len() < io.cfg.window {
            let Some(data) = self.queue.pop_front() else {
                break;
            };
            self.transmit_data(io, data);
        }
    }

    pub(crate) fn on_ack(&mut self, io: &mut Io<'_>, ack: SeqNo) -> AckOutcome {
        match self.state {
            SenderState::SynSent => {
                if ack != self.seq.next() {
                    return AckOutcome::Ignored;
                }
                if let Some(timer) = self.syn_timer.take() {
                    io.cancel(timer);
                }
                self.state.transition_to(SenderState::Open);
                self.fill_window(io);
                AckOutcome::Advanced
            }
            SenderState::Open => {
                match self.window.front() {
                    Some(front) if ack == front.pkt.seq_no.next() => {}
                    _ => return AckOutcome::Ignored,
                }
                let Some(slot) = self.window.pop_front() else {
                    return AckOutcome::Ignored;
                };
                io.cancel(slot.timer);
                self.fill_window(io);
                AckOutcome::Advanced
            }
            SenderState::FinSent => {
                if ack != self.seq.next() {
                    return AckOutcome::Ignored;
                }
                if let Some(timer) = self.fin_timer.take() {
                    io.cancel(timer);
                }
                self.state.transition_to(SenderState::Finished);
                AckOutcome::FinAcked
            }
            SenderState::Finished => AckOutcome::Ignored,
        }
    }

    /// Emits the FIN once every queued datagram has been delivered. Called
    /// while socket close is pending; a no-op in any other state.
    pub(crate) fn maybe_send_fin(&mut self, io: &mut Io<'_>) {
        if self.state != SenderState::Open || !self.is_idle() {
            return;
        }
        self.seq = self.seq.next();
        io.transmit(&RudpPacket::fin(self.seq));
        self.fin_timer = Some(io.schedule(TimerKind::Fin));
        self.state.transition_to(SenderState::FinSent);
    }

    /// A retransmission timer fired. Returns `true` when the packet has
    /// exhausted its retries; the caller reports the peer timeout and the
    /// packet is no longer retransmitted.
    pub(crate) fn on_timer(&mut self, io: &mut Io<'_>, kind: TimerKind) -> bool {
        match kind {
            TimerKind::Syn => {
                if self.state != SenderState::SynSent {
                    return false;
                }
                if self.syn_retries >= io.cfg.max_retries {
                    self.syn_timer = None;
                    return true;
                }
                self.syn_retries += 1;
                io.transmit(&RudpPacket::syn(self.seq));
                self.syn_timer = Some(io.schedule(TimerKind::Syn));
                false
            }
            TimerKind::Fin => {
                if self.state != SenderState::FinSent {
                    return false;
                }
                if self.fin_retries >= io.cfg.max_retries {
                    self.fin_timer = None;
                    return true;
                }
                self.fin_retries += 1;
                io.transmit(&RudpPacket::fin(self.seq));
                self.fin_timer = Some(io.schedule(TimerKind::Fin));
                false
            }
            TimerKind::Data(seq) => {
                let Some(slot) = self.window.iter_mut().find(|slot| slot.pkt.seq_no == seq)
                else {
                    // acked in the meantime
                    return false;
                };
                if slot.retries >= io.cfg.max_retries {
                    return true;
                }
                slot.retries += 1;
                io.transmit(&slot.pkt);
                slot.timer = io.schedule(TimerKind::Data(seq));
                false
            }
        }
    }

    pub(crate) fn cancel_timers(&mut self, events: &mut EventLoop<IoContext>) {
        if let Some(timer) = self.syn_timer.take() {
            events.cancel(timer);
        }
        if let Some(timer) = self.fin_timer.take() {
            events.cancel(timer);
        }
        for slot in self.window.drain(..) {
            events.cancel(slot.timer);
        }
    }
}
