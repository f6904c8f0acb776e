//! RUDP sockets: the session table, packet routing and the public API.

use crate::{
    cfg::Config,
    event::{EventLoop, Handler},
    pkt::{PacketType, RudpPacket, SeqNo, HDR_SIZE, MAX_PAYLOAD},
    session::{AckOutcome, Io, ReceiverHalf, SenderHalf, Session, Timeout},
};
use fxhash::FxHashMap;
use mio::{net::UdpSocket, Token};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::{
    fmt::Display,
    io::{Error, ErrorKind, Result},
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
};

/// Handle to an open RUDP socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketHandle(u32);

impl Display for SocketHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rudp:{}", self.0)
    }
}

/// Lifecycle notifications delivered to the event handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RudpEvent {
    /// A packet to the peer exhausted its retries. The session is left in
    /// place; whether to close the socket is the application's choice.
    Timeout,
    /// Teardown after [`close`](RudpHandle::close) completed and the socket
    /// is gone. Emitted exactly once per socket.
    Closed,
}

/// Called synchronously per delivered datagram. The bytes are borrowed for
/// the duration of the call only.
pub type RecvHandler =
    Box<dyn FnMut(&mut RudpHandle<'_>, SocketHandle, SocketAddrV4, &[u8]) -> Result<()>>;

/// Called synchronously per lifecycle event, with the peer that caused it.
pub type EventHandler =
    Box<dyn FnMut(&mut RudpHandle<'_>, SocketHandle, RudpEvent, SocketAddrV4) -> Result<()>>;

const UNSPECIFIED_PEER: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);

/// Test-only transmit tap: observes every outgoing packet and may drop it
/// before it reaches the wire.
#[cfg(test)]
pub(crate) struct Tap(pub(crate) Option<Box<dyn FnMut(&RudpPacket, SocketAddrV4) -> bool>>);

#[cfg(not(test))]
pub(crate) struct Tap;

impl Tap {
    #[cfg(test)]
    pub(crate) fn drops(&mut self, pkt: &RudpPacket, to: SocketAddrV4) -> bool {
        match &mut self.0 {
            Some(tap) => tap(pkt, to),
            None => false,
        }
    }

    #[cfg(not(test))]
    #[inline]
    pub(crate) fn drops(&mut self, _pkt: &RudpPacket, _to: SocketAddrV4) -> bool {
        false
    }

    #[cfg(test)]
    fn new() -> Tap {
        Tap(None)
    }

    #[cfg(not(test))]
    fn new() -> Tap {
        Tap
    }
}

struct SocketControlBlock {
    udp: UdpSocket,
    local_addr: SocketAddr,
    token: Token,
    close_requested: bool,
    recv_handler: Option<RecvHandler>,
    event_handler: Option<EventHandler>,
    sessions: FxHashMap<SocketAddrV4, Session>,
}

/// The socket table and everything hanging off it. Mutated exclusively from
/// event-loop callbacks; there is no shared-memory concurrency.
pub(crate) struct IoContext {
    cfg: Config,
    sockets: FxHashMap<SocketHandle, SocketControlBlock>,
    next_fd: u32,
    rng: SmallRng,
    tap: Tap,
}

/// An RUDP endpoint: the event loop plus the socket table, owned by the
/// application and driven from a single thread via [`run`](Rudp::run).
pub struct Rudp {
    events: EventLoop<IoContext>,
    ctx: IoContext,
}

/// The mutable surface of [`Rudp`], reborrowed. Handlers receive one of
/// these so they may re-enter `send_to`, `close` or even `socket` from
/// within a callback.
pub struct RudpHandle<'a> {
    events: &'a mut EventLoop<IoContext>,
    ctx: &'a mut IoContext,
}

fn invalid_socket() -> Error {
    Error::new(ErrorKind::InvalidInput, "no such rudp socket")
}

impl Rudp {
    pub fn new(cfg: Config) -> Result<Rudp> {
        Ok(Rudp {
            events: EventLoop::new()?,
            ctx: IoContext {
                cfg,
                sockets: FxHashMap::default(),
                next_fd: 0,
                rng: SmallRng::from_entropy(),
                tap: Tap::new(),
            },
        })
    }

    pub fn handle(&mut self) -> RudpHandle<'_> {
        RudpHandle {
            events: &mut self.events,
            ctx: &mut self.ctx,
        }
    }

    /// Binds a UDP socket to `port` (0 for ephemeral) and registers it for
    /// reads.
    pub fn socket(&mut self, port: u16) -> Result<SocketHandle> {
        self.handle().socket(port)
    }

    pub fn set_recv_handler(&mut self, sock: SocketHandle, handler: RecvHandler) -> Result<()> {
        self.handle().set_recv_handler(sock, handler)
    }

    pub fn set_event_handler(&mut self, sock: SocketHandle, handler: EventHandler) -> Result<()> {
        self.handle().set_event_handler(sock, handler)
    }

    /// Queues `data` for reliable, ordered delivery to `to` and returns
    /// immediately. The bytes are copied.
    pub fn send_to(&mut self, sock: SocketHandle, data: &[u8], to: SocketAddrV4) -> Result<()> {
        self.handle().send_to(sock, data, to)
    }

    /// Requests teardown. Idempotent; the socket closes once every session
    /// has completed, at which point `Closed` is emitted.
    pub fn close(&mut self, sock: SocketHandle) -> Result<()> {
        self.handle().close(sock)
    }

    pub fn local_addr(&self, sock: SocketHandle) -> Result<SocketAddr> {
        self.ctx.local_addr(sock)
    }

    /// Drives the event loop until every socket has been torn down. An `Err`
    /// from any handler aborts the loop with that error.
    pub fn run(&mut self) -> Result<()> {
        self.events.run(&mut self.ctx)
    }

    /// One bounded event-loop turn, for tests that interleave reactor
    /// progress with scripted peers.
    #[cfg(test)]
    pub(crate) fn turn(&mut self, cap: std::time::Duration) -> Result<bool> {
        self.events.turn(&mut self.ctx, Some(cap))
    }

    #[cfg(test)]
    pub(crate) fn set_tap(
        &mut self,
        tap: impl FnMut(&RudpPacket, SocketAddrV4) -> bool + 'static,
    ) {
        self.ctx.tap.0 = Some(Box::new(tap));
    }
}

impl RudpHandle<'_> {
    pub fn socket(&mut self, port: u16) -> Result<SocketHandle> {
        self.ctx.socket(self.events, port)
    }

    pub fn set_recv_handler(&mut self, sock: SocketHandle, handler: RecvHandler) -> Result<()> {
        let cb = self.ctx.sockets.get_mut(&sock).ok_or_else(invalid_socket)?;
        cb.recv_handler = Some(handler);
        Ok(())
    }

    pub fn set_event_handler(&mut self, sock: SocketHandle, handler: EventHandler) -> Result<()> {
        let cb = self.ctx.sockets.get_mut(&sock).ok_or_else(invalid_socket)?;
        cb.event_handler = Some(handler);
        Ok(())
    }

    pub fn send_to(&mut self, sock: SocketHandle, data: &[u8], to: SocketAddrV4) -> Result<()> {
        self.ctx.send_to(self.events, sock, data, to)
    }

    pub fn close(&mut self, sock: SocketHandle) -> Result<()> {
        self.ctx.close(self.events, sock)
    }

    pub fn local_addr(&self, sock: SocketHandle) -> Result<SocketAddr> {
        self.ctx.local_addr(sock)
    }
}

impl Handler for IoContext {
    type Timeout = Timeout;

    fn readable(&mut self, events: &mut EventLoop<Self>, token: Token) -> Result<()> {
        self.recv_ready(events, token)
    }

    fn timeout(&mut self, events: &mut EventLoop<Self>, timeout: Timeout) -> Result<()> {
        self.on_timeout(events, timeout)
    }
}

impl IoContext {
    fn socket(&mut self, events: &mut EventLoop<IoContext>, port: u16) -> Result<SocketHandle> {
        let mut udp = UdpSocket::bind(SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::UNSPECIFIED,
            port,
        )))?;
        let sock = SocketHandle(self.next_fd);
        self.next_fd += 1;
        let token = Token(sock.0 as usize);
        events.register(&mut udp, token)?;

        let local_addr = udp.local_addr()?;
        tracing::debug!("{} bound to {}", sock, local_addr);
        self.sockets.insert(
            sock,
            SocketControlBlock {
                udp,
                local_addr,
                token,
                close_requested: false,
                recv_handler: None,
                event_handler: None,
                sessions: FxHashMap::default(),
            },
        );
        Ok(sock)
    }

    fn local_addr(&self, sock: SocketHandle) -> Result<SocketAddr> {
        self.sockets
            .get(&sock)
            .map(|cb| cb.local_addr)
            .ok_or_else(invalid_socket)
    }

    fn send_to(
        &mut self,
        events: &mut EventLoop<IoContext>,
        sock: SocketHandle,
        data: &[u8],
        to: SocketAddrV4,
    ) -> Result<()> {
        if data.len() > MAX_PAYLOAD {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "payload exceeds MAX_PAYLOAD",
            ));
        }
        if to.ip().is_unspecified() || to.port() == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "invalid peer address"));
        }

        let IoContext {
            sockets,
            cfg,
            rng,
            tap,
            ..
        } = self;
        let Some(cb) = sockets.get_mut(&sock) else {
            return Err(invalid_socket());
        };
        let SocketControlBlock { udp, sessions, .. } = cb;
        let mut io = Io {
            events: &mut *events,
            udp,
            sock,
            peer: to,
            cfg,
            tap,
        };

        let session = sessions.entry(to).or_insert_with(Session::new);
        match &mut session.sender {
            Some(sender) => sender.send(&mut io, data.to_vec()),
            None => {
                let iss = SeqNo(rng.gen());
                session.sender = Some(SenderHalf::open(&mut io, iss, data.to_vec()));
            }
        }
        Ok(())
    }

    fn close(&mut self, events: &mut EventLoop<IoContext>, sock: SocketHandle) -> Result<()> {
        let Some(cb) = self.sockets.get_mut(&sock) else {
            return Err(invalid_socket());
        };
        if cb.close_requested {
            return Ok(());
        }
        cb.close_requested = true;
        tracing::debug!("{} close requested", sock);

        let last_peer = cb.sessions.keys().next().copied().unwrap_or(UNSPECIFIED_PEER);
        self.teardown_progress(events, sock, last_peer)
    }

    /// Drains one readiness wakeup: consumes datagrams until the socket
    /// would block, routing each decoded packet through the engine.
    fn recv_ready(&mut self, events: &mut EventLoop<IoContext>, token: Token) -> Result<()> {
        let sock = SocketHandle(token.0 as u32);
        // one byte of slack so an oversized datagram is visibly oversized
        // rather than silently truncated
        let mut buf = [0u8; HDR_SIZE + MAX_PAYLOAD + 1];
        loop {
            // re-resolve each iteration, a handler may have torn the socket
            // down in the meantime
            let Some(cb) = self.sockets.get(&sock) else {
                return Ok(());
            };
            let (n, src) = match cb.udp.recv_from(&mut buf) {
                Ok((n, SocketAddr::V4(src))) => (n, src),
                Ok((_, SocketAddr::V6(_))) => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("{} recv error: {}", sock, e);
                    return Ok(());
                }
            };
            match RudpPacket::from_slice(&buf[..n]) {
                Ok(pkt) => self.process(events, sock, src, pkt)?,
                Err(e) => {
                    tracing::trace!("{} dropping undecodable datagram from {}: {}", sock, src, e);
                }
            }
        }
    }

    fn process(
        &mut self,
        events: &mut EventLoop<IoContext>,
        sock: SocketHandle,
        src: SocketAddrV4,
        pkt: RudpPacket,
    ) -> Result<()> {
        tracing::trace!(
            "{} rx {} seq={} ({} bytes) from {}",
            sock,
            pkt.typ,
            pkt.seq_no,
            pkt.content.len(),
            src
        );

        let IoContext {
            sockets, cfg, tap, ..
        } = self;
        let Some(cb) = sockets.get_mut(&sock) else {
            return Ok(());
        };
        let SocketControlBlock { udp, sessions, .. } = cb;
        let window = cfg.window;
        let mut io = Io {
            events: &mut *events,
            udp,
            sock,
            peer: src,
            cfg,
            tap,
        };

        match pkt.typ {
            PacketType::Syn => {
                let session = sessions.entry(src).or_insert_with(Session::new);
                match &mut session.receiver {
                    None => session.receiver = Some(ReceiverHalf::open(&mut io, pkt.seq_no)),
                    Some(receiver) => receiver.on_syn(&mut io, pkt.seq_no),
                }
            }
            PacketType::Ack => {
                let Some(sender) = sessions.get_mut(&src).and_then(|s| s.sender.as_mut()) else {
                    tracing::trace!("{} dropping ACK without pending send from {}", sock, src);
                    return Ok(());
                };
                match sender.on_ack(&mut io, pkt.seq_no) {
                    AckOutcome::Ignored => {}
                    AckOutcome::Advanced | AckOutcome::FinAcked => {
                        return self.teardown_progress(events, sock, src);
                    }
                }
            }
            PacketType::Data => {
                let Some(receiver) = sessions.get_mut(&src).and_then(|s| s.receiver.as_mut())
                else {
                    tracing::trace!("{} dropping DATA from unknown peer {}", sock, src);
                    return Ok(());
                };
                if receiver.on_data(&mut io, pkt.seq_no, window) {
                    return self.deliver(events, sock, src, &pkt.content);
                }
            }
            PacketType::Fin => {
                let Some(receiver) = sessions.get_mut(&src).and_then(|s| s.receiver.as_mut())
                else {
                    tracing::trace!("{} dropping FIN from unknown peer {}", sock, src);
                    return Ok(());
                };
                if receiver.on_fin(&mut io, pkt.seq_no) {
                    return self.teardown_progress(events, sock, src);
                }
            }
        }
        Ok(())
    }

    fn on_timeout(&mut self, events: &mut EventLoop<IoContext>, timeout: Timeout) -> Result<()> {
        let exhausted = {
            let IoContext {
                sockets, cfg, tap, ..
            } = self;
            let Some(cb) = sockets.get_mut(&timeout.sock) else {
                return Ok(());
            };
            let SocketControlBlock { udp, sessions, .. } = cb;
            let Some(sender) = sessions
                .get_mut(&timeout.peer)
                .and_then(|s| s.sender.as_mut())
            else {
                return Ok(());
            };
            let mut io = Io {
                events: &mut *events,
                udp,
                sock: timeout.sock,
                peer: timeout.peer,
                cfg,
                tap,
            };
            sender.on_timer(&mut io, timeout.kind)
        };

        if exhausted {
            tracing::warn!(
                "{} retries exhausted towards {}",
                timeout.sock,
                timeout.peer
            );
            self.emit_event(events, timeout.sock, RudpEvent::Timeout, timeout.peer)
        } else {
            Ok(())
        }
    }

    fn deliver(
        &mut self,
        events: &mut EventLoop<IoContext>,
        sock: SocketHandle,
        peer: SocketAddrV4,
        payload: &[u8],
    ) -> Result<()> {
        let Some(cb) = self.sockets.get_mut(&sock) else {
            return Ok(());
        };
        let Some(mut handler) = cb.recv_handler.take() else {
            return Ok(());
        };
        let mut reentrant = RudpHandle {
            events: &mut *events,
            ctx: &mut *self,
        };
        let result = handler(&mut reentrant, sock, peer, payload);
        // the handler may have replaced itself or torn the socket down
        if let Some(cb) = self.sockets.get_mut(&sock) {
            if cb.recv_handler.is_none() {
                cb.recv_handler = Some(handler);
            }
        }
        result
    }

    fn emit_event(
        &mut self,
        events: &mut EventLoop<IoContext>,
        sock: SocketHandle,
        event: RudpEvent,
        peer: SocketAddrV4,
    ) -> Result<()> {
        let Some(cb) = self.sockets.get_mut(&sock) else {
            return Ok(());
        };
        let Some(mut handler) = cb.event_handler.take() else {
            return Ok(());
        };
        let mut reentrant = RudpHandle {
            events: &mut *events,
            ctx: &mut *self,
        };
        let result = handler(&mut reentrant, sock, event, peer);
        if let Some(cb) = self.sockets.get_mut(&sock) {
            if cb.event_handler.is_none() {
                cb.event_handler = Some(handler);
            }
        }
        result
    }

    /// Re-evaluates a close-requested socket after a terminal event: emits
    /// FINs for senders that have drained their queue and window, and
    /// finalizes once every session is done.
    fn teardown_progress(
        &mut self,
        events: &mut EventLoop<IoContext>,
        sock: SocketHandle,
        last_peer: SocketAddrV4,
    ) -> Result<()> {
        let all_done = {
            let IoContext {
                sockets, cfg, tap, ..
            } = self;
            let Some(cb) = sockets.get_mut(&sock) else {
                return Ok(());
            };
            if !cb.close_requested {
                return Ok(());
            }
            let SocketControlBlock { udp, sessions, .. } = cb;
            for (peer, session) in sessions.iter_mut() {
                if let Some(sender) = &mut session.sender {
                    let mut io = Io {
                        events: &mut *events,
                        udp,
                        sock,
                        peer: *peer,
                        cfg,
                        tap,
                    };
                    sender.maybe_send_fin(&mut io);
                }
            }
            sessions.values().all(Session::is_done)
        };

        if all_done {
            self.finalize(events, sock, last_peer)
        } else {
            Ok(())
        }
    }

    /// Destroys the socket: cancels every session timer, emits `Closed`,
    /// deregisters and drops the UDP socket.
    fn finalize(
        &mut self,
        events: &mut EventLoop<IoContext>,
        sock: SocketHandle,
        last_peer: SocketAddrV4,
    ) -> Result<()> {
        let Some(mut cb) = self.sockets.remove(&sock) else {
            return Ok(());
        };
        for session in cb.sessions.values_mut() {
            session.cancel_timers(events);
        }
        tracing::debug!("{} closed", sock);

        let result = match cb.event_handler.take() {
            Some(mut handler) => {
                let mut reentrant = RudpHandle {
                    events: &mut *events,
                    ctx: &mut *self,
                };
                handler(&mut reentrant, sock, RudpEvent::Closed, last_peer)
            }
            None => Ok(()),
        };

        events.deregister(&mut cb.udp, cb.token)?;
        result
    }
}
