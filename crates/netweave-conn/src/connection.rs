//! The per-connection state machine.
//!
//! `ConnectPending → (TlsHandshake) → Established` on the happy path, with
//! `Closed` for silent teardowns and `Failed` once a lifecycle event has
//! been pushed. Each `update` tick performs at most one receive syscall,
//! runs frame reassembly, then drains the outbound queue as far as the
//! socket allows. Control markers (`Disconnect`, `Notify`) ride the
//! outbound queue so they fire only after every earlier send has reached
//! the wire.

use std::{
    io,
    net::{SocketAddrV4, TcpStream},
    sync::Arc,
    time::Instant,
};

use byteorder::{ByteOrder, LittleEndian};
use rustls::{ClientConfig, ServerConfig};
use tracing::{debug, warn};

use netweave_core::{Config, Handle};
use netweave_protocol::{Assembler, Control, InboundSink, Message, MessageId, RecvRing};

use crate::{
    carrier::{self, Carrier, RecvOutcome},
    outbound::OutboundQueue,
    tls::TlsSession,
};

/// Lifecycle phase of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    /// Non-blocking connect in flight, awaiting writability.
    ConnectPending,
    /// TCP established, TLS handshake still in flight.
    TlsHandshake,
    /// Fully established, duplex traffic flowing.
    Established,
    /// Torn down silently (hard disconnect or drained graceful close).
    Closed,
    /// Torn down after pushing `ConnectFailed` or `LostConnection`.
    Failed,
}

/// One multiplexed connection: transport, receive ring, frame assembler and
/// outbound queue.
#[derive(Debug)]
pub struct Connection {
    handle: Handle,
    peer: SocketAddrV4,
    carrier: Option<Carrier>,
    ring: RecvRing,
    assembler: Assembler,
    outbound: OutboundQueue,
    state: ConnState,
    connect_deadline: Instant,
}

impl Connection {
    fn shell(handle: Handle, peer: SocketAddrV4, raw: bool, config: &Config, now: Instant) -> Self {
        Self {
            handle,
            peer,
            carrier: None,
            ring: RecvRing::with_capacity(config.max_incoming_buffer_size),
            assembler: Assembler::new(raw),
            outbound: OutboundQueue::new(),
            state: ConnState::Closed,
            connect_deadline: now + config.connect_timeout,
        }
    }

    /// Starts an outbound connection.
    ///
    /// Failure to even start the attempt pushes `ConnectFailed` and returns
    /// the connection already in the `Failed` state for the context to reap.
    pub fn connect(
        handle: Handle,
        peer: SocketAddrV4,
        raw: bool,
        tls: Option<Arc<ClientConfig>>,
        config: &Config,
        now: Instant,
        sink: &InboundSink,
    ) -> Self {
        let mut conn = Self::shell(handle, peer, raw, config, now);

        let stream = match carrier::connect_nonblocking(peer, config) {
            Ok(stream) => stream,
            Err(err) => {
                debug!(%peer, error = %err, "connect could not start");
                conn.fail(MessageId::ConnectFailed, sink);
                return conn;
            }
        };

        match tls {
            Some(tls_config) => match TlsSession::client(tls_config, *peer.ip()) {
                Ok(session) => conn.carrier = Some(Carrier::with_tls(stream, session)),
                Err(err) => {
                    warn!(%peer, error = %err, "tls client session failed");
                    conn.fail(MessageId::ConnectFailed, sink);
                    return conn;
                }
            },
            None => conn.carrier = Some(Carrier::plain(stream)),
        }

        conn.state = ConnState::ConnectPending;
        conn
    }

    /// Wraps a socket accepted by a listener.
    ///
    /// Pushes `IncomingConnection` immediately; the TLS handshake, if any,
    /// runs on subsequent ticks.
    pub fn accepted(
        handle: Handle,
        listen: Handle,
        stream: TcpStream,
        peer: SocketAddrV4,
        raw: bool,
        tls: Option<Arc<ServerConfig>>,
        config: &Config,
        now: Instant,
        sink: &InboundSink,
    ) -> Self {
        let mut conn = Self::shell(handle, peer, raw, config, now);

        sink.push(Message::incoming_connection(
            handle,
            listen,
            u32::from(*peer.ip()),
            peer.port(),
        ));

        if let Err(err) = carrier::configure_accepted(&stream, config) {
            debug!(%peer, error = %err, "socket options on accepted stream");
        }

        match tls {
            Some(tls_config) => match TlsSession::server(tls_config) {
                Ok(session) => {
                    conn.carrier = Some(Carrier::with_tls(stream, session));
                    conn.state = ConnState::TlsHandshake;
                }
                Err(err) => {
                    warn!(%peer, error = %err, "tls server session failed");
                    conn.fail(MessageId::ConnectFailed, sink);
                }
            },
            None => {
                conn.carrier = Some(Carrier::plain(stream));
                conn.state = ConnState::Established;
            }
        }

        conn
    }

    /// This connection's handle.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Remote address.
    pub fn peer(&self) -> SocketAddrV4 {
        self.peer
    }

    /// Current lifecycle phase.
    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Returns true once the connection is torn down and ready to reap.
    pub fn is_defunct(&self) -> bool {
        matches!(self.state, ConnState::Closed | ConnState::Failed)
    }

    /// Queues a message and eagerly tries to drain.
    ///
    /// Messages handed to a torn-down connection are dropped.
    pub fn send(&mut self, msg: Message, now: Instant, sink: &InboundSink) {
        if self.carrier.is_none() {
            return;
        }
        self.outbound.push(msg);
        self.update(now, sink);
    }

    /// Advances the state machine by one tick.
    pub fn update(&mut self, now: Instant, sink: &InboundSink) {
        if self.state == ConnState::ConnectPending {
            self.poll_connect(now, sink);
        }
        if self.state == ConnState::TlsHandshake {
            self.poll_handshake(sink);
        }
        if self.state == ConnState::Established {
            self.poll_io(sink);
        }
    }

    /// Closes the transport without pushing any event.
    pub fn teardown(&mut self) {
        if let Some(carrier) = self.carrier.as_mut() {
            carrier.shutdown();
        }
        self.carrier = None;
        self.outbound.clear();
        self.state = ConnState::Closed;
    }

    fn fail(&mut self, id: MessageId, sink: &InboundSink) {
        if let Some(carrier) = self.carrier.as_mut() {
            carrier.shutdown();
        }
        self.carrier = None;
        self.outbound.clear();
        sink.push_event(self.handle, id);
        self.state = ConnState::Failed;
    }

    fn poll_connect(&mut self, now: Instant, sink: &InboundSink) {
        if now >= self.connect_deadline {
            debug!(handle = ?self.handle, peer = %self.peer, "connect timed out");
            self.fail(MessageId::ConnectFailed, sink);
            return;
        }

        let Some(carrier) = self.carrier.as_ref() else { return };
        match carrier.stream().take_error() {
            Ok(Some(err)) => {
                debug!(handle = ?self.handle, peer = %self.peer, error = %err, "connect failed");
                self.fail(MessageId::ConnectFailed, sink);
                return;
            }
            Ok(None) => {}
            Err(_) => {}
        }

        match carrier.stream().peer_addr() {
            Ok(_) => {
                self.state = if carrier.is_tls() {
                    ConnState::TlsHandshake
                } else {
                    ConnState::Established
                };
            }
            Err(err) if err.kind() == io::ErrorKind::NotConnected => {}
            Err(_) => {}
        }
    }

    fn poll_handshake(&mut self, sink: &InboundSink) {
        let Some(carrier) = self.carrier.as_mut() else { return };
        match carrier.drive_handshake() {
            Ok(true) => {
                debug!(handle = ?self.handle, peer = %self.peer, "tls established");
                self.state = ConnState::Established;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(handle = ?self.handle, peer = %self.peer, error = %err, "tls handshake failed");
                self.fail(MessageId::ConnectFailed, sink);
            }
        }
    }

    fn poll_io(&mut self, sink: &InboundSink) {
        let Some(carrier) = self.carrier.as_mut() else { return };
        match carrier.recv_into(&mut self.ring) {
            Ok(RecvOutcome::Closed) => {
                debug!(handle = ?self.handle, peer = %self.peer, "peer closed connection");
                self.fail(MessageId::LostConnection, sink);
                return;
            }
            Ok(_) => {}
            Err(err) => {
                debug!(handle = ?self.handle, peer = %self.peer, error = %err, "receive failed");
                self.fail(MessageId::LostConnection, sink);
                return;
            }
        }

        self.assembler.drain(self.handle, &mut self.ring, sink);
        self.flush_outbound(sink);
    }

    fn flush_outbound(&mut self, sink: &InboundSink) {
        loop {
            let Some(front) = self.outbound.front() else { return };
            match front.control() {
                Control::Disconnect => {
                    self.teardown();
                    return;
                }
                Control::Notify => {
                    let marker = self.outbound.pop_front().expect("front exists");
                    let user_data = LittleEndian::read_u64(marker.data());
                    sink.push(Message::notify_event(self.handle, user_data));
                    continue;
                }
                Control::None => {}
            }

            let raw = self.assembler.is_raw();
            let cursor = self.outbound.cursor();
            let (result, frame_len) = {
                let Some(carrier) = self.carrier.as_mut() else { return };
                let msg = self.outbound.front_mut().expect("front exists");
                if !raw && cursor == 0 {
                    msg.seal_frame();
                }
                let wire: &[u8] = if raw { msg.data() } else { msg.framed_bytes() };
                (carrier.send(&wire[cursor..]), wire.len())
            };

            match result {
                Ok(n) => {
                    self.outbound.advance_cursor(n);
                    if self.outbound.cursor() >= frame_len {
                        self.outbound.pop_front();
                    } else {
                        // Socket full; resume from the cursor next tick.
                        return;
                    }
                }
                Err(err) => {
                    debug!(handle = ?self.handle, peer = %self.peer, error = %err, "send failed");
                    self.fail(MessageId::LostConnection, sink);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::Read,
        net::{Ipv4Addr, TcpListener},
        time::Duration,
    };

    use netweave_protocol::InboundQueue;

    use super::*;

    fn local_v4(listener: &TcpListener) -> SocketAddrV4 {
        match listener.local_addr().unwrap() {
            std::net::SocketAddr::V4(addr) => addr,
            other => panic!("expected v4 addr, got {other}"),
        }
    }

    fn establish(
        raw: bool,
    ) -> (Connection, TcpStream, InboundQueue) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = local_v4(&listener);
        let queue = InboundQueue::new();
        let config = Config::default();

        let mut conn = Connection::connect(
            Handle::from_bits(1),
            addr,
            raw,
            None,
            &config,
            Instant::now(),
            &queue.sink(),
        );
        let (peer, _) = listener.accept().unwrap();

        for _ in 0..200 {
            conn.update(Instant::now(), &queue.sink());
            if conn.state() == ConnState::Established {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(conn.state(), ConnState::Established);
        (conn, peer, queue)
    }

    fn read_exact_with_deadline(stream: &mut TcpStream, out: &mut [u8]) {
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        stream.read_exact(out).unwrap();
    }

    #[test]
    fn outbound_connect_establishes() {
        let (conn, _peer, queue) = establish(false);
        assert_eq!(conn.state(), ConnState::Established);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn framed_send_seals_a_length_prefix() {
        let (mut conn, mut peer, queue) = establish(false);

        let mut msg = Message::outgoing(conn.handle(), 3);
        msg.data_mut().copy_from_slice(&[0x80, b'h', b'i']);
        conn.send(msg, Instant::now(), &queue.sink());

        let mut wire = [0u8; 5];
        read_exact_with_deadline(&mut peer, &mut wire);
        assert_eq!(wire, [3, 0, 0x80, b'h', b'i']);
    }

    #[test]
    fn raw_send_writes_payload_only() {
        let (mut conn, mut peer, queue) = establish(true);

        let mut msg = Message::outgoing(conn.handle(), 3);
        msg.data_mut().copy_from_slice(b"abc");
        conn.send(msg, Instant::now(), &queue.sink());

        let mut wire = [0u8; 3];
        read_exact_with_deadline(&mut peer, &mut wire);
        assert_eq!(&wire, b"abc");
    }

    #[test]
    fn notify_marker_echoes_locally_without_wire_traffic() {
        let (mut conn, peer, queue) = establish(false);

        conn.send(
            Message::notify_marker(conn.handle(), 0xDEAD_BEEF_CAFE_BABE),
            Instant::now(),
            &queue.sink(),
        );

        let event = queue.try_pop().expect("notify echoed");
        assert_eq!(event.notify_payload(), Some(0xDEAD_BEEF_CAFE_BABE));
        assert_eq!(conn.state(), ConnState::Established);

        // Nothing went on the wire.
        peer.set_nonblocking(true).unwrap();
        let mut scratch = [0u8; 8];
        let err = (&peer).read(&mut scratch).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn disconnect_marker_drains_earlier_sends_first() {
        let (mut conn, mut peer, queue) = establish(false);

        for byte in [1u8, 2, 3] {
            let mut msg = Message::outgoing(conn.handle(), 1);
            msg.data_mut()[0] = 0x80 + byte;
            conn.send(msg, Instant::now(), &queue.sink());
        }
        conn.send(
            Message::disconnect_marker(conn.handle()),
            Instant::now(),
            &queue.sink(),
        );

        for _ in 0..200 {
            if conn.is_defunct() {
                break;
            }
            conn.update(Instant::now(), &queue.sink());
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(conn.state(), ConnState::Closed);
        assert!(queue.try_pop().is_none(), "graceful close pushes no event");

        let mut wire = [0u8; 9];
        read_exact_with_deadline(&mut peer, &mut wire);
        assert_eq!(wire, [1, 0, 0x81, 1, 0, 0x82, 1, 0, 0x83]);
    }

    #[test]
    fn peer_close_pushes_lost_connection() {
        let (mut conn, peer, queue) = establish(false);
        drop(peer);

        for _ in 0..200 {
            conn.update(Instant::now(), &queue.sink());
            if conn.is_defunct() {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(conn.state(), ConnState::Failed);
        let event = queue.try_pop().unwrap();
        assert_eq!(event.id(), Some(MessageId::LostConnection as u8));
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn expired_deadline_fails_the_connect() {
        let queue = InboundQueue::new();
        let mut config = Config::default();
        config.connect_timeout = Duration::from_millis(0);

        // TEST-NET-2 address: never routable, the attempt just hangs.
        let mut conn = Connection::connect(
            Handle::from_bits(1),
            SocketAddrV4::new(Ipv4Addr::new(198, 51, 100, 1), 1),
            false,
            None,
            &config,
            Instant::now(),
            &queue.sink(),
        );
        conn.update(Instant::now(), &queue.sink());

        assert_eq!(conn.state(), ConnState::Failed);
        let event = queue.try_pop().unwrap();
        assert_eq!(event.id(), Some(MessageId::ConnectFailed as u8));
        assert!(queue.try_pop().is_none(), "timeout fires exactly once");
    }

    #[test]
    fn send_after_teardown_is_dropped() {
        let (mut conn, _peer, queue) = establish(false);
        conn.teardown();

        conn.send(Message::outgoing(conn.handle(), 1), Instant::now(), &queue.sink());
        assert!(queue.try_pop().is_none());
        assert_eq!(conn.state(), ConnState::Closed);
    }
}
