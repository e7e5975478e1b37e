//! Socket plumbing shared by connections and listeners.
//!
//! Every socket gets the same options: 256 KiB kernel buffers (tunable),
//! TCP_NODELAY and non-blocking mode. The [`Carrier`] wraps an established
//! stream, plain or TLS, behind one receive and one send entry point so the
//! connection state machine never branches on the transport flavor.

use std::{
    io::{self, Read, Write},
    net::{SocketAddr, SocketAddrV4, TcpListener, TcpStream},
};

use socket2::{Domain, Protocol, SockRef, Socket, Type};

use netweave_core::Config;
use netweave_protocol::RecvRing;

use crate::tls::TlsSession;

/// What a receive attempt produced.
#[derive(Debug, PartialEq, Eq)]
pub enum RecvOutcome {
    /// This many bytes were committed into the ring.
    Received(usize),
    /// Nothing to read this tick (would block, or the ring is full).
    Idle,
    /// The peer closed the stream.
    Closed,
}

fn apply_socket_options(socket: &SockRef<'_>, config: &Config) -> io::Result<()> {
    socket.set_recv_buffer_size(config.socket_recv_buffer_size)?;
    socket.set_send_buffer_size(config.socket_send_buffer_size)?;
    if config.nodelay {
        socket.set_nodelay(true)?;
    }
    socket.set_nonblocking(true)?;
    Ok(())
}

/// Applies the standard options to a freshly accepted stream.
pub(crate) fn configure_accepted(stream: &TcpStream, config: &Config) -> io::Result<()> {
    apply_socket_options(&SockRef::from(stream), config)
}

fn connect_in_progress(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EINPROGRESS)
}

/// Opens a non-blocking socket and starts a connect to `addr`.
///
/// Returns as soon as the kernel accepts the attempt; completion is probed
/// by the connection state machine on later ticks.
pub(crate) fn connect_nonblocking(addr: SocketAddrV4, config: &Config) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    apply_socket_options(&SockRef::from(&socket), config)?;
    match socket.connect(&SocketAddr::V4(addr).into()) {
        Ok(()) => {}
        Err(err) if connect_in_progress(&err) => {}
        Err(err) => return Err(err),
    }
    Ok(socket.into())
}

/// Opens, binds and starts listening on a non-blocking socket.
pub(crate) fn bind_listener(addr: SocketAddrV4, config: &Config) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    apply_socket_options(&SockRef::from(&socket), config)?;
    socket.bind(&SocketAddr::V4(addr).into())?;
    socket.listen(config.listen_backlog)?;
    Ok(socket.into())
}

/// Duplex byte transport: a non-blocking stream, optionally TLS-wrapped.
#[derive(Debug)]
pub struct Carrier {
    stream: TcpStream,
    tls: Option<TlsSession>,
}

impl Carrier {
    /// Wraps a plain stream.
    pub fn plain(stream: TcpStream) -> Self {
        Self { stream, tls: None }
    }

    /// Wraps a stream with a TLS session bound to it.
    pub fn with_tls(stream: TcpStream, tls: TlsSession) -> Self {
        Self { stream, tls: Some(tls) }
    }

    /// Returns true when a TLS session is attached.
    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// The underlying stream, for readiness probes.
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Advances a pending TLS handshake. `Ok(true)` once complete.
    pub fn drive_handshake(&mut self) -> io::Result<bool> {
        match self.tls.as_mut() {
            Some(tls) => tls.drive_handshake(&mut self.stream),
            None => Ok(true),
        }
    }

    /// Receives into the ring's contiguous tail region.
    ///
    /// At most one socket read per call; would-block is [`RecvOutcome::Idle`],
    /// not an error. A full ring is also `Idle`: the peer stalls until the
    /// host drains messages.
    pub fn recv_into(&mut self, ring: &mut RecvRing) -> io::Result<RecvOutcome> {
        if self.tls.is_some() {
            return self.recv_tls(ring);
        }
        let slice = ring.writable_slice();
        if slice.is_empty() {
            return Ok(RecvOutcome::Idle);
        }
        match self.stream.read(slice) {
            Ok(0) => Ok(RecvOutcome::Closed),
            Ok(n) => {
                ring.commit(n);
                Ok(RecvOutcome::Received(n))
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(RecvOutcome::Idle),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(RecvOutcome::Idle),
            Err(err) => Err(err),
        }
    }

    fn recv_tls(&mut self, ring: &mut RecvRing) -> io::Result<RecvOutcome> {
        let tls = self.tls.as_mut().expect("checked by caller");

        match tls.session.read_tls(&mut self.stream) {
            Ok(0) => return Ok(RecvOutcome::Closed),
            Ok(_) => {
                tls.session
                    .process_new_packets()
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }

        // Decrypted plaintext may span several ring regions; draining it is
        // pure memory work, no further syscalls.
        let mut total = 0;
        loop {
            let slice = ring.writable_slice();
            if slice.is_empty() {
                break;
            }
            match tls.session.reader().read(slice) {
                Ok(0) => {
                    // Clean close_notify from the peer.
                    if total == 0 {
                        return Ok(RecvOutcome::Closed);
                    }
                    break;
                }
                Ok(n) => {
                    ring.commit(n);
                    total += n;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err),
            }
        }

        if total == 0 {
            Ok(RecvOutcome::Idle)
        } else {
            Ok(RecvOutcome::Received(total))
        }
    }

    /// Writes as much of `bytes` as the socket accepts right now.
    ///
    /// Returns the byte count actually taken; would-block surfaces as short
    /// (possibly zero) progress, never as an error.
    pub fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        if self.tls.is_some() {
            return self.send_tls(bytes);
        }
        let mut sent = 0;
        while sent < bytes.len() {
            match self.stream.write(&bytes[sent..]) {
                Ok(0) => break,
                Ok(n) => sent += n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(sent)
    }

    fn send_tls(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let tls = self.tls.as_mut().expect("checked by caller");

        let mut sent = 0;
        while sent < bytes.len() {
            // Buffers plaintext inside the session; short when its internal
            // buffer fills.
            let n = tls.session.writer().write(&bytes[sent..])?;
            if n == 0 {
                break;
            }
            sent += n;
        }

        while tls.session.wants_write() {
            match tls.session.write_tls(&mut self.stream) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(sent)
    }

    /// Closes the transport, sending a best-effort TLS close_notify first.
    pub fn shutdown(&mut self) {
        if let Some(tls) = self.tls.as_mut() {
            tls.session.send_close_notify();
            let _ = tls.session.write_tls(&mut self.stream);
        }
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        self.tls = None;
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    fn loopback_pair(config: &Config) -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        client.set_nonblocking(true).unwrap();
        configure_accepted(&server, config).unwrap();
        (client, server)
    }

    #[test]
    fn plain_send_and_recv_through_ring() {
        let config = Config::default();
        let (client, server) = loopback_pair(&config);
        let mut sender = Carrier::plain(client);
        let mut receiver = Carrier::plain(server);

        assert_eq!(sender.send(b"hello").unwrap(), 5);

        let mut ring = RecvRing::with_capacity(16);
        let mut got = 0;
        for _ in 0..100 {
            match receiver.recv_into(&mut ring).unwrap() {
                RecvOutcome::Received(n) => {
                    got += n;
                    if got == 5 {
                        break;
                    }
                }
                RecvOutcome::Idle => std::thread::sleep(std::time::Duration::from_millis(1)),
                RecvOutcome::Closed => panic!("unexpected close"),
            }
        }
        let mut out = [0u8; 16];
        let n = ring.read_into(&mut out);
        assert_eq!(&out[..n], b"hello");
    }

    #[test]
    fn recv_reports_peer_close() {
        let config = Config::default();
        let (client, server) = loopback_pair(&config);
        let mut receiver = Carrier::plain(server);
        drop(client);

        let mut ring = RecvRing::with_capacity(16);
        let mut outcome = RecvOutcome::Idle;
        for _ in 0..100 {
            outcome = receiver.recv_into(&mut ring).unwrap();
            if outcome != RecvOutcome::Idle {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(outcome, RecvOutcome::Closed);
    }

    #[test]
    fn full_ring_stalls_instead_of_reading() {
        let config = Config::default();
        let (client, server) = loopback_pair(&config);
        let mut sender = Carrier::plain(client);
        let mut receiver = Carrier::plain(server);

        sender.send(b"abcd").unwrap();

        let mut ring = RecvRing::with_capacity(2);
        for _ in 0..100 {
            if let RecvOutcome::Received(_) = receiver.recv_into(&mut ring).unwrap() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(ring.spare(), 0);
        // Ring is full: the carrier must not report close or error.
        assert_eq!(receiver.recv_into(&mut ring).unwrap(), RecvOutcome::Idle);
    }
}
