//! Accept-only listen socket.

use std::{
    io,
    net::{SocketAddrV4, TcpListener, TcpStream},
    sync::Arc,
};

use rustls::ServerConfig;
use tracing::{debug, warn};

use netweave_core::{Config, Handle};
use netweave_protocol::{InboundSink, MessageId};

use crate::{carrier, tls};

/// A listen socket producing new connections for the context to adopt.
///
/// A listener that failed to open stays in the pool with no socket so its
/// handle remains valid until the host calls `stop`; it simply never
/// accepts anything.
#[derive(Debug)]
pub struct Listener {
    handle: Handle,
    socket: Option<TcpListener>,
    raw: bool,
    tls: Option<Arc<ServerConfig>>,
}

impl Listener {
    /// Opens a listener on `addr`.
    ///
    /// Both `cert` and `key` present selects TLS server mode; exactly one
    /// present is a configuration error. Every failure pushes
    /// `ListenFailed` and leaves the listener socketless.
    pub fn open(
        handle: Handle,
        addr: SocketAddrV4,
        raw: bool,
        cert: Option<&str>,
        key: Option<&str>,
        config: &Config,
        sink: &InboundSink,
    ) -> Self {
        let mut listener = Self { handle, socket: None, raw, tls: None };

        match (cert, key) {
            (Some(cert), Some(key)) => match tls::build_server_config(cert, key) {
                Ok(tls_config) => listener.tls = Some(tls_config),
                Err(err) => {
                    warn!(%addr, error = %err, "listener tls config rejected");
                    sink.push_event(handle, MessageId::ListenFailed);
                    return listener;
                }
            },
            (None, None) => {}
            _ => {
                warn!(%addr, "certificate and key must be provided together");
                sink.push_event(handle, MessageId::ListenFailed);
                return listener;
            }
        }

        match carrier::bind_listener(addr, config) {
            Ok(socket) => listener.socket = Some(socket),
            Err(err) => {
                warn!(%addr, error = %err, "bind or listen failed");
                sink.push_event(handle, MessageId::ListenFailed);
            }
        }

        listener
    }

    /// This listener's handle.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Returns true for raw-mode listeners.
    pub fn raw(&self) -> bool {
        self.raw
    }

    /// Server-side TLS configuration shared by accepted connections.
    pub fn tls(&self) -> Option<Arc<ServerConfig>> {
        self.tls.clone()
    }

    /// Local address actually bound, useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddrV4> {
        match self.socket.as_ref()?.local_addr() {
            Ok(std::net::SocketAddr::V4(addr)) => Some(addr),
            _ => None,
        }
    }

    /// Accepts at most one pending connection.
    pub fn poll_accept(&mut self) -> Option<(TcpStream, SocketAddrV4)> {
        let socket = self.socket.as_ref()?;
        match socket.accept() {
            Ok((stream, std::net::SocketAddr::V4(peer))) => Some((stream, peer)),
            Ok((_, peer)) => {
                debug!(%peer, "dropping non-ipv4 peer");
                None
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => None,
            Err(err) => {
                warn!(handle = ?self.handle, error = %err, "accept failed");
                None
            }
        }
    }

    /// Closes the socket; the handle dies with the pool slot.
    pub fn close(&mut self) {
        self.socket = None;
        self.tls = None;
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use netweave_protocol::InboundQueue;

    use super::*;

    fn any_addr() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)
    }

    #[test]
    fn opens_and_reports_local_addr() {
        let queue = InboundQueue::new();
        let config = Config::default();
        let listener = Listener::open(
            Handle::from_bits(0),
            any_addr(),
            false,
            None,
            None,
            &config,
            &queue.sink(),
        );

        let addr = listener.local_addr().expect("bound");
        assert_ne!(addr.port(), 0);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn cert_without_key_fails_before_binding() {
        let queue = InboundQueue::new();
        let config = Config::default();
        let listener = Listener::open(
            Handle::from_bits(0),
            any_addr(),
            false,
            Some("cert"),
            None,
            &config,
            &queue.sink(),
        );

        assert!(listener.local_addr().is_none());
        let event = queue.try_pop().unwrap();
        assert_eq!(event.id(), Some(MessageId::ListenFailed as u8));
    }

    #[test]
    fn accept_is_nonblocking_when_idle() {
        let queue = InboundQueue::new();
        let config = Config::default();
        let mut listener = Listener::open(
            Handle::from_bits(0),
            any_addr(),
            false,
            None,
            None,
            &config,
            &queue.sink(),
        );

        assert!(listener.poll_accept().is_none());
    }

    #[test]
    fn accepts_a_pending_connection() {
        let queue = InboundQueue::new();
        let config = Config::default();
        let mut listener = Listener::open(
            Handle::from_bits(0),
            any_addr(),
            false,
            None,
            None,
            &config,
            &queue.sink(),
        );
        let addr = listener.local_addr().unwrap();
        let _client = std::net::TcpStream::connect(addr).unwrap();

        let mut accepted = None;
        for _ in 0..200 {
            accepted = listener.poll_accept();
            if accepted.is_some() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        let (_stream, peer) = accepted.expect("accepted");
        assert_eq!(*peer.ip(), Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn close_drops_the_socket() {
        let queue = InboundQueue::new();
        let config = Config::default();
        let mut listener = Listener::open(
            Handle::from_bits(0),
            any_addr(),
            false,
            None,
            None,
            &config,
            &queue.sink(),
        );
        listener.close();
        assert!(listener.local_addr().is_none());
        assert!(listener.poll_accept().is_none());
    }
}
