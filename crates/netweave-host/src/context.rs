use std::{
    net::{Ipv4Addr, SocketAddrV4},
    sync::Arc,
    time::Instant,
};

use tracing::warn;

use netweave_conn::{build_client_config, Connection, Listener};
use netweave_core::{Clock, Config, Handle, HandlePool, Result, SystemClock};
use netweave_protocol::{InboundQueue, InboundSink, Message};

/// The single-threaded multiplexer owning every connection and listener.
///
/// All operations must run on the thread that calls [`Context::recv`]; there
/// is no internal locking. Every failure a caller can observe arrives as a
/// message on the inbound queue, never as a panic or error return.
pub struct Context {
    config: Config,
    clock: Arc<dyn Clock>,
    connections: HandlePool<Connection>,
    listeners: HandlePool<Listener>,
    inbound: InboundQueue,
    sink: InboundSink,
    tls_client: Arc<rustls::ClientConfig>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("connections", &self.connections.len())
            .field("listeners", &self.listeners.len())
            .field("inbound", &self.inbound.len())
            .finish()
    }
}

impl Context {
    /// Creates a context from `config`.
    ///
    /// Fails only when the TLS client configuration cannot be built from
    /// `config.trusted_certificates`.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a context with a custom time source, for tests.
    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let tls_client = build_client_config(&config.trusted_certificates)?;
        let inbound = InboundQueue::new();
        let sink = inbound.sink();
        Ok(Self {
            connections: HandlePool::with_capacity(config.max_connections),
            listeners: HandlePool::with_capacity(config.max_listeners),
            inbound,
            sink,
            tls_client,
            clock,
            config,
        })
    }

    /// Destroys every connection and listener and drains the inbound queue.
    ///
    /// No inbound events are delivered after shutdown.
    pub fn shutdown(&mut self) {
        for handle in self.connections.handles() {
            if let Some(mut conn) = self.connections.remove(handle) {
                conn.teardown();
            }
        }
        for handle in self.listeners.handles() {
            if let Some(mut listener) = self.listeners.remove(handle) {
                listener.close();
            }
        }
        self.inbound.clear();
    }

    /// Opens a listener on `ip:port`.
    ///
    /// Returns the listener handle, or the invalid handle when the pool is
    /// exhausted. Bind, listen and TLS configuration failures surface as a
    /// `ListenFailed` message carrying the returned handle.
    pub fn listen(
        &mut self,
        ip: Ipv4Addr,
        port: u16,
        raw: bool,
        cert: Option<&str>,
        key: Option<&str>,
    ) -> Handle {
        let addr = SocketAddrV4::new(ip, port);
        let config = &self.config;
        let sink = &self.sink;
        match self
            .listeners
            .insert_with(|handle| Listener::open(handle, addr, raw, cert, key, config, sink))
        {
            Some(handle) => handle,
            None => {
                warn!(%addr, "listener pool exhausted");
                Handle::INVALID
            }
        }
    }

    /// Closes a listener and releases its handle.
    pub fn stop(&mut self, handle: Handle) {
        if let Some(mut listener) = self.listeners.remove(handle) {
            listener.close();
        }
    }

    /// Starts an outbound connection to `ip:port`.
    ///
    /// Returns the connection handle, or the invalid handle when the pool is
    /// exhausted. Connect failures surface as a `ConnectFailed` message
    /// carrying the returned handle.
    pub fn connect(&mut self, ip: Ipv4Addr, port: u16, raw: bool, secure: bool) -> Handle {
        let addr = SocketAddrV4::new(ip, port);
        let now = self.clock.now();
        let tls = secure.then(|| self.tls_client.clone());
        let config = &self.config;
        let sink = &self.sink;
        match self.connections.insert_with(|handle| {
            Connection::connect(handle, addr, raw, tls, config, now, sink)
        }) {
            Some(handle) => handle,
            None => {
                warn!(%addr, "connection pool exhausted");
                Handle::INVALID
            }
        }
    }

    /// Disconnects `handle`.
    ///
    /// With `finish`, a disconnect marker is queued behind pending sends so
    /// they drain first; without it the connection is torn down immediately.
    /// Neither form pushes a `LostConnection`.
    pub fn disconnect(&mut self, handle: Handle, finish: bool) {
        let now = self.clock.now();
        let Some(conn) = self.connections.get_mut(handle) else { return };

        if finish && !conn.is_defunct() {
            let sink = self.sink.clone();
            conn.send(Message::disconnect_marker(handle), now, &sink);
            // The marker may have drained on the eager update.
            if self.connections.get(handle).is_some_and(|c| c.is_defunct()) {
                self.connections.remove(handle);
            }
        } else {
            conn.teardown();
            self.connections.remove(handle);
        }
    }

    /// Sends an owned message to its handle's connection.
    ///
    /// A message addressed to the invalid handle loops back onto the inbound
    /// queue. Messages for unknown or stale handles are dropped.
    pub fn send(&mut self, msg: Message) {
        if !msg.handle().is_valid() {
            self.sink.push(msg);
            return;
        }
        let now = self.clock.now();
        let sink = self.sink.clone();
        match self.connections.get_mut(msg.handle()) {
            Some(conn) => conn.send(msg, now, &sink),
            None => warn!(handle = ?msg.handle(), "send to unknown handle dropped"),
        }
    }

    /// Queues a notify marker on `handle`, or loops it back when invalid.
    ///
    /// The marker is re-delivered as a `MessageId::Notify` inbound message
    /// once every send queued before it has reached the wire.
    pub fn notify(&mut self, handle: Handle, user_data: u64) {
        if !handle.is_valid() {
            self.sink.push(Message::notify_event(Handle::INVALID, user_data));
            return;
        }
        let now = self.clock.now();
        let sink = self.sink.clone();
        match self.connections.get_mut(handle) {
            Some(conn) => conn.send(Message::notify_marker(handle, user_data), now, &sink),
            None => warn!(handle = ?handle, "notify on unknown handle dropped"),
        }
    }

    /// Drives one poll tick, then returns the next inbound message.
    ///
    /// Listeners accept before connections read; each connection performs at
    /// most one receive syscall and drains its outbound queue
    /// opportunistically. Never blocks.
    pub fn recv(&mut self) -> Option<Message> {
        let now = self.clock.now();

        for handle in self.listeners.handles() {
            let accepted = match self.listeners.get_mut(handle) {
                Some(listener) => listener
                    .poll_accept()
                    .map(|(stream, peer)| (stream, peer, listener.raw(), listener.tls())),
                None => None,
            };
            if let Some((stream, peer, raw, tls)) = accepted {
                self.adopt(handle, stream, peer, raw, tls, now);
            }
        }

        for handle in self.connections.handles() {
            if let Some(conn) = self.connections.get_mut(handle) {
                conn.update(now, &self.sink);
                if conn.is_defunct() {
                    self.connections.remove(handle);
                }
            }
        }

        self.inbound.try_pop()
    }

    fn adopt(
        &mut self,
        listen: Handle,
        stream: std::net::TcpStream,
        peer: SocketAddrV4,
        raw: bool,
        tls: Option<Arc<rustls::ServerConfig>>,
        now: Instant,
    ) {
        let config = &self.config;
        let sink = &self.sink;
        let inserted = self.connections.insert_with(|handle| {
            Connection::accepted(handle, listen, stream, peer, raw, tls, config, now, sink)
        });
        if inserted.is_none() {
            warn!(%peer, "connection pool exhausted; dropping accepted socket");
        }
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Local address of a listener, useful after binding port 0.
    pub fn listener_local_addr(&self, handle: Handle) -> Option<SocketAddrV4> {
        self.listeners.get(handle)?.local_addr()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.shutdown();
    }
}
