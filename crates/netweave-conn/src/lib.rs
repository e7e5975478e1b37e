#![warn(missing_docs)]

//! netweave-conn: connections and listeners over non-blocking TCP.
//!
//! A [`Connection`] composes the transport carrier (plain or TLS), the
//! per-connection receive ring, the frame assembler and an outbound message
//! queue into the state machine the context polls each tick. A [`Listener`]
//! accepts new sockets and hands them back for the context to wrap.

/// Non-blocking TCP socket plumbing and the plain/TLS carrier.
pub mod carrier;
/// The connection state machine.
pub mod connection;
/// Accept-only listen socket.
pub mod listener;
/// Outbound message queue with partial-write resume.
pub mod outbound;
/// TLS configuration and the non-blocking handshake drive.
pub mod tls;

pub use carrier::{Carrier, RecvOutcome};
pub use connection::{ConnState, Connection};
pub use listener::Listener;
pub use outbound::OutboundQueue;
pub use tls::{build_client_config, build_server_config, TlsSession};
