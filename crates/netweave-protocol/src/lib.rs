#![warn(missing_docs)]

//! netweave-protocol: messages and the byte-stream machinery around them.
//!
//! A connection's receive path flows through this crate: bytes land in a
//! [`RecvRing`], the [`Assembler`] cuts them into length-prefixed frames (or
//! wraps them whole in raw mode), and finished [`Message`]s are pushed into
//! the shared [`InboundQueue`] the host drains through `recv()`.

/// Frame reassembly for framed and raw connections.
pub mod framing;
/// Message records and the inbound message id space.
pub mod message;
/// The shared inbound event queue and its producer sink.
pub mod queue;
/// Per-connection receive ring buffer.
pub mod ring;

pub use framing::{Assembler, FrameState};
pub use message::{Control, Message, MessageId};
pub use queue::{InboundQueue, InboundSink};
pub use ring::RecvRing;
