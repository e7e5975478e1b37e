#![warn(missing_docs)]

//! netweave-core: foundational types and utilities.
//!
//! This crate provides the minimal set of core utilities shared across all
//! layers:
//! - Configuration types
//! - Error handling
//! - Protocol constants
//! - Stable handles and the handle pool
//!
//! Networking logic lives in the specialized crates:
//! - `netweave-protocol`: messages, the receive ring, frame reassembly
//! - `netweave-conn`: connections, listeners, transport and TLS
//! - `netweave-host`: the context that owns everything and drives the poll

/// Protocol constants shared across layers.
pub mod constants {
    /// Largest payload a single message may carry, in bytes.
    ///
    /// The on-wire length prefix is an unsigned 16-bit integer, so payloads
    /// cap at 65535 bytes.
    pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;
    /// Default capacity of the per-connection receive ring.
    pub const DEFAULT_INCOMING_BUFFER_SIZE: usize = 64 << 10;
    /// The size of the on-wire frame length prefix.
    pub const FRAME_PREFIX_SIZE: usize = 2;
    /// Default timeout for an outbound connect, in seconds.
    pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
}

/// Configuration options for the context and its sockets.
pub mod config;
/// Error types and results.
pub mod error;
/// Stable 16-bit handles and the fixed-capacity pool behind them.
pub mod handle;
/// Time source abstraction.
pub mod time;
/// URL tokenizer helper.
pub mod url;

pub use config::Config;
pub use error::{ErrorKind, Result};
pub use handle::{Handle, HandlePool};
pub use time::{Clock, ManualClock, SystemClock};
