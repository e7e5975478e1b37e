#![warn(missing_docs)]

//! Netweave: a small public API facade for the workspace.
//!
//! This crate provides a clean, stable surface that re-exports the types a
//! message-oriented TCP application needs:
//!
//! - The context and its poll loop (`Context`)
//! - Messages and their id space (`Message`, `MessageId`, `Handle`)
//! - Core configuration (`Config`)
//! - Helpers (`to_ipv4`, `tokenize_url`)
//!
//! Example
//! ```no_run
//! use netweave::{Config, Context, Message, MessageId};
//!
//! let mut ctx = Context::new(Config::default()).unwrap();
//! let server = ctx.connect("127.0.0.1".parse().unwrap(), 1389, false, false);
//!
//! // First byte is the message id; application ids start at UserDefined.
//! let mut msg = Message::outgoing(server, 3);
//! msg.data_mut().copy_from_slice(&[MessageId::UserDefined as u8, b'h', b'i']);
//! ctx.send(msg);
//!
//! // Poll until something arrives.
//! loop {
//!     if let Some(incoming) = ctx.recv() {
//!         println!("id {:?} from {:?}", incoming.id(), incoming.handle());
//!         break;
//!     }
//! }
//! ```

// Core config and handles
pub use netweave_core::{Clock, Config, Handle, ManualClock, SystemClock};
// URL helper
pub use netweave_core::url::{tokenize_url, UrlParts};
// Messages
pub use netweave_protocol::{Message, MessageId};
// Context: owns connections/listeners and drives the poll
pub use netweave_host::{to_ipv4, Context};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{Config, Context, Handle, Message, MessageId};
}
