use byteorder::{ByteOrder, LittleEndian};

use netweave_core::{
    constants::{FRAME_PREFIX_SIZE, MAX_MESSAGE_SIZE},
    Handle,
};

/// First-byte identifiers of inbound messages.
///
/// Values below [`MessageId::UserDefined`] are reserved for lifecycle events
/// generated locally; a peer that puts one of them on the wire gets coerced
/// to `UserDefined` so it cannot forge lifecycle traffic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    /// A listener could not be created or bound.
    ListenFailed = 0,
    /// An outbound connect failed, timed out, or failed TLS verification.
    ConnectFailed = 1,
    /// An established connection was closed by the peer or an I/O error.
    LostConnection = 2,
    /// A new connection was accepted.
    /// Payload: `u16` listen handle, `u32` peer IPv4 (host order), `u16` port.
    IncomingConnection = 3,
    /// Delivered by `notify()`. Payload: `u64` user data.
    Notify = 4,
    /// Raw-mode payload: the bytes received this tick.
    RawData = 5,
    /// First id available to applications.
    UserDefined = 6,
}

impl MessageId {
    /// Maps a known id byte back to its variant.
    pub fn from_u8(byte: u8) -> Option<MessageId> {
        match byte {
            0 => Some(MessageId::ListenFailed),
            1 => Some(MessageId::ConnectFailed),
            2 => Some(MessageId::LostConnection),
            3 => Some(MessageId::IncomingConnection),
            4 => Some(MessageId::Notify),
            5 => Some(MessageId::RawData),
            6 => Some(MessageId::UserDefined),
            _ => None,
        }
    }

    /// Coerces peer-supplied id bytes out of the reserved range.
    pub fn coerce(byte: u8) -> u8 {
        if byte < MessageId::UserDefined as u8 {
            MessageId::UserDefined as u8
        } else {
            byte
        }
    }
}

/// Out-of-band control tag riding on an outbound message.
///
/// Control messages travel the outbound queue like any payload so they keep
/// their position relative to pending sends, but they are intercepted before
/// wire I/O.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Control {
    /// Ordinary payload, goes on the wire.
    #[default]
    None,
    /// Tear the connection down once every earlier send has drained.
    Disconnect,
    /// Deliver a local `MessageId::Notify` once every earlier send has
    /// drained.
    Notify,
}

/// A single inbound or outbound message.
///
/// Outbound messages reserve [`FRAME_PREFIX_SIZE`] bytes in front of the
/// payload; the little-endian length prefix is written there just before the
/// frame is handed to the socket, so framed sends need no extra copy.
/// Inbound messages carry only the payload.
#[derive(Debug)]
pub struct Message {
    handle: Handle,
    control: Control,
    buf: Vec<u8>,
    prefixed: bool,
}

impl Message {
    /// Allocates an outbound message with `size` payload bytes, zeroed.
    ///
    /// # Panics
    /// Panics if `size` exceeds [`MAX_MESSAGE_SIZE`].
    pub fn outgoing(handle: Handle, size: usize) -> Self {
        assert!(size <= MAX_MESSAGE_SIZE, "payload exceeds the 16-bit frame limit");
        Self { handle, control: Control::None, buf: vec![0; FRAME_PREFIX_SIZE + size], prefixed: true }
    }

    /// Allocates an inbound message with `size` payload bytes, zeroed.
    pub fn incoming(handle: Handle, size: usize) -> Self {
        assert!(size <= MAX_MESSAGE_SIZE, "payload exceeds the 16-bit frame limit");
        Self { handle, control: Control::None, buf: vec![0; size], prefixed: false }
    }

    /// One-byte inbound lifecycle event.
    pub fn event(handle: Handle, id: MessageId) -> Self {
        let mut msg = Self::incoming(handle, 1);
        msg.buf[0] = id as u8;
        msg
    }

    /// Outbound marker that closes the connection after pending sends drain.
    pub fn disconnect_marker(handle: Handle) -> Self {
        let mut msg = Self::outgoing(handle, 0);
        msg.control = Control::Disconnect;
        msg
    }

    /// Outbound marker that echoes `user_data` back through the inbound
    /// queue after pending sends drain.
    pub fn notify_marker(handle: Handle, user_data: u64) -> Self {
        let mut msg = Self::outgoing(handle, 8);
        msg.control = Control::Notify;
        LittleEndian::write_u64(msg.data_mut(), user_data);
        msg
    }

    /// Inbound `Notify` event carrying `user_data`.
    pub fn notify_event(handle: Handle, user_data: u64) -> Self {
        let mut msg = Self::incoming(handle, 9);
        msg.buf[0] = MessageId::Notify as u8;
        LittleEndian::write_u64(&mut msg.buf[1..9], user_data);
        msg
    }

    /// Inbound `IncomingConnection` event for a freshly accepted peer.
    pub fn incoming_connection(handle: Handle, listen: Handle, ip: u32, port: u16) -> Self {
        let mut msg = Self::incoming(handle, 9);
        msg.buf[0] = MessageId::IncomingConnection as u8;
        LittleEndian::write_u16(&mut msg.buf[1..3], listen.bits());
        LittleEndian::write_u32(&mut msg.buf[3..7], ip);
        LittleEndian::write_u16(&mut msg.buf[7..9], port);
        msg
    }

    /// The connection (or listener) this message belongs to.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        if self.prefixed {
            self.buf.len() - FRAME_PREFIX_SIZE
        } else {
            self.buf.len()
        }
    }

    /// Payload bytes.
    pub fn data(&self) -> &[u8] {
        if self.prefixed {
            &self.buf[FRAME_PREFIX_SIZE..]
        } else {
            &self.buf
        }
    }

    /// Mutable payload bytes.
    pub fn data_mut(&mut self) -> &mut [u8] {
        if self.prefixed {
            &mut self.buf[FRAME_PREFIX_SIZE..]
        } else {
            &mut self.buf
        }
    }

    /// First payload byte, the message id. `None` for empty payloads.
    pub fn id(&self) -> Option<u8> {
        self.data().first().copied()
    }

    /// The control tag, if any.
    pub fn control(&self) -> Control {
        self.control
    }

    /// Parses the `u64` payload of an inbound `Notify` event.
    pub fn notify_payload(&self) -> Option<u64> {
        if self.id() != Some(MessageId::Notify as u8) || self.size() != 9 {
            return None;
        }
        Some(LittleEndian::read_u64(&self.data()[1..9]))
    }

    /// Parses the payload of an `IncomingConnection` event into
    /// `(listen handle, ip, port)`.
    pub fn incoming_connection_fields(&self) -> Option<(Handle, u32, u16)> {
        if self.id() != Some(MessageId::IncomingConnection as u8) || self.size() != 9 {
            return None;
        }
        let data = self.data();
        Some((
            Handle::from_bits(LittleEndian::read_u16(&data[1..3])),
            LittleEndian::read_u32(&data[3..7]),
            LittleEndian::read_u16(&data[7..9]),
        ))
    }

    /// Writes the little-endian length prefix into the reserved slot.
    ///
    /// # Panics
    /// Panics on inbound messages, which have no prefix slot.
    pub fn seal_frame(&mut self) {
        assert!(self.prefixed, "only outbound messages carry a prefix slot");
        let size = self.size() as u16;
        LittleEndian::write_u16(&mut self.buf[..FRAME_PREFIX_SIZE], size);
    }

    /// The full frame: sealed prefix plus payload.
    pub fn framed_bytes(&self) -> &[u8] {
        debug_assert!(self.prefixed);
        &self.buf
    }
}
