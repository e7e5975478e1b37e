//! Frame reassembly.
//!
//! Framed connections carry a little-endian `u16` length prefix before each
//! payload; raw connections carry an opaque stream. The assembler holds the
//! partial-frame state between poll ticks, so a prefix or body split across
//! any number of TCP reads resumes where it left off.

use byteorder::{ByteOrder, LittleEndian};

use netweave_core::{
    constants::{FRAME_PREFIX_SIZE, MAX_MESSAGE_SIZE},
    Handle,
};

use crate::{
    message::{Message, MessageId},
    queue::InboundSink,
    ring::RecvRing,
};

/// Where the assembler is inside the current frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    /// Waiting for the two-byte length prefix.
    AwaitingHeader,
    /// Waiting for this many body bytes.
    AwaitingBody(u16),
}

/// Per-connection reassembly state machine.
#[derive(Debug)]
pub struct Assembler {
    state: FrameState,
    raw: bool,
}

impl Assembler {
    /// Creates an assembler; `raw` selects the opaque-stream mode.
    pub fn new(raw: bool) -> Self {
        Self { state: FrameState::AwaitingHeader, raw }
    }

    /// Returns true for raw-mode connections.
    pub fn is_raw(&self) -> bool {
        self.raw
    }

    /// Consumes whatever complete messages the ring holds, pushing each to
    /// the inbound queue addressed to `handle`.
    pub fn drain(&mut self, handle: Handle, ring: &mut RecvRing, sink: &InboundSink) {
        if self.raw {
            self.drain_raw(handle, ring, sink);
        } else {
            self.drain_framed(handle, ring, sink);
        }
    }

    fn drain_framed(&mut self, handle: Handle, ring: &mut RecvRing, sink: &InboundSink) {
        loop {
            match self.state {
                FrameState::AwaitingHeader => {
                    if ring.available() < FRAME_PREFIX_SIZE {
                        return;
                    }
                    let mut prefix = [0u8; FRAME_PREFIX_SIZE];
                    ring.read_into(&mut prefix);
                    self.state = FrameState::AwaitingBody(LittleEndian::read_u16(&prefix));
                }
                FrameState::AwaitingBody(len) => {
                    let len = usize::from(len);
                    if ring.available() < len {
                        return;
                    }
                    if len == 0 {
                        // An empty frame still yields an event so the peer's
                        // framing stays observable; the id byte is the
                        // coercion floor.
                        sink.push(Message::event(handle, MessageId::UserDefined));
                    } else {
                        let mut msg = Message::incoming(handle, len);
                        ring.read_into(msg.data_mut());
                        let id = msg.data()[0];
                        msg.data_mut()[0] = MessageId::coerce(id);
                        sink.push(msg);
                    }
                    self.state = FrameState::AwaitingHeader;
                }
            }
        }
    }

    fn drain_raw(&mut self, handle: Handle, ring: &mut RecvRing, sink: &InboundSink) {
        let available = ring.available().min(MAX_MESSAGE_SIZE - 1);
        if available == 0 {
            return;
        }
        let mut msg = Message::incoming(handle, available + 1);
        msg.data_mut()[0] = MessageId::RawData as u8;
        ring.read_into(&mut msg.data_mut()[1..]);
        sink.push(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InboundQueue;

    fn setup(raw: bool) -> (Assembler, RecvRing, InboundQueue) {
        (Assembler::new(raw), RecvRing::with_capacity(64), InboundQueue::new())
    }

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![payload.len() as u8, (payload.len() >> 8) as u8];
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn whole_frame_in_one_tick() {
        let (mut asm, mut ring, queue) = setup(false);
        ring.fill(&frame(&[0x80, b'h', b'i']));
        asm.drain(Handle::INVALID, &mut ring, &queue.sink());

        let msg = queue.try_pop().unwrap();
        assert_eq!(msg.size(), 3);
        assert_eq!(msg.data(), &[0x80, b'h', b'i']);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn several_frames_in_one_tick_stay_ordered() {
        let (mut asm, mut ring, queue) = setup(false);
        ring.fill(&frame(&[0x10, 1]));
        ring.fill(&frame(&[0x11, 2]));
        ring.fill(&frame(&[0x12, 3]));
        asm.drain(Handle::INVALID, &mut ring, &queue.sink());

        for expected in [0x10u8, 0x11, 0x12] {
            assert_eq!(queue.try_pop().unwrap().id(), Some(expected));
        }
    }

    #[test]
    fn prefix_split_across_two_reads() {
        let (mut asm, mut ring, queue) = setup(false);
        let bytes = frame(&[0x42, b'x']);

        ring.fill(&bytes[..1]);
        asm.drain(Handle::INVALID, &mut ring, &queue.sink());
        assert!(queue.try_pop().is_none());

        ring.fill(&bytes[1..]);
        asm.drain(Handle::INVALID, &mut ring, &queue.sink());
        assert_eq!(queue.try_pop().unwrap().data(), &[0x42, b'x']);
    }

    #[test]
    fn body_split_into_single_byte_reads() {
        let (mut asm, mut ring, queue) = setup(false);
        let bytes = frame(&[0x99, 1, 2, 3, 4]);

        for &byte in &bytes {
            ring.fill(&[byte]);
            asm.drain(Handle::INVALID, &mut ring, &queue.sink());
        }

        let msg = queue.try_pop().unwrap();
        assert_eq!(msg.data(), &[0x99, 1, 2, 3, 4]);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn zero_length_frame_yields_coerced_id_byte() {
        let (mut asm, mut ring, queue) = setup(false);
        ring.fill(&[0, 0]);
        asm.drain(Handle::INVALID, &mut ring, &queue.sink());

        let msg = queue.try_pop().unwrap();
        assert_eq!(msg.size(), 1);
        assert_eq!(msg.id(), Some(MessageId::UserDefined as u8));
    }

    #[test]
    fn reserved_id_from_peer_is_coerced() {
        let (mut asm, mut ring, queue) = setup(false);
        ring.fill(&frame(&[0x00, b'x']));
        asm.drain(Handle::INVALID, &mut ring, &queue.sink());

        let msg = queue.try_pop().unwrap();
        assert_eq!(msg.data(), &[MessageId::UserDefined as u8, b'x']);
    }

    #[test]
    fn frame_straddling_the_ring_wrap_reassembles() {
        let mut asm = Assembler::new(false);
        let mut ring = RecvRing::with_capacity(8);
        let queue = InboundQueue::new();

        // Advance the cursors so the next frame wraps.
        ring.fill(b"abcdef");
        let mut scratch = [0u8; 6];
        ring.read_into(&mut scratch);

        let bytes = frame(&[0x77, 9, 8, 7]);
        assert_eq!(ring.fill(&bytes), bytes.len());
        asm.drain(Handle::INVALID, &mut ring, &queue.sink());

        assert_eq!(queue.try_pop().unwrap().data(), &[0x77, 9, 8, 7]);
    }

    #[test]
    fn raw_mode_wraps_each_tick_in_one_message() {
        let (mut asm, mut ring, queue) = setup(true);

        ring.fill(b"abc");
        asm.drain(Handle::INVALID, &mut ring, &queue.sink());
        ring.fill(b"def");
        asm.drain(Handle::INVALID, &mut ring, &queue.sink());

        let first = queue.try_pop().unwrap();
        assert_eq!(first.id(), Some(MessageId::RawData as u8));
        assert_eq!(&first.data()[1..], b"abc");

        let second = queue.try_pop().unwrap();
        assert_eq!(&second.data()[1..], b"def");
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn raw_mode_empty_tick_emits_nothing() {
        let (mut asm, mut ring, queue) = setup(true);
        asm.drain(Handle::INVALID, &mut ring, &queue.sink());
        assert!(queue.try_pop().is_none());
    }
}
