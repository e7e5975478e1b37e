use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

use netweave_core::Handle;

use crate::message::{Message, MessageId};

/// The single FIFO of inbound messages a context returns from `recv()`.
///
/// Producers hold cheap [`InboundSink`] clones; the context holds the queue
/// and drains it one message per `recv()` call.
#[derive(Debug)]
pub struct InboundQueue {
    tx: Sender<Message>,
    rx: Receiver<Message>,
}

impl InboundQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Returns a producer handle for pushing messages.
    pub fn sink(&self) -> InboundSink {
        InboundSink(self.tx.clone())
    }

    /// Pops the next message, if any. Never blocks.
    pub fn try_pop(&self) -> Option<Message> {
        match self.rx.try_recv() {
            Ok(msg) => Some(msg),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => unreachable!("queue owns a sender"),
        }
    }

    /// Number of messages waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns true when nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Discards everything waiting in the queue.
    pub fn clear(&self) {
        while self.try_pop().is_some() {}
    }
}

impl Default for InboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable producer side of the inbound queue.
#[derive(Clone, Debug)]
pub struct InboundSink(Sender<Message>);

impl InboundSink {
    /// Pushes a message onto the queue.
    pub fn push(&self, msg: Message) {
        self.0.send(msg).expect("inbound receiver must exist");
    }

    /// Pushes a one-byte lifecycle event.
    pub fn push_event(&self, handle: Handle, id: MessageId) {
        self.push(Message::event(handle, id));
    }
}
