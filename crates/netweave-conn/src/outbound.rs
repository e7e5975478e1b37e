use std::collections::VecDeque;

use netweave_protocol::Message;

/// Outbound message queue with partial-write resume.
///
/// Messages drain in enqueue order. The cursor tracks how many bytes of the
/// front frame have already been handed to the socket, so a send split by
/// TCP flow control picks up exactly where it stopped on the next tick.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    queue: VecDeque<Message>,
    cursor: usize,
}

impl OutboundQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self { queue: VecDeque::new(), cursor: 0 }
    }

    /// Appends a message to the back.
    pub fn push(&mut self, msg: Message) {
        self.queue.push_back(msg);
    }

    /// The message currently draining, if any.
    pub fn front(&self) -> Option<&Message> {
        self.queue.front()
    }

    /// Mutable access to the draining message (for prefix sealing).
    pub fn front_mut(&mut self) -> Option<&mut Message> {
        self.queue.front_mut()
    }

    /// Removes the fully-sent front message and resets the cursor.
    pub fn pop_front(&mut self) -> Option<Message> {
        self.cursor = 0;
        self.queue.pop_front()
    }

    /// Bytes of the front frame already accepted by the socket.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Records `n` more bytes of the front frame as sent.
    pub fn advance_cursor(&mut self, n: usize) {
        self.cursor += n;
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns true when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drops every queued message.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.cursor = 0;
    }
}
