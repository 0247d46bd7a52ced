use serde::Serialize;

/// Contiguous run of message ids accumulated for one queue since its last close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Slot {
    start_message_id: u64,
    end_message_id: u64,
    message_count: u64,
}

impl Slot {
    /// Open a slot holding a single message.
    pub fn open(message_id: u64) -> Self {
        Self {
            start_message_id: message_id,
            end_message_id: message_id,
            message_count: 1,
        }
    }

    /// Add one message. Returns `false` when `message_id` does not advance the
    /// slot; the message is still counted but `end` is left where it was so
    /// `start <= end` keeps holding.
    pub fn append(&mut self, message_id: u64) -> bool {
        self.message_count += 1;
        if message_id > self.end_message_id {
            self.end_message_id = message_id;
            true
        } else {
            false
        }
    }

    pub fn start_message_id(&self) -> u64 {
        self.start_message_id
    }

    pub fn end_message_id(&self) -> u64 {
        self.end_message_id
    }

    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    pub fn is_full(&self, window_size: u64) -> bool {
        self.message_count >= window_size
    }
}
