use std::collections::VecDeque;

/// Bounded FIFO for payloads that could not be delivered yet. When full, the
/// oldest entry is evicted to make room, and the eviction is counted.
#[derive(Debug)]
pub struct OutboundQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
    dropped: u64,
}

#[derive(Default, Debug, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: usize,
    pub capacity: usize,
    pub dropped: u64,
}

impl<T> OutboundQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.items.len(),
            capacity: self.capacity,
            dropped: self.dropped,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Append `item`, returning whatever had to be evicted to stay within
    /// capacity.
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.capacity == 0 {
            self.dropped += 1;
            return Some(item);
        }
        let evicted = if self.items.len() >= self.capacity {
            self.dropped += 1;
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Put an item back at the head, e.g. after a failed delivery. The item is
    /// older than everything queued, so it is the one dropped when full.
    pub fn push_front(&mut self, item: T) -> Option<T> {
        if self.items.len() >= self.capacity {
            self.dropped += 1;
            return Some(item);
        }
        self.items.push_front(item);
        None
    }

    pub fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
