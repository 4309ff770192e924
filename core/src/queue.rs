//! Bounded blocking queue handing demodulated messages to the consumer.

use std::sync::{Condvar, Mutex};

use log::debug;

use crate::frame::RawMessage;

/// Fixed-capacity FIFO of raw messages, shared between the demodulator
/// worker (producer) and whoever calls `recv` (consumer). Enqueueing into a
/// full queue drops the message; this link has no backpressure to offer a
/// remote sender anyway.
pub struct RecvQueue {
    inner: Mutex<Inner>,
    available: Condvar,
}

struct Inner {
    slots: Vec<RawMessage>,
    start: usize,
    size: usize,
}

impl RecvQueue {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            inner: Mutex::new(Inner {
                slots: vec![RawMessage::default(); capacity],
                start: 0,
                size: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueue a message, dropping it if the queue is full. Returns whether
    /// the message was accepted.
    pub fn push(&self, msg: &RawMessage) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.size == inner.slots.len() {
            debug!("receive queue overflow, dropping message");
            return false;
        }
        let index = (inner.start + inner.size) % inner.slots.len();
        inner.slots[index] = *msg;
        inner.size += 1;
        drop(inner);
        self.available.notify_one();
        true
    }

    /// Dequeue the oldest message, blocking until one arrives.
    pub fn pop(&self) -> RawMessage {
        let mut inner = self.inner.lock().unwrap();
        while inner.size == 0 {
            inner = self.available.wait(inner).unwrap();
        }
        let msg = inner.slots[inner.start];
        inner.start = (inner.start + 1) % inner.slots.len();
        inner.size -= 1;
        msg
    }

    /// Dequeue without blocking.
    pub fn try_pop(&self) -> Option<RawMessage> {
        let mut inner = self.inner.lock().unwrap();
        if inner.size == 0 {
            return None;
        }
        let msg = inner.slots[inner.start];
        inner.start = (inner.start + 1) % inner.slots.len();
        inner.size -= 1;
        Some(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn message(tag: u8) -> RawMessage {
        let mut msg = RawMessage::default();
        msg.symbols[0] = tag;
        msg.len = 1;
        msg
    }

    #[test]
    fn test_fifo_order() {
        let queue = RecvQueue::new(8);
        for tag in 0..5 {
            assert!(queue.push(&message(tag)));
        }
        for tag in 0..5 {
            assert_eq!(queue.pop().symbols[0], tag);
        }
    }

    #[test]
    fn test_overflow_drops_newest() {
        let queue = RecvQueue::new(4);
        for tag in 0..6 {
            queue.push(&message(tag));
        }
        // First four survive, last two were dropped.
        for tag in 0..4 {
            assert_eq!(queue.try_pop().unwrap().symbols[0], tag);
        }
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let queue = Arc::new(RecvQueue::new(2));
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop().symbols[0])
        };
        thread::sleep(std::time::Duration::from_millis(20));
        queue.push(&message(42));
        assert_eq!(consumer.join().unwrap(), 42);
    }

    #[test]
    fn test_wraparound_reuses_slots() {
        let queue = RecvQueue::new(2);
        for round in 0..10u8 {
            assert!(queue.push(&message(round)));
            assert_eq!(queue.pop().symbols[0], round);
        }
    }
}
