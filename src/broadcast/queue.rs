//! Bounded per-subscriber queue with drop-oldest backpressure

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use super::StreamEnd;
use crate::registry::Frame;

/// Item handed to a subscriber
#[derive(Debug, Clone)]
pub enum Delivery {
    /// Next frame in sequence order
    Frame(Frame),
    /// The stream ended; no further items follow
    End(StreamEnd),
}

/// Result of pushing into a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Frame appended
    Queued,
    /// Queue was full, oldest frame evicted to make room
    ReplacedOldest,
    /// Queue no longer accepts frames
    Closed,
}

#[derive(Debug, Default)]
struct QueueState {
    frames: VecDeque<Frame>,
    end: Option<StreamEnd>,
    closed: bool,
    dropped: u64,
}

/// Bounded FIFO of frames consumed by exactly one subscriber
///
/// Producers never wait. The consumer suspends in [`recv`](Self::recv) until a
/// frame or the terminal event arrives.
#[derive(Debug)]
pub struct SubscriberQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl SubscriberQueue {
    /// Create a queue holding at most `capacity` frames (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a frame without blocking, evicting the oldest one when full
    pub fn push(&self, frame: Frame) -> PushOutcome {
        let outcome = {
            let mut state = self.lock();
            if state.closed || state.end.is_some() {
                return PushOutcome::Closed;
            }

            let outcome = if state.frames.len() >= self.capacity {
                state.frames.pop_front();
                state.dropped += 1;
                PushOutcome::ReplacedOldest
            } else {
                PushOutcome::Queued
            };
            state.frames.push_back(frame);
            outcome
        };

        // Single consumer: a stored permit covers a push racing with recv()
        self.notify.notify_one();
        outcome
    }

    /// Discard queued frames and deliver `end` as the final item
    pub fn finish(&self, end: StreamEnd) {
        {
            let mut state = self.lock();
            if state.closed || state.end.is_some() {
                return;
            }
            state.frames.clear();
            state.end = Some(end);
        }
        self.notify.notify_one();
    }

    /// Close the queue after unsubscribe; pending frames are released
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.frames.clear();
        }
        self.notify.notify_one();
    }

    /// Take the next item if one is available
    pub fn try_recv(&self) -> Option<Delivery> {
        let mut state = self.lock();
        if let Some(frame) = state.frames.pop_front() {
            return Some(Delivery::Frame(frame));
        }
        if let Some(end) = state.end.take() {
            state.closed = true;
            return Some(Delivery::End(end));
        }
        None
    }

    /// Wait for the next item
    ///
    /// Returns `None` once the queue is closed and fully drained.
    pub async fn recv(&self) -> Option<Delivery> {
        loop {
            if let Some(item) = self.try_recv() {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }
            self.notify.notified().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of frames currently queued
    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames evicted by drop-oldest so far
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    /// Sequence numbers currently queued, oldest first
    pub fn queued_seqs(&self) -> Vec<u64> {
        self.lock().frames.iter().map(|f| f.seq).collect()
    }
}
