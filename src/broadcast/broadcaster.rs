//! Broadcaster: fans each published frame out to isolated subscriber queues

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::queue::{Delivery, PushOutcome, SubscriberQueue};
use super::StreamEnd;
use crate::registry::{Frame, StreamKey};

/// Opaque subscriber handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Lifecycle state of a broadcaster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcasterState {
    /// At least one subscriber attached
    Active,
    /// No subscribers, waiting for the grace period to run out
    GracePeriod,
    /// Terminal event sent; accepts no more subscribers or frames
    Terminated,
}

#[derive(Debug, Default)]
struct Inner {
    subscribers: HashMap<SubscriberId, Arc<SubscriberQueue>>,
    end: Option<StreamEnd>,
    idle_since: Option<Instant>,
}

/// Fan-out point for one stream
///
/// Only subscriber-set mutation takes the lock; frames themselves are
/// immutable and shared by reference count.
#[derive(Debug)]
pub struct Broadcaster {
    key: StreamKey,
    queue_capacity: usize,
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    last_seq: AtomicU64,
    published: AtomicU64,
    overruns: AtomicU64,
    notify_tx: Option<mpsc::UnboundedSender<StreamKey>>,
    created_at: Instant,
}

impl Broadcaster {
    /// Create a broadcaster whose subscribers get queues of `queue_capacity`
    pub fn new(key: StreamKey, queue_capacity: usize) -> Self {
        Self {
            key,
            queue_capacity,
            inner: Mutex::new(Inner::default()),
            next_id: AtomicU64::new(1),
            last_seq: AtomicU64::new(0),
            published: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            notify_tx: None,
            created_at: Instant::now(),
        }
    }

    /// Report the key on `tx` when the last subscriber leaves or on terminate
    pub fn with_notifier(mut self, tx: mpsc::UnboundedSender<StreamKey>) -> Self {
        self.notify_tx = Some(tx);
        self
    }

    fn notify(&self) {
        if let Some(tx) = &self.notify_tx {
            let _ = tx.send(self.key.clone());
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    /// Attach a new subscriber; only frames published after this call are seen
    ///
    /// Fails with the terminal reason once the broadcaster has terminated.
    pub fn subscribe(self: &Arc<Self>) -> Result<Subscription, StreamEnd> {
        let mut inner = self.lock();
        if let Some(end) = &inner.end {
            return Err(end.clone());
        }

        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let queue = Arc::new(SubscriberQueue::new(self.queue_capacity));
        inner.subscribers.insert(id, Arc::clone(&queue));
        inner.idle_since = None;

        tracing::debug!(
            stream = %self.key,
            subscriber = %id,
            subscribers = inner.subscribers.len(),
            "Subscriber added"
        );

        Ok(Subscription {
            id,
            queue,
            broadcaster: Arc::clone(self),
            attached: true,
        })
    }

    /// Detach a subscriber and release its queue
    ///
    /// Idempotent: returns false if the id was not attached.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let now_idle = {
            let mut inner = self.lock();
            let Some(queue) = inner.subscribers.remove(&id) else {
                return false;
            };
            queue.close();

            tracing::debug!(
                stream = %self.key,
                subscriber = %id,
                subscribers = inner.subscribers.len(),
                "Subscriber removed"
            );

            let idle = inner.subscribers.is_empty() && inner.end.is_none();
            if idle {
                inner.idle_since = Some(Instant::now());
            }
            idle
        };

        if now_idle {
            self.notify();
        }
        true
    }

    /// Publish a frame to every subscriber without blocking
    ///
    /// Frames whose sequence number does not advance are rejected so each
    /// subscriber observes a strictly increasing sequence. Returns the number
    /// of subscribers the frame was offered to.
    pub fn publish(&self, frame: Frame) -> usize {
        let inner = self.lock();
        if inner.end.is_some() {
            return 0;
        }

        let last = self.last_seq.load(Ordering::Relaxed);
        if frame.seq <= last {
            tracing::trace!(stream = %self.key, seq = frame.seq, last, "Out-of-order frame rejected");
            return 0;
        }
        self.last_seq.store(frame.seq, Ordering::Relaxed);
        self.published.fetch_add(1, Ordering::Relaxed);

        for queue in inner.subscribers.values() {
            if queue.push(frame.clone()) == PushOutcome::ReplacedOldest {
                self.overruns.fetch_add(1, Ordering::Relaxed);
            }
        }
        inner.subscribers.len()
    }

    /// Clear every queue, deliver `end` once per subscriber and stop accepting work
    ///
    /// Returns the number of subscribers notified; 0 if already terminated.
    pub fn terminate(&self, end: StreamEnd) -> usize {
        let notified = {
            let mut inner = self.lock();
            if inner.end.is_some() {
                return 0;
            }
            inner.end = Some(end.clone());
            inner.idle_since = None;

            let subscribers = std::mem::take(&mut inner.subscribers);
            for queue in subscribers.values() {
                queue.finish(end.clone());
            }
            subscribers.len()
        };

        tracing::info!(
            stream = %self.key,
            subscribers = notified,
            reason = %end,
            "Broadcaster terminated"
        );
        self.notify();
        notified
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn is_terminated(&self) -> bool {
        self.lock().end.is_some()
    }

    pub fn state(&self) -> BroadcasterState {
        let inner = self.lock();
        if inner.end.is_some() {
            BroadcasterState::Terminated
        } else if inner.subscribers.is_empty() {
            BroadcasterState::GracePeriod
        } else {
            BroadcasterState::Active
        }
    }

    /// How long the broadcaster has had zero subscribers, if it is idle
    pub fn idle_for(&self) -> Option<Duration> {
        let inner = self.lock();
        if inner.end.is_some() || !inner.subscribers.is_empty() {
            return None;
        }
        inner.idle_since.map(|since| since.elapsed())
    }

    /// Sequence number of the most recently published frame (0 before the first)
    pub fn last_seq(&self) -> u64 {
        self.last_seq.load(Ordering::Relaxed)
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Frames evicted from subscriber queues by drop-oldest
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }
}

/// A subscriber's handle on a broadcaster
///
/// Dropping the handle unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    queue: Arc<SubscriberQueue>,
    broadcaster: Arc<Broadcaster>,
    attached: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn key(&self) -> &StreamKey {
        self.broadcaster.key()
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Wait for the next frame or the terminal event
    ///
    /// Returns `None` after unsubscribe or once the terminal event was taken.
    pub async fn recv(&self) -> Option<Delivery> {
        self.queue.recv().await
    }

    /// Take the next queued item without waiting
    pub fn try_recv(&self) -> Option<Delivery> {
        self.queue.try_recv()
    }

    /// Number of frames waiting in this subscriber's queue
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn queued_seqs(&self) -> Vec<u64> {
        self.queue.queued_seqs()
    }

    /// Frames this subscriber lost to drop-oldest
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    /// Detach from the broadcaster; safe to call more than once
    pub fn unsubscribe(&mut self) -> bool {
        if !self.attached {
            return false;
        }
        self.attached = false;
        self.broadcaster.unsubscribe(self.id)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
