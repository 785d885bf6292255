//! Viewer session: one subscription bridged to one transport
//!
//! The session is the only place a viewer disconnect is observed. On close,
//! write failure or write timeout it unsubscribes first and only then releases
//! the transport, so no frame is queued for a viewer that is gone.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::{Instant, MissedTickBehavior};

use super::config::{SessionConfig, SessionMode, MIN_TICK};
use super::message::ViewerMessage;
use crate::broadcast::{Delivery, StreamEnd, Subscription};
use crate::stats::SessionStats;

/// Outbound half of a viewer connection
pub trait Transport: Send {
    fn send<'a>(&'a mut self, message: &'a ViewerMessage) -> BoxFuture<'a, Result<(), TransportError>>;

    /// Close the connection; best effort
    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// Transport write failure
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("transport error: {0}")]
    Io(String),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The viewer closed the connection
    ClientClosed,
    /// A write returned an error
    WriteFailed,
    /// A write did not complete within the timeout
    WriteTimeout,
    /// The stream terminated upstream
    SourceEnded(StreamEnd),
    /// The subscription was closed underneath the session
    Unsubscribed,
}

impl SessionEnd {
    /// True for the ordinary ways a viewer goes away
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            SessionEnd::ClientClosed | SessionEnd::WriteFailed | SessionEnd::WriteTimeout
        )
    }
}

/// Final accounting for a session
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: u64,
    pub end: SessionEnd,
    pub delivered: u64,
    pub skipped: u64,
    pub bytes_sent: u64,
    pub duration: Duration,
}

/// Drops frames that arrive faster than the session fps
#[derive(Debug)]
struct Pacer {
    interval: Duration,
    tolerance: Duration,
    next_due: Option<Instant>,
}

impl Pacer {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            tolerance: interval / 8,
            next_due: None,
        }
    }

    /// Whether a frame arriving at `now` may be sent
    fn admit(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(due) if now + self.tolerance < due => false,
            Some(due) => {
                let floor = now.checked_sub(self.tolerance).unwrap_or(now);
                self.next_due = Some(due.max(floor) + self.interval);
                true
            }
            None => {
                self.next_due = Some(now + self.interval);
                true
            }
        }
    }
}

/// One viewer connection
pub struct StreamSession {
    id: u64,
    config: SessionConfig,
    subscription: Subscription,
    stats: SessionStats,
}

impl StreamSession {
    pub fn new(id: u64, config: SessionConfig, subscription: Subscription) -> Self {
        Self {
            id,
            config,
            subscription,
            stats: SessionStats::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Forward frames until the viewer leaves or the stream ends
    ///
    /// `disconnected` resolves when the peer closes its side of the connection.
    pub async fn run<T, D>(mut self, mut transport: T, disconnected: D) -> SessionSummary
    where
        T: Transport,
        D: Future<Output = ()>,
    {
        tokio::pin!(disconnected);

        let mut pacer = match self.config.mode {
            SessionMode::Raw => Some(Pacer::new(self.config.frame_interval())),
            SessionMode::Detect => None,
        };
        let period = self.config.stats_interval.max(MIN_TICK);
        let mut stats_tick = tokio::time::interval_at(Instant::now() + period, period);
        stats_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            session_id = self.id,
            stream = %self.subscription.key(),
            "Session opened"
        );

        let end = loop {
            tokio::select! {
                biased;
                _ = &mut disconnected => break SessionEnd::ClientClosed,
                item = self.subscription.recv() => match item {
                    Some(Delivery::Frame(frame)) => {
                        self.stats.observe_seq(frame.seq);
                        if let Some(pacer) = pacer.as_mut() {
                            if !pacer.admit(Instant::now()) {
                                self.stats.record_paced();
                                continue;
                            }
                        }
                        let message = ViewerMessage::frame(&frame);
                        if let Err(end) = self.write(&mut transport, &message, disconnected.as_mut()).await {
                            break end;
                        }
                        self.stats.record_sent(frame.size());
                    }
                    Some(Delivery::End(reason)) => {
                        let message = ViewerMessage::error(reason.to_string());
                        let _ = self.write(&mut transport, &message, disconnected.as_mut()).await;
                        break SessionEnd::SourceEnded(reason);
                    }
                    None => break SessionEnd::Unsubscribed,
                },
                _ = stats_tick.tick() => {
                    let message = ViewerMessage::Stats {
                        processed: self.stats.delivered,
                        skipped: self.stats.skipped(),
                        fps: self.stats.take_window_fps(),
                    };
                    if let Err(end) = self.write(&mut transport, &message, disconnected.as_mut()).await {
                        break end;
                    }
                }
            }
        };

        // Release the queue before the connection
        self.subscription.unsubscribe();
        let _ = tokio::time::timeout(self.config.write_timeout, transport.close()).await;

        let summary = SessionSummary {
            id: self.id,
            end,
            delivered: self.stats.delivered,
            skipped: self.stats.skipped(),
            bytes_sent: self.stats.bytes_sent,
            duration: self.stats.duration(),
        };

        if summary.end.is_disconnect() {
            tracing::debug!(
                session_id = summary.id,
                end = ?summary.end,
                delivered = summary.delivered,
                skipped = summary.skipped,
                "Viewer disconnected"
            );
        } else {
            tracing::info!(
                session_id = summary.id,
                end = ?summary.end,
                delivered = summary.delivered,
                skipped = summary.skipped,
                "Session closed"
            );
        }
        summary
    }

    /// Write one message, racing the disconnect signal and the write timeout
    async fn write<T, D>(
        &self,
        transport: &mut T,
        message: &ViewerMessage,
        disconnected: Pin<&mut D>,
    ) -> Result<(), SessionEnd>
    where
        T: Transport,
        D: Future<Output = ()>,
    {
        let timeout = self.config.write_timeout;
        tokio::select! {
            biased;
            _ = disconnected => Err(SessionEnd::ClientClosed),
            result = tokio::time::timeout(timeout, transport.send(message)) => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    tracing::debug!(session_id = self.id, error = %e, "Write failed");
                    Err(SessionEnd::WriteFailed)
                }
                Err(_) => {
                    tracing::debug!(session_id = self.id, timeout_ms = timeout.as_millis() as u64, "Write timed out");
                    Err(SessionEnd::WriteTimeout)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use tokio::sync::{mpsc, oneshot};

    use super::*;
    use crate::broadcast::Broadcaster;
    use crate::registry::{Frame, StreamKey};
    use crate::session::config::{SessionDefaults, StreamQuery};

    /// Records messages; optionally stalls forever after `stall_after` sends
    struct MockTransport {
        tx: mpsc::UnboundedSender<ViewerMessage>,
        stall_after: Option<usize>,
        sent: usize,
        closed: Arc<std::sync::atomic::AtomicBool>,
    }

    impl Transport for MockTransport {
        fn send<'a>(&'a mut self, message: &'a ViewerMessage) -> BoxFuture<'a, Result<(), TransportError>> {
            Box::pin(async move {
                if self.stall_after.is_some_and(|n| self.sent >= n) {
                    futures::future::pending::<()>().await;
                }
                self.sent += 1;
                self.tx.send(message.clone()).map_err(|_| TransportError::Closed)
            })
        }

        fn close(&mut self) -> BoxFuture<'_, ()> {
            self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
            Box::pin(async {})
        }
    }

    fn transport(stall_after: Option<usize>) -> (MockTransport, mpsc::UnboundedReceiver<ViewerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let t = MockTransport {
            tx,
            stall_after,
            sent: 0,
            closed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        };
        (t, rx)
    }

    fn config(mode: SessionMode, fps: Option<u32>) -> SessionConfig {
        let defaults = SessionDefaults::default()
            .stats_interval(Duration::from_secs(1))
            .write_timeout(Duration::from_millis(200));
        let query = StreamQuery {
            fps,
            ..Default::default()
        };
        SessionConfig::from_query(mode, &query, &defaults).unwrap()
    }

    fn frame(seq: u64) -> Frame {
        Frame::new(seq, Bytes::from_static(b"jpeg"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_then_terminal_error() {
        let bc = Arc::new(Broadcaster::new(StreamKey::raw("test://cam"), 5));
        let session = StreamSession::new(1, config(SessionMode::Detect, None), bc.subscribe().unwrap());
        let (transport, mut rx) = transport(None);
        let task = tokio::spawn(session.run(transport, futures::future::pending::<()>()));

        for seq in 1..=3 {
            bc.publish(frame(seq));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        bc.terminate(StreamEnd::SourceUnavailable {
            reason: "connection refused".into(),
        });

        let summary = task.await.unwrap();
        assert!(matches!(summary.end, SessionEnd::SourceEnded(_)));
        assert_eq!(summary.delivered, 3);

        let mut messages = Vec::new();
        while let Ok(m) = rx.try_recv() {
            messages.push(m);
        }
        assert_eq!(messages.len(), 4);
        assert!(matches!(messages[0], ViewerMessage::Frame { seq: 1, .. }));
        assert_eq!(
            messages[3],
            ViewerMessage::error("camera offline: connection refused")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_unsubscribes_before_close() {
        let bc = Arc::new(Broadcaster::new(StreamKey::raw("test://cam"), 5));
        let session = StreamSession::new(2, config(SessionMode::Detect, None), bc.subscribe().unwrap());
        let (transport, _rx) = transport(None);
        let closed = Arc::clone(&transport.closed);
        let (hangup, disconnected) = oneshot::channel::<()>();

        let task = tokio::spawn(session.run(transport, async move {
            let _ = disconnected.await;
        }));
        bc.publish(frame(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bc.subscriber_count(), 1);

        hangup.send(()).unwrap();
        let summary = task.await.unwrap();

        assert_eq!(summary.end, SessionEnd::ClientClosed);
        assert!(summary.end.is_disconnect());
        assert_eq!(bc.subscriber_count(), 0);
        assert!(closed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_write_times_out() {
        let bc = Arc::new(Broadcaster::new(StreamKey::raw("test://cam"), 5));
        let session = StreamSession::new(3, config(SessionMode::Detect, None), bc.subscribe().unwrap());
        let (transport, _rx) = transport(Some(1));
        let task = tokio::spawn(session.run(transport, futures::future::pending::<()>()));

        bc.publish(frame(1));
        bc.publish(frame(2));

        let summary = task.await.unwrap();
        assert_eq!(summary.end, SessionEnd::WriteTimeout);
        assert_eq!(summary.delivered, 1);
        assert_eq!(bc.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_stats_interval_still_runs() {
        let bc = Arc::new(Broadcaster::new(StreamKey::raw("test://cam"), 5));
        let mut config = config(SessionMode::Detect, None);
        config.stats_interval = Duration::ZERO;
        let session = StreamSession::new(5, config, bc.subscribe().unwrap());
        let (transport, _rx) = transport(None);
        let task = tokio::spawn(session.run(transport, futures::future::pending::<()>()));

        bc.publish(frame(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        bc.terminate(StreamEnd::Shutdown);

        let summary = task.await.unwrap();
        assert!(matches!(summary.end, SessionEnd::SourceEnded(_)));
        assert_eq!(summary.delivered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_raw_session_paces_and_reports_stats() {
        let bc = Arc::new(Broadcaster::new(StreamKey::raw("test://cam"), 5));
        let session = StreamSession::new(4, config(SessionMode::Raw, Some(10)), bc.subscribe().unwrap());
        let (transport, mut rx) = transport(None);
        let (hangup, disconnected) = oneshot::channel::<()>();
        let task = tokio::spawn(session.run(transport, async move {
            let _ = disconnected.await;
        }));

        // 30 fps for 2 seconds
        let period = Duration::from_secs_f64(1.0 / 30.0);
        for seq in 1..=60 {
            bc.publish(frame(seq));
            tokio::time::sleep(period).await;
        }
        // Let the second stats tick fire
        tokio::time::sleep(Duration::from_millis(50)).await;
        hangup.send(()).unwrap();
        let summary = task.await.unwrap();

        assert!((19..=21).contains(&summary.delivered), "delivered {}", summary.delivered);
        assert_eq!(summary.delivered + summary.skipped, 60);

        let mut stats = Vec::new();
        while let Ok(m) = rx.try_recv() {
            if let ViewerMessage::Stats { processed, fps, .. } = m {
                stats.push((processed, fps));
            }
        }
        assert_eq!(stats.len(), 2);
        assert!((stats[0].1 - 10.0).abs() <= 1.5, "fps {}", stats[0].1);
    }
}
