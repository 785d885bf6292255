//! Single-source, multi-subscriber frame fan-out
//!
//! A [`Broadcaster`] owns one bounded [`SubscriberQueue`] per subscriber.
//! Publishing never waits on a subscriber: a full queue drops its oldest
//! frame so slow viewers always see fresh data instead of a growing backlog.
//!
//! ```text
//!   SourceReader ──publish()──► Broadcaster ──┬─► [queue cap=5] ─► StreamSession
//!                                             ├─► [queue cap=5] ─► StreamSession
//!                                             └─► [queue cap=5] ─► DetectionAnnotator
//! ```

pub mod broadcaster;
pub mod queue;

pub use broadcaster::{Broadcaster, BroadcasterState, SubscriberId, Subscription};
pub use queue::{Delivery, PushOutcome, SubscriberQueue};

/// Terminal event delivered once to every subscriber of a dying broadcaster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// Upstream could not be reached after exhausting retries
    SourceUnavailable { reason: String },
    /// The broadcaster was shut down by the server
    Shutdown,
}

impl std::fmt::Display for StreamEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamEnd::SourceUnavailable { reason } => write!(f, "camera offline: {}", reason),
            StreamEnd::Shutdown => write!(f, "stream shut down"),
        }
    }
}
