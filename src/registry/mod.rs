//! Broadcast registry
//!
//! The manager maps stream keys to broadcasters and owns the task feeding each
//! one. Raw broadcasters are fed by a source reader; annotated broadcasters are
//! fed by a detection annotator subscribed to the raw broadcaster of the same
//! source, so each source is read exactly once.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<BroadcastManager>
//!                   ┌───────────────────────────────┐
//!                   │ entries: HashMap<StreamKey,   │
//!                   │   BroadcasterEntry {          │
//!                   │     broadcaster,              │
//!                   │     task: Reader | Annotator, │
//!                   │   }                           │
//!                   │ >                             │
//!                   └──────────────┬────────────────┘
//!                                  │
//!      ┌───────────────────────────┼─────────────────────────────┐
//!      ▼                           ▼                             ▼
//! [SourceReader] ──publish──► [raw Broadcaster] ──queue──► [DetectionAnnotator]
//!                                  │                             │ publish
//!                                  ▼                             ▼
//!                           [StreamSession]           [annotated Broadcaster]
//!                                                                │
//!                                                                ▼
//!                                                         [StreamSession]
//! ```
//!
//! # Lifecycle
//!
//! Broadcasters are created on first subscribe. When the last subscriber
//! leaves, the broadcaster notifies the reaper, which removes it once the grace
//! period has passed without a new subscriber. A broadcaster terminated by its
//! source is removed as soon as the notice arrives.
//!
//! # Zero-Copy Design
//!
//! `bytes::Bytes` uses reference counting, so every subscriber queue shares the
//! same frame allocation.

pub mod config;
pub mod entry;
pub mod error;
pub mod frame;
pub mod store;

pub use config::RegistryConfig;
pub use entry::{BroadcasterEntry, BroadcasterStats, DebugStreams, PipelineTask};
pub use error::RegistryError;
pub use frame::{Frame, Pipeline, StreamKey};
pub use store::BroadcastManager;
