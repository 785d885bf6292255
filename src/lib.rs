//! Camera stream fan-out with on-demand object detection
//!
//! One reader per camera feeds a broadcaster; any number of viewers subscribe
//! to it, each through a bounded queue that drops the oldest frame when the
//! viewer falls behind. Annotated pipelines subscribe to the same raw
//! broadcaster, run a detector at a bounded rate and publish frames with
//! boxes drawn on them. A background worker samples cameras to keep parking
//! zone occupancy up to date.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use parkcast::occupancy::MemoryStore;
//! use parkcast::registry::{BroadcastManager, RegistryConfig};
//! use parkcast::server::{ParkcastServer, ServerConfig};
//! use parkcast::source::{DefaultSourceFactory, SourceConfig};
//!
//! # async fn run() -> parkcast::Result<()> {
//! let sources = Arc::new(DefaultSourceFactory::new(SourceConfig::default())?);
//! let manager = Arc::new(BroadcastManager::new(RegistryConfig::default(), sources, None));
//! let cameras = HashMap::from([("lot-a".to_string(), "http://10.0.0.12/stream".to_string())]);
//!
//! let server = ParkcastServer::new(ServerConfig::default(), manager, cameras, Arc::new(MemoryStore::new()));
//! server.run().await
//! # }
//! ```

pub mod broadcast;
pub mod codec;
pub mod config;
pub mod detect;
pub mod error;
pub mod occupancy;
pub mod registry;
pub mod server;
pub mod session;
pub mod source;
pub mod stats;

pub use broadcast::{Broadcaster, StreamEnd, Subscription};
pub use config::AppConfig;
pub use detect::{Detection, Detector, HttpDetector};
pub use error::{Error, Result};
pub use registry::{BroadcastManager, Frame, StreamKey};
pub use server::{ParkcastServer, ServerConfig};
