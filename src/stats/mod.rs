//! Runtime statistics

pub mod metrics;

pub use metrics::{
    AnnotatorSnapshot, AnnotatorStats, ServerSnapshot, ServerStats, SessionStats,
};
