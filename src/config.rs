//! Daemon configuration file
//!
//! Every section and field is optional; anything left out keeps the default
//! of the corresponding runtime config.
//!
//! ```toml
//! [server]
//! bind_addr = "0.0.0.0:8069"
//! max_sessions = 200
//!
//! [detector]
//! url = "http://127.0.0.1:9000"
//!
//! [worker]
//! interval_secs = 5
//! policy = "one_to_one"
//! metric = "iou"
//!
//! [[cameras]]
//! id = "lot-a"
//! uri = "http://10.0.0.12/stream"
//!
//! [[cameras.zones]]
//! id = "A1"
//! polygon = [[0.1, 0.1], [0.4, 0.1], [0.4, 0.4], [0.1, 0.4]]
//! ```

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::detect::AnnotatorConfig;
use crate::occupancy::{
    AssignmentPolicy, MatchConfig, MonitoredCamera, OverlapMetric, Point, WorkerConfig, Zone,
};
use crate::registry::RegistryConfig;
use crate::server::ServerConfig;
use crate::session::SessionDefaults;
use crate::source::{ReaderConfig, SourceConfig, SourceLocation};

const DEFAULT_DETECTOR_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind_addr: Option<SocketAddr>,
    pub max_sessions: Option<usize>,
    pub stats_interval_ms: Option<u64>,
    pub write_timeout_ms: Option<u64>,
    pub default_conf: Option<f32>,
    pub default_detect_fps: Option<u32>,
    pub default_raw_fps: Option<u32>,
    pub default_skip_frames: Option<u32>,
    pub max_fps: Option<u32>,
    pub max_skip_frames: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    pub queue_capacity: Option<usize>,
    pub grace_period_ms: Option<u64>,
    pub cleanup_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReaderSection {
    pub max_retries: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceSection {
    pub max_frame_bytes: Option<usize>,
    pub read_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    /// Playback rate for file sources
    pub file_fps: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnnotatorSection {
    pub max_consecutive_failures: Option<u32>,
    pub recovery_probe_ms: Option<u64>,
    pub render: Option<bool>,
    pub jpeg_quality: Option<u8>,
    pub slow_warning_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DetectorSection {
    /// Base URL of the inference server; detection is disabled without it
    pub url: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub enabled: Option<bool>,
    pub interval_secs: Option<u64>,
    pub fetch_timeout_secs: Option<u64>,
    /// Minimum overlap score under `metric`
    pub iou_threshold: Option<f64>,
    /// `iou`, `ioa_detection` or `ioa_zone`
    pub metric: Option<OverlapMetric>,
    pub policy: Option<AssignmentPolicy>,
    pub classes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub id: String,
    /// `http(s)://` MJPEG stream, `file://` path or bare path
    pub uri: String,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneConfig {
    pub id: String,
    /// Normalized `[x, y]` vertices
    pub polygon: Vec<Point>,
    pub label: Option<String>,
}

/// Parsed configuration file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub registry: RegistrySection,
    pub reader: ReaderSection,
    pub source: SourceSection,
    pub annotator: AnnotatorSection,
    pub detector: DetectorSection,
    pub worker: WorkerSection,
    pub cameras: Vec<CameraConfig>,
}

impl AppConfig {
    /// Read, parse and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut camera_ids = HashSet::new();
        for camera in &self.cameras {
            if camera.id.trim().is_empty() {
                return Err(invalid("camera id must not be empty"));
            }
            if !camera_ids.insert(camera.id.as_str()) {
                return Err(invalid(format!("duplicate camera id '{}'", camera.id)));
            }
            SourceLocation::parse(&camera.uri)
                .map_err(|e| invalid(format!("camera '{}': {}", camera.id, e)))?;

            let mut zone_ids = HashSet::new();
            for zone in &camera.zones {
                if !zone_ids.insert(zone.id.as_str()) {
                    return Err(invalid(format!(
                        "camera '{}': duplicate zone id '{}'",
                        camera.id, zone.id
                    )));
                }
                if zone.polygon.len() < 3 {
                    return Err(invalid(format!(
                        "camera '{}': zone '{}' needs at least 3 vertices",
                        camera.id, zone.id
                    )));
                }
                let in_range = |v: f64| (0.0..=1.0).contains(&v);
                if !zone.polygon.iter().all(|p| in_range(p.x) && in_range(p.y)) {
                    return Err(invalid(format!(
                        "camera '{}': zone '{}' vertices must be normalized to [0, 1]",
                        camera.id, zone.id
                    )));
                }
            }
        }

        if let Some(threshold) = self.worker.iou_threshold {
            if !(threshold > 0.0 && threshold <= 1.0) {
                return Err(invalid("worker.iou_threshold must be within (0, 1]"));
            }
        }
        if self.registry.queue_capacity == Some(0) {
            return Err(invalid("registry.queue_capacity must be at least 1"));
        }
        if let Some(conf) = self.server.default_conf {
            if !(0.0..=1.0).contains(&conf) {
                return Err(invalid("server.default_conf must be within [0, 1]"));
            }
        }
        if self.server.max_fps == Some(0) || self.server.max_skip_frames == Some(0) {
            return Err(invalid("server.max_fps and server.max_skip_frames must be at least 1"));
        }
        if self.server.stats_interval_ms == Some(0) {
            return Err(invalid("server.stats_interval_ms must be at least 1"));
        }
        if self.registry.cleanup_interval_ms == Some(0) {
            return Err(invalid("registry.cleanup_interval_ms must be at least 1"));
        }
        if self.worker.interval_secs == Some(0) {
            return Err(invalid("worker.interval_secs must be at least 1"));
        }
        Ok(())
    }

    pub fn server_config(&self) -> ServerConfig {
        let s = &self.server;
        let base = SessionDefaults::default();
        let session = SessionDefaults {
            conf: s.default_conf.unwrap_or(base.conf),
            detect_fps: s.default_detect_fps.unwrap_or(base.detect_fps),
            raw_fps: s.default_raw_fps.unwrap_or(base.raw_fps),
            skip_frames: s.default_skip_frames.unwrap_or(base.skip_frames),
            labels: base.labels,
            max_fps: s.max_fps.unwrap_or(base.max_fps),
            max_skip_frames: s.max_skip_frames.unwrap_or(base.max_skip_frames),
            stats_interval: base.stats_interval,
            write_timeout: s
                .write_timeout_ms
                .map_or(base.write_timeout, Duration::from_millis),
        };
        let session = match s.stats_interval_ms {
            Some(ms) => session.stats_interval(Duration::from_millis(ms)),
            None => session,
        };

        let mut config = ServerConfig::default().session(session);
        if let Some(addr) = s.bind_addr {
            config = config.bind(addr);
        }
        if let Some(max) = s.max_sessions {
            config = config.max_sessions(max);
        }
        config
    }

    pub fn reader_config(&self) -> ReaderConfig {
        let r = &self.reader;
        let mut config = ReaderConfig::default();
        if let Some(n) = r.max_retries {
            config = config.max_retries(n);
        }
        if let Some(ms) = r.initial_backoff_ms {
            config = config.initial_backoff(Duration::from_millis(ms));
        }
        if let Some(ms) = r.max_backoff_ms {
            config = config.max_backoff(Duration::from_millis(ms));
        }
        config
    }

    pub fn annotator_config(&self) -> AnnotatorConfig {
        let a = &self.annotator;
        let mut config = AnnotatorConfig::default();
        if let Some(n) = a.max_consecutive_failures {
            config = config.max_consecutive_failures(n);
        }
        if let Some(ms) = a.recovery_probe_ms {
            config = config.recovery_probe(Duration::from_millis(ms));
        }
        if let Some(render) = a.render {
            config = config.render(render);
        }
        if let Some(q) = a.jpeg_quality {
            config = config.jpeg_quality(q);
        }
        if let Some(ms) = a.slow_warning_interval_ms {
            config.slow_warning_interval = Duration::from_millis(ms);
        }
        config
    }

    pub fn registry_config(&self) -> RegistryConfig {
        let r = &self.registry;
        let mut config = RegistryConfig::default()
            .reader(self.reader_config())
            .annotator(self.annotator_config());
        if let Some(capacity) = r.queue_capacity {
            config = config.queue_capacity(capacity);
        }
        if let Some(ms) = r.grace_period_ms {
            config = config.grace_period(Duration::from_millis(ms));
        }
        if let Some(ms) = r.cleanup_interval_ms {
            config = config.cleanup_interval(Duration::from_millis(ms));
        }
        config
    }

    pub fn source_config(&self) -> SourceConfig {
        let s = &self.source;
        let base = SourceConfig::default();
        SourceConfig {
            max_frame_bytes: s.max_frame_bytes.unwrap_or(base.max_frame_bytes),
            read_timeout: s
                .read_timeout_ms
                .map_or(base.read_timeout, Duration::from_millis),
            connect_timeout: s
                .connect_timeout_ms
                .map_or(base.connect_timeout, Duration::from_millis),
            file_fps: s.file_fps.unwrap_or(base.file_fps).max(1),
        }
    }

    pub fn detector_timeout(&self) -> Duration {
        Duration::from_millis(
            self.detector
                .timeout_ms
                .unwrap_or(DEFAULT_DETECTOR_TIMEOUT_MS),
        )
    }

    pub fn worker_enabled(&self) -> bool {
        self.worker.enabled.unwrap_or(true)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        let w = &self.worker;
        let mut matching = MatchConfig::default();
        if let Some(threshold) = w.iou_threshold {
            matching = matching.iou_threshold(threshold);
        }
        if let Some(metric) = w.metric {
            matching = matching.metric(metric);
        }
        if let Some(policy) = w.policy {
            matching = matching.policy(policy);
        }
        if let Some(classes) = &w.classes {
            matching = matching.classes(classes.iter().cloned());
        }

        let mut config = WorkerConfig::default().matching(matching);
        if let Some(secs) = w.interval_secs {
            config = config.interval(Duration::from_secs(secs.max(1)));
        }
        if let Some(secs) = w.fetch_timeout_secs {
            config = config.fetch_timeout(Duration::from_secs(secs.max(1)));
        }
        config
    }

    /// Zones per camera, in declaration order
    pub fn zones(&self) -> Vec<(String, Vec<Zone>)> {
        self.cameras
            .iter()
            .map(|camera| {
                let zones = camera
                    .zones
                    .iter()
                    .map(|z| Zone {
                        camera_id: camera.id.clone(),
                        zone_id: z.id.clone(),
                        polygon: z.polygon.clone(),
                        label: z.label.clone(),
                    })
                    .collect();
                (camera.id.clone(), zones)
            })
            .collect()
    }

    /// Cameras that have at least one zone
    pub fn monitored_cameras(&self) -> Vec<MonitoredCamera> {
        self.cameras
            .iter()
            .filter(|c| !c.zones.is_empty())
            .map(|c| MonitoredCamera::new(c.id.clone(), c.uri.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[server]
bind_addr = "127.0.0.1:9100"
max_sessions = 20
stats_interval_ms = 1000

[registry]
grace_period_ms = 500

[reader]
max_retries = 2

[detector]
url = "http://127.0.0.1:9000"

[worker]
interval_secs = 2
policy = "overlapping"
metric = "ioa_detection"
classes = ["car"]

[[cameras]]
id = "lot-a"
uri = "http://10.0.0.12/stream"

[[cameras.zones]]
id = "A1"
polygon = [[0.1, 0.1], [0.4, 0.1], [0.4, 0.4], [0.1, 0.4]]

[[cameras]]
id = "gate"
uri = "file:///var/lib/parkcast/gate.mjpeg"
"#;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();

        assert_eq!(config.server_config().bind_addr.port(), 8069);
        assert_eq!(config.registry_config().queue_capacity, 5);
        assert_eq!(config.worker_config().interval, Duration::from_secs(5));
        assert_eq!(config.worker_config().matching.metric, OverlapMetric::Iou);
        assert!(config.worker_enabled());
        assert!(config.cameras.is_empty());
    }

    #[test]
    fn test_sample_config() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();

        let server = config.server_config();
        assert_eq!(server.bind_addr.port(), 9100);
        assert_eq!(server.max_sessions, 20);
        assert_eq!(server.session.stats_interval, Duration::from_secs(1));

        let registry = config.registry_config();
        assert_eq!(registry.grace_period, Duration::from_millis(500));
        assert_eq!(registry.reader.max_retries, 2);

        let worker = config.worker_config();
        assert_eq!(worker.interval, Duration::from_secs(2));
        assert_eq!(worker.matching.policy, AssignmentPolicy::Overlapping);
        assert_eq!(worker.matching.metric, OverlapMetric::IoaDetection);
        assert_eq!(worker.matching.classes, vec!["car".to_string()]);

        let zones = config.zones();
        assert_eq!(zones[0].1[0].zone_id, "A1");
        assert_eq!(zones[0].1[0].camera_id, "lot-a");
        assert!(zones[1].1.is_empty());

        let monitored = config.monitored_cameras();
        assert_eq!(monitored.len(), 1);
        assert_eq!(monitored[0].camera_id, "lot-a");
    }

    #[test]
    fn test_rejects_duplicate_camera() {
        let raw = r#"
[[cameras]]
id = "a"
uri = "http://x/stream"

[[cameras]]
id = "a"
uri = "http://y/stream"
"#;
        assert!(matches!(
            AppConfig::from_toml_str(raw),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_bad_zone() {
        let raw = r#"
[[cameras]]
id = "a"
uri = "http://x/stream"

[[cameras.zones]]
id = "Z"
polygon = [[0.1, 0.1], [1.4, 0.1], [0.4, 0.4]]
"#;
        assert!(matches!(
            AppConfig::from_toml_str(raw),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_unsupported_uri() {
        let raw = r#"
[[cameras]]
id = "a"
uri = "rtsp://x/stream"
"#;
        assert!(AppConfig::from_toml_str(raw).is_err());
    }

    #[test]
    fn test_rejects_zero_stats_interval() {
        assert!(matches!(
            AppConfig::from_toml_str("[server]\nstats_interval_ms = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_zero_cleanup_interval() {
        assert!(matches!(
            AppConfig::from_toml_str("[registry]\ncleanup_interval_ms = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_zero_intervals_are_clamped_without_validation() {
        let raw = "[server]\nstats_interval_ms = 0\n[registry]\ncleanup_interval_ms = 0\n";
        let config: AppConfig = toml::from_str(raw).unwrap();

        assert_eq!(
            config.server_config().session.stats_interval,
            Duration::from_millis(1)
        );
        assert_eq!(
            config.registry_config().cleanup_interval,
            Duration::from_millis(1)
        );
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            AppConfig::from_toml_str("[server\n"),
            Err(ConfigError::Parse(_))
        ));
    }
}
