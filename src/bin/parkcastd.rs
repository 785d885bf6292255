//! parkcastd - camera fan-out and occupancy daemon
//!
//! Serves raw and annotated WebSocket streams for the configured cameras and,
//! when a detector is configured, keeps zone occupancy current in the
//! background.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use parkcast::detect::{Detector, HttpDetector};
use parkcast::occupancy::{MemoryStore, OccupancyWorker, SourceFetcher};
use parkcast::registry::BroadcastManager;
use parkcast::server::ParkcastServer;
use parkcast::source::{DefaultSourceFactory, SourceFactory};
use parkcast::AppConfig;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// TOML config file; defaults apply when omitted.
    #[arg(long, short, env = "PARKCAST_CONFIG")]
    config: Option<PathBuf>,
    /// Listen address, overrides [server].bind_addr.
    #[arg(long, env = "PARKCAST_BIND")]
    bind: Option<SocketAddr>,
    /// Inference server base URL, overrides [detector].url.
    #[arg(long, env = "PARKCAST_DETECTOR_URL")]
    detector_url: Option<String>,
    /// Do not start the occupancy worker.
    #[arg(long)]
    no_worker: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parkcast=info,parkcastd=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!("Starting parkcastd v{}", env!("CARGO_PKG_VERSION"));

    let app = match &args.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => AppConfig::default(),
    };

    let mut server_config = app.server_config();
    if let Some(addr) = args.bind {
        server_config = server_config.bind(addr);
    }

    let sources: Arc<dyn SourceFactory> = Arc::new(
        DefaultSourceFactory::new(app.source_config()).context("building HTTP client")?,
    );

    let detector_url = args.detector_url.clone().or_else(|| app.detector.url.clone());
    let detector: Option<Arc<dyn Detector>> = match detector_url {
        Some(url) => {
            let detector = HttpDetector::new(url.clone(), app.detector_timeout())
                .context("building detector client")?;
            tracing::info!(url = %url, "Detector configured");
            Some(Arc::new(detector) as Arc<dyn Detector>)
        }
        None => {
            tracing::warn!("No detector configured; detect streams and occupancy are disabled");
            None
        }
    };

    let store = Arc::new(MemoryStore::new());
    for (camera_id, zones) in app.zones() {
        store.set_zones(camera_id, zones).await;
    }

    let manager = Arc::new(BroadcastManager::new(
        app.registry_config(),
        Arc::clone(&sources),
        detector.clone(),
    ));

    let _worker = match (&detector, args.no_worker || !app.worker_enabled()) {
        (Some(detector), false) => {
            let cameras = app.monitored_cameras();
            if cameras.is_empty() {
                None
            } else {
                let worker = Arc::new(OccupancyWorker::new(
                    app.worker_config(),
                    Arc::new(SourceFetcher::new(Arc::clone(&sources))),
                    Arc::clone(detector),
                    store.clone(),
                    store.clone(),
                ));
                Some(worker.spawn(cameras))
            }
        }
        _ => None,
    };

    let cameras: HashMap<String, String> = app
        .cameras
        .iter()
        .map(|c| (c.id.clone(), c.uri.clone()))
        .collect();
    let server = ParkcastServer::new(server_config, manager, cameras, store);

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!("parkcastd stopped");
    Ok(())
}
