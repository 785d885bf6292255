//! HTTP listener
//!
//! Binds the router, runs the broadcast manager's reaper alongside it and tears
//! every pipeline down when the server stops.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;

use crate::error::Result;
use crate::occupancy::MemoryStore;
use crate::registry::BroadcastManager;
use crate::server::config::ServerConfig;
use crate::server::routes::create_router;
use crate::server::state::AppState;

/// Viewer-facing server
pub struct ParkcastServer {
    config: ServerConfig,
    state: AppState,
}

impl ParkcastServer {
    /// Create a server over an existing manager and zone store
    ///
    /// `cameras` maps camera ids to source URIs.
    pub fn new(
        config: ServerConfig,
        manager: Arc<BroadcastManager>,
        cameras: HashMap<String, String>,
        store: Arc<MemoryStore>,
    ) -> Self {
        let state = AppState::new(config.clone(), manager, cameras, store);
        Self { config, state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get a reference to the broadcast manager
    pub fn manager(&self) -> &Arc<BroadcastManager> {
        &self.state.manager
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Run the server
    ///
    /// This method blocks until the server fails.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, cameras = self.state.cameras.len(), "Parkcast server listening");

        let reaper = self.state.manager.spawn_reaper();

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Shutdown signal received");
            })
            .await;

        // Stop the reaper, then end every stream so open sessions see a terminal message
        reaper.abort();
        self.state.manager.shutdown().await;

        result.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryConfig;
    use crate::source::{DefaultSourceFactory, SourceConfig};

    fn server() -> ParkcastServer {
        let sources = Arc::new(DefaultSourceFactory::new(SourceConfig::default()).unwrap());
        let manager = Arc::new(BroadcastManager::new(RegistryConfig::default(), sources, None));
        let cameras = HashMap::from([("lot-a".to_string(), "http://127.0.0.1:1/stream".to_string())]);
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        ParkcastServer::new(
            ServerConfig::with_addr(addr),
            manager,
            cameras,
            Arc::new(MemoryStore::new()),
        )
    }

    #[tokio::test]
    async fn test_shutdown_returns() {
        let server = server();
        let listener = TcpListener::bind(server.bind_addr()).await.unwrap();

        server.serve(listener, async {}).await.unwrap();
        assert_eq!(server.manager().broadcaster_count().await, 0);
    }

    #[test]
    fn test_camera_lookup() {
        let server = server();
        assert_eq!(
            server.state().camera_uri("lot-a").unwrap(),
            "http://127.0.0.1:1/stream"
        );
        assert!(server.state().camera_uri("lot-b").is_err());
    }
}
