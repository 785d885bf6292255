//! HTTP surface: health, debug listing, occupancy and stream request validation

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use parkcast::occupancy::{MemoryStore, OccupancySink, Zone, ZoneState};
use parkcast::registry::{BroadcastManager, RegistryConfig};
use parkcast::server::{ParkcastServer, ServerConfig};
use parkcast::source::{DefaultSourceFactory, SourceConfig};

struct TestServer {
    addr: SocketAddr,
    store: Arc<MemoryStore>,
    stop: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<parkcast::Result<()>>,
}

impl TestServer {
    async fn start(max_sessions: usize) -> Self {
        let sources = Arc::new(DefaultSourceFactory::new(SourceConfig::default()).unwrap());
        let manager = Arc::new(BroadcastManager::new(RegistryConfig::default(), sources, None));
        let store = Arc::new(MemoryStore::new());
        store
            .set_zones(
                "lot-a",
                vec![
                    Zone::rect("lot-a", "A1", 0.1, 0.1, 0.3, 0.3),
                    Zone::rect("lot-a", "A2", 0.6, 0.1, 0.3, 0.3),
                ],
            )
            .await;

        // Port 1 refuses connections
        let cameras = HashMap::from([("lot-a".to_string(), "http://127.0.0.1:1/stream".to_string())]);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = ParkcastServer::new(
            ServerConfig::with_addr(addr).max_sessions(max_sessions),
            manager,
            cameras,
            store.clone(),
        );

        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            server
                .serve(listener, async {
                    let _ = stopped.await;
                })
                .await
        });

        Self {
            addr,
            store,
            stop: Some(stop),
            task,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await.unwrap().unwrap();
    }
}

/// GET with the headers of a WebSocket handshake
async fn upgrade_request(url: &str) -> reqwest::Response {
    reqwest::Client::new()
        .get(url)
        .header("connection", "upgrade")
        .header("upgrade", "websocket")
        .header("sec-websocket-version", "13")
        .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn health_and_empty_debug_listing() {
    let server = TestServer::start(0).await;

    let health: Value = reqwest::get(server.url("/healthz"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["detector"], false);

    let debug: Value = reqwest::get(server.url("/debug/streams"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(debug["broadcaster_count"], 0);
    assert!(debug["streams"].as_array().unwrap().is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn occupancy_endpoint_reports_summary() {
    let server = TestServer::start(0).await;
    server
        .store
        .update_occupancy(
            "lot-a",
            vec![ZoneState {
                zone_id: "A1".into(),
                occupied: true,
                confidence: Some(0.9),
                iou: Some(0.75),
                last_updated: Utc::now(),
                matched_detection_id: Some("3:0".into()),
            }],
        )
        .await
        .unwrap();

    let body: Value = reqwest::get(server.url("/api/occupancy/lot-a"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["camera_id"], "lot-a");
    assert_eq!(body["total"], 2);
    assert_eq!(body["occupied"], 1);
    assert_eq!(body["available"], 1);
    assert_eq!(body["occupancy_rate"], 0.5);
    assert_eq!(body["zones"][0]["zone_id"], "A1");
    assert_eq!(body["zones"][0]["matched_detection_id"], "3:0");

    let missing = reqwest::get(server.url("/api/occupancy/lot-z")).await.unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    let error: Value = missing.json().await.unwrap();
    assert_eq!(error["error_code"], "NOT_FOUND");

    server.shutdown().await;
}

#[tokio::test]
async fn stream_requests_are_validated_before_upgrade() {
    let server = TestServer::start(0).await;

    let unknown = upgrade_request(&server.url("/ws/stream/nope/raw")).await;
    assert_eq!(unknown.status(), reqwest::StatusCode::NOT_FOUND);

    let bad_conf = upgrade_request(&server.url("/ws/stream/lot-a/detect?conf=1.5")).await;
    assert_eq!(bad_conf.status(), reqwest::StatusCode::BAD_REQUEST);
    let error: Value = bad_conf.json().await.unwrap();
    assert_eq!(error["error_code"], "VALIDATION_ERROR");

    let bad_fps = upgrade_request(&server.url("/ws/stream/lot-a/raw?fps=0")).await;
    assert_eq!(bad_fps.status(), reqwest::StatusCode::BAD_REQUEST);

    let bad_skip = upgrade_request(&server.url("/ws/stream/lot-a/detect?skip_frames=11")).await;
    assert_eq!(bad_skip.status(), reqwest::StatusCode::BAD_REQUEST);

    // Valid parameters, but no detector is configured
    let no_detector = upgrade_request(&server.url("/ws/stream/lot-a/detect?conf=0.5&fps=5")).await;
    assert_eq!(no_detector.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    let error: Value = no_detector.json().await.unwrap();
    assert_eq!(error["error_code"], "DETECTOR_UNAVAILABLE");

    server.shutdown().await;
}
