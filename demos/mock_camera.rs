//! Mock MJPEG camera for local testing
//!
//! Run with: cargo run --example mock_camera [BIND_ADDR] [FPS]
//!
//! Examples:
//!   cargo run --example mock_camera                     # binds to 127.0.0.1:8081, 15 fps
//!   cargo run --example mock_camera 0.0.0.0:8090 30
//!
//! Endpoints:
//!   GET /stream   multipart/x-mixed-replace MJPEG stream
//!   GET /capture  single JPEG still
//!
//! Point parkcastd at it:
//!
//!   [[cameras]]
//!   id = "mock"
//!   uri = "http://127.0.0.1:8081/stream"

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream;

use parkcast::codec::encode_solid;

const BOUNDARY: &str = "mockframe";

struct Camera {
    frames: Vec<Bytes>,
    fps: u32,
}

impl Camera {
    fn new(fps: u32) -> Result<Self, parkcast::codec::CodecError> {
        // A slow colour cycle so viewers can see frames advancing
        let frames = (0..30u8)
            .map(|i| encode_solid(640, 360, [i * 8, 96, 255 - i * 8], 70))
            .collect::<Result<_, _>>()?;
        Ok(Self { frames, fps })
    }

    fn part(&self, n: usize) -> Bytes {
        let jpeg = &self.frames[n % self.frames.len()];
        let mut part = BytesMut::with_capacity(jpeg.len() + 128);
        part.put_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                jpeg.len()
            )
            .as_bytes(),
        );
        part.put_slice(jpeg);
        part.put_slice(b"\r\n");
        part.freeze()
    }
}

async fn mjpeg_stream(State(camera): State<Arc<Camera>>) -> Response {
    let period = Duration::from_secs_f64(1.0 / f64::from(camera.fps));
    let ticker = tokio::time::interval(period);

    let body = stream::unfold((ticker, 0usize, camera), |(mut ticker, n, camera)| async move {
        ticker.tick().await;
        let part = camera.part(n);
        Some((Ok::<_, Infallible>(part), (ticker, n + 1, camera)))
    });

    (
        [(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
        )],
        Body::from_stream(body),
    )
        .into_response()
}

async fn capture(State(camera): State<Arc<Camera>>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/jpeg")], camera.frames[0].clone())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let addr: SocketAddr = args
        .next()
        .unwrap_or_else(|| "127.0.0.1:8081".to_string())
        .parse()?;
    let fps: u32 = args.next().map(|s| s.parse()).transpose()?.unwrap_or(15).max(1);

    let camera = Arc::new(Camera::new(fps)?);
    let app = Router::new()
        .route("/stream", get(mjpeg_stream))
        .route("/capture", get(capture))
        .with_state(camera);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, fps, "Mock camera listening");
    axum::serve(listener, app).await?;
    Ok(())
}
