use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tracing::{debug, info};

use super::server::ServerState;

/// Handler for the MJPEG streaming endpoint
pub async fn mjpeg_stream_handler(State(state): State<ServerState>) -> impl IntoResponse {
    info!("New MJPEG stream client connected");

    let stream = async_stream::stream! {
        let mut frames = state.frames.clone();
        let mut frames_sent = 0u64;
        let mut bytes_sent = 0u64;

        // send whatever is already available before waiting for the next frame
        let mut pending = frames.borrow_and_update().clone();

        loop {
            if let Some(jpeg) = pending.take() {
                frames_sent += 1;
                bytes_sent += jpeg.len() as u64;
                state.counters.record_streamed_frame();

                let boundary = format!(
                    "--FRAME\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nX-Frame-ID: {}\r\n\r\n",
                    jpeg.len(),
                    frames_sent
                );
                yield Ok::<_, axum::Error>(Bytes::from(boundary));
                yield Ok(jpeg);
                yield Ok(Bytes::from_static(b"\r\n"));
            }

            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                changed = frames.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    pending = frames.borrow_and_update().clone();
                }
            }
        }

        debug!(
            "MJPEG client finished after {} frames ({:.1} KB)",
            frames_sent,
            bytes_sent as f64 / 1024.0
        );
    };

    (
        [
            (header::CONTENT_TYPE, "multipart/x-mixed-replace; boundary=FRAME"),
            (header::CACHE_CONTROL, "no-cache, private"),
            (header::PRAGMA, "no-cache"),
        ],
        Body::from_stream(stream),
    )
}

/// Latest frame as a single JPEG
pub async fn snapshot_handler(State(state): State<ServerState>) -> Response {
    let latest = state.frames.borrow().clone();
    match latest {
        Some(jpeg) => ([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "no frame available yet").into_response(),
    }
}

/// Handler for health check endpoint
pub async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let frames_available = state.frames.borrow().is_some();
    let stats = state.counters.snapshot();

    let health_info = serde_json::json!({
        "status": "healthy",
        "frames_available": frames_available,
        "frames_streamed": stats.frames_streamed,
        "uptime_secs": state.started.elapsed().as_secs(),
    });

    (StatusCode::OK, axum::Json(health_info))
}
