use crate::camera::{encode_jpeg, CameraCounters, FrameSource};
use crate::config::{CameraConfig, StreamConfig};
use crate::error::{Result, StreamError};
use axum::{routing::get, Router};
use bytes::Bytes;
use crossbeam::channel::{self, RecvTimeoutError};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, trace, warn};

use super::handlers::{health_handler, mjpeg_stream_handler, snapshot_handler};

const GRAB_ERROR_BACKOFF: Duration = Duration::from_millis(200);
const LATEST_FRAME_POLL: Duration = Duration::from_millis(5);

/// Shared state for the Axum server
#[derive(Clone)]
pub struct ServerState {
    pub(crate) frames: watch::Receiver<Option<Bytes>>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) counters: Arc<CameraCounters>,
    pub(crate) started: Instant,
}

/// MJPEG-over-HTTP stream server.
///
/// Each running server owns a thread with its own single-threaded tokio
/// runtime, so callers of the synchronous command API never need one.
pub struct StreamServer {
    config: StreamConfig,
    jpeg_quality: u8,
    frame_timeout: Duration,
}

impl StreamServer {
    pub fn new(config: &StreamConfig, camera: &CameraConfig) -> Self {
        Self {
            config: config.clone(),
            jpeg_quality: camera.jpeg_quality,
            frame_timeout: camera.frame_timeout(),
        }
    }

    /// Bind the endpoint and start pumping frames from `source`.
    ///
    /// Returns once the endpoint accepts connections, or with an error if it
    /// could not be bound within the startup timeout.
    pub fn start(
        &self,
        source: Box<dyn FrameSource>,
        counters: Arc<CameraCounters>,
    ) -> Result<StreamHandle> {
        let token = CancellationToken::new();
        let (frame_tx, frame_rx) = watch::channel::<Option<Bytes>>(None);
        let (ready_tx, ready_rx) = channel::bounded::<Result<SocketAddr>>(1);

        let address = format!("{}:{}", self.config.ip, self.config.port);
        let state = ServerState {
            frames: frame_rx.clone(),
            shutdown: token.clone(),
            counters,
            started: Instant::now(),
        };
        let pump = FramePump {
            source,
            frames: frame_tx,
            shutdown: token.clone(),
            jpeg_quality: self.jpeg_quality,
            frame_timeout: self.frame_timeout,
        };
        let path = self.config.path.clone();

        let thread = thread::Builder::new()
            .name("swiftbot-stream".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.into()));
                        return;
                    }
                };
                runtime.block_on(serve(address, path, state, pump, ready_tx));
            })?;

        let startup_timeout = self.config.startup_timeout();
        match ready_rx.recv_timeout(startup_timeout) {
            Ok(Ok(local_addr)) => Ok(StreamHandle {
                local_addr,
                path: self.config.path.clone(),
                token,
                frames: frame_rx,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                token.cancel();
                let _ = thread.join();
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => {
                // the pump may already hold the camera; wait for it to let go
                token.cancel();
                let _ = thread.join();
                Err(StreamError::StartupTimeout(startup_timeout).into())
            }
            Err(RecvTimeoutError::Disconnected) => {
                token.cancel();
                let _ = thread.join();
                Err(StreamError::StartupFailed {
                    details: "stream thread exited before the endpoint was ready".to_string(),
                }
                .into())
            }
        }
    }
}

async fn serve(
    address: String,
    path: String,
    state: ServerState,
    pump: FramePump,
    ready: channel::Sender<Result<SocketAddr>>,
) {
    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            let _ = ready.send(Err(StreamError::BindFailed { address, source: e }.into()));
            return;
        }
    };
    let local_addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            let _ = ready.send(Err(e.into()));
            return;
        }
    };

    let shutdown = state.shutdown.clone();
    let pump = tokio::task::spawn_blocking(move || pump.run());

    let app = Router::new()
        .route(&path, get(mjpeg_stream_handler))
        .route("/snapshot.jpg", get(snapshot_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("MJPEG stream listening on http://{}{}", local_addr, path);
    let _ = ready.send(Ok(local_addr));

    let graceful = shutdown.clone();
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { graceful.cancelled().await })
        .await
    {
        error!("Stream server error: {}", e);
    }

    // the pump owns the camera; wait for it so the device is released on return
    shutdown.cancel();
    if let Err(e) = pump.await {
        error!("Frame pump task failed: {}", e);
    }
    info!("MJPEG stream on {} stopped", local_addr);
}

/// Pulls frames from the camera into the watch channel until cancelled
struct FramePump {
    source: Box<dyn FrameSource>,
    frames: watch::Sender<Option<Bytes>>,
    shutdown: CancellationToken,
    jpeg_quality: u8,
    frame_timeout: Duration,
}

impl FramePump {
    fn run(mut self) {
        debug!("Frame pump started");
        let mut pumped = 0u64;

        while !self.shutdown.is_cancelled() {
            match self.source.grab(self.frame_timeout) {
                Ok(Some(frame)) => match encode_jpeg(frame, self.jpeg_quality) {
                    Ok(jpeg) => {
                        pumped += 1;
                        trace!("Pumped frame {} ({} bytes)", pumped, jpeg.len());
                        self.frames.send_replace(Some(Bytes::from(jpeg)));
                    }
                    Err(e) => warn!("Dropping frame that failed to encode: {}", e),
                },
                Ok(None) => trace!("No frame within {:?}", self.frame_timeout),
                Err(e) => {
                    warn!("Camera grab failed: {}", e);
                    thread::sleep(GRAB_ERROR_BACKOFF);
                }
            }
        }

        debug!("Frame pump stopped after {} frames", pumped);
    }
}

/// A running stream server. Dropping it stops the server.
pub struct StreamHandle {
    local_addr: SocketAddr,
    path: String,
    token: CancellationToken,
    frames: watch::Receiver<Option<Bytes>>,
    thread: Option<JoinHandle<()>>,
}

impl StreamHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Client-facing URL; a wildcard bind address is reported as loopback
    pub fn url(&self) -> String {
        let mut addr = self.local_addr;
        if addr.ip().is_unspecified() {
            addr.set_ip(Ipv4Addr::LOCALHOST.into());
        }
        format!("http://{}{}", addr, self.path)
    }

    /// Most recent frame, waiting up to `timeout` for the first one
    pub fn latest_frame(&self, timeout: Duration) -> Option<Bytes> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.frames.borrow().clone() {
                return Some(frame);
            }
            if Instant::now() >= deadline || self.token.is_cancelled() {
                return None;
            }
            thread::sleep(LATEST_FRAME_POLL);
        }
    }

    /// Cancel the server and wait for its thread, closing every client
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.token.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Stream thread panicked");
            }
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

