use super::*;
use crate::camera::{CameraCounters, FrameSourceFactory, TestPatternFactory, TestPatternMode};
use crate::config::{CameraBackend, CameraConfig, StreamConfig, SwiftbotConfig};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn create_test_configs() -> (StreamConfig, CameraConfig) {
    let mut stream = SwiftbotConfig::default().stream;
    stream.ip = "127.0.0.1".to_string();
    stream.port = 0;

    let camera = CameraConfig {
        backend: CameraBackend::TestPattern,
        index: 0,
        resolution: (32, 24),
        fps: 30,
        jpeg_quality: 70,
        frame_timeout_ms: 100,
    };
    (stream, camera)
}

fn start_test_server(mode: TestPatternMode) -> (StreamHandle, TestPatternFactory, Arc<CameraCounters>) {
    let (stream, camera) = create_test_configs();
    let factory = TestPatternFactory::new(&camera).with_mode(mode);
    let counters = Arc::new(CameraCounters::default());

    let handle = StreamServer::new(&stream, &camera)
        .start(factory.open().unwrap(), Arc::clone(&counters))
        .unwrap();
    (handle, factory, counters)
}

fn http_get(addr: SocketAddr, path: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    write!(
        stream,
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, addr
    )
    .unwrap();
    stream
}

/// Read until `needle` shows up or `limit` bytes have arrived
fn read_until(stream: &mut TcpStream, needle: &str, limit: usize) -> String {
    let mut received = Vec::new();
    let mut chunk = [0u8; 4096];
    let deadline = Instant::now() + Duration::from_secs(3);

    while received.len() < limit && Instant::now() < deadline {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => received.extend_from_slice(&chunk[..n]),
            Err(_) => break,
        }
        if String::from_utf8_lossy(&received).contains(needle) {
            break;
        }
    }
    String::from_utf8_lossy(&received).into_owned()
}

#[test]
fn test_health_endpoint() {
    let (handle, _factory, _counters) = start_test_server(TestPatternMode::Frames);

    let mut stream = http_get(handle.local_addr(), "/health");
    let response = read_until(&mut stream, "uptime_secs", 64 * 1024);
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    assert!(response.contains("\"status\":\"healthy\""));

    handle.stop();
}

#[test]
fn test_mjpeg_stream_delivers_frames() {
    let (handle, _factory, counters) = start_test_server(TestPatternMode::Frames);

    let mut stream = http_get(handle.local_addr(), "/stream");
    let response = read_until(&mut stream, "Content-Length", 256 * 1024);
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    assert!(response.contains("multipart/x-mixed-replace; boundary=FRAME"));
    assert!(response.contains("--FRAME"));
    assert!(counters.snapshot().frames_streamed >= 1);

    handle.stop();
}

#[test]
fn test_snapshot_without_frames_is_unavailable() {
    let (handle, _factory, _counters) = start_test_server(TestPatternMode::NoFrames);

    let mut stream = http_get(handle.local_addr(), "/snapshot.jpg");
    let response = read_until(&mut stream, "no frame", 16 * 1024);
    assert!(response.starts_with("HTTP/1.1 503"), "{}", response);
    assert!(handle.latest_frame(Duration::from_millis(50)).is_none());

    handle.stop();
}

#[test]
fn test_latest_frame_waits_for_first_frame() {
    let (handle, _factory, _counters) = start_test_server(TestPatternMode::Frames);

    let frame = handle.latest_frame(Duration::from_secs(2)).unwrap();
    assert_eq!(&frame[..2], &[0xFF, 0xD8]);

    handle.stop();
}

#[test]
fn test_stop_closes_clients_and_releases_camera() {
    let (handle, factory, _counters) = start_test_server(TestPatternMode::Frames);
    let addr = handle.local_addr();
    assert_eq!(factory.open_sources(), 1);

    let mut client = http_get(addr, "/stream");
    read_until(&mut client, "--FRAME", 256 * 1024);

    let started = Instant::now();
    handle.stop();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(factory.open_sources(), 0);

    // the open client sees end of stream and new connections are refused
    let mut rest = Vec::new();
    let _ = client.read_to_end(&mut rest);
    assert!(TcpStream::connect(addr).is_err());
}

#[test]
fn test_stream_url_reports_bound_port() {
    let (handle, _factory, _counters) = start_test_server(TestPatternMode::Frames);

    let port = handle.local_addr().port();
    assert_ne!(port, 0);
    assert_eq!(handle.url(), format!("http://127.0.0.1:{}/stream", port));

    handle.stop();
}

#[test]
fn test_startup_timeout_releases_camera() {
    let (mut stream, camera) = create_test_configs();
    stream.startup_timeout_ms = 1;
    let factory = TestPatternFactory::new(&camera);
    let counters = Arc::new(CameraCounters::default());

    // either side may win the race; a timed out start must not keep the device
    match StreamServer::new(&stream, &camera).start(factory.open().unwrap(), counters) {
        Ok(handle) => handle.stop(),
        Err(e) => assert!(matches!(
            e,
            crate::error::SwiftbotError::Stream(crate::error::StreamError::StartupTimeout(_))
        )),
    }
    assert_eq!(factory.open_sources(), 0);
}
