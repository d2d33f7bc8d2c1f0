//! Browser dashboard.
//!
//! A small HTTP/1.1 server on a std `TcpListener` that shows the latest annotated frame and
//! counts, and lets the user start/stop detection and adjust the thresholds. The server
//! never touches the detection loop directly: it reads what `DashboardSink` published and
//! writes requests into the shared `ControlHandle`.

mod page;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::controller::{ControlHandle, LoopState};
use crate::error::LoopError;
use crate::frame::{Frame, PixelFormat};
use crate::params::{DetectionParameters, TrackedLabels};
use crate::sink::DisplaySink;
use crate::tally::CountSnapshot;

const MAX_REQUEST_BYTES: usize = 8192;
const IDLE_MESSAGE: &str = "Press start to begin";

#[derive(Clone, Debug)]
pub struct DashboardConfig {
    pub addr: String,
    pub jpeg_quality: u8,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8790".to_string(),
            jpeg_quality: 80,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ErrorView {
    kind: &'static str,
    detail: String,
}

#[derive(Debug)]
struct DashboardState {
    state: LoopState,
    counts: CountSnapshot,
    error: Option<ErrorView>,
    message: String,
    frame_jpeg: Option<Vec<u8>>,
    frames: u64,
}

#[derive(Serialize)]
struct StatusView<'a> {
    state: LoopState,
    run_requested: bool,
    counts: &'a CountSnapshot,
    parameters: DetectionParameters,
    error: Option<&'a ErrorView>,
    message: &'a str,
    frames: u64,
}

type SharedState = Arc<Mutex<DashboardState>>;

fn lock(shared: &SharedState) -> MutexGuard<'_, DashboardState> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Publishes into the dashboard's shared state. Cheap to create one per session.
#[derive(Clone)]
pub struct DashboardSink {
    shared: SharedState,
    jpeg_quality: u8,
}

impl DisplaySink for DashboardSink {
    fn expected_format(&self) -> PixelFormat {
        PixelFormat::Rgb24
    }

    fn publish_frame(&mut self, frame: &Frame) {
        match encode_jpeg(frame, self.jpeg_quality) {
            Ok(jpeg) => {
                let mut state = lock(&self.shared);
                state.frame_jpeg = Some(jpeg);
                state.frames += 1;
            }
            Err(err) => log::warn!("dashboard: dropping frame {}: {:#}", frame.index(), err),
        }
    }

    fn publish_counts(&mut self, counts: &CountSnapshot) {
        lock(&self.shared).counts = counts.clone();
    }

    fn publish_status(&mut self, loop_state: LoopState, error: Option<&LoopError>) {
        let mut state = lock(&self.shared);
        state.state = loop_state;
        match (loop_state, error) {
            (_, Some(err)) => {
                state.message = user_message(err).to_string();
                state.error = Some(ErrorView {
                    kind: err.kind(),
                    detail: err.to_string(),
                });
            }
            (LoopState::Running, None) => {
                state.message = "Detecting".to_string();
                state.error = None;
            }
            (LoopState::Stopped, None) => {
                state.message = IDLE_MESSAGE.to_string();
            }
        }
    }
}

fn user_message(err: &LoopError) -> &'static str {
    match err {
        LoopError::SourceUnavailable { .. } => {
            "Could not open the camera. Check the source and press start."
        }
        LoopError::CaptureFailure { .. } => "Lost the camera feed. Press start to try again.",
        LoopError::DetectionFailure { .. } => "Detection failed. Press start to try again.",
    }
}

fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let rgb = if frame.format() == PixelFormat::Rgb24 {
        None
    } else {
        Some(frame.to_format(PixelFormat::Rgb24)?)
    };
    let frame = rgb.as_ref().unwrap_or(frame);
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode(
            frame.pixels(),
            frame.width(),
            frame.height(),
            ExtendedColorType::Rgb8,
        )
        .context("jpeg encode")?;
    Ok(out)
}

pub struct DashboardServer {
    cfg: DashboardConfig,
    control: ControlHandle,
    shared: SharedState,
}

impl DashboardServer {
    /// Dashboard starting out idle, every tracked label at zero.
    pub fn new(cfg: DashboardConfig, control: ControlHandle, tracked: &TrackedLabels) -> Self {
        let shared = Arc::new(Mutex::new(DashboardState {
            state: LoopState::Stopped,
            counts: CountSnapshot::zeroed(tracked),
            error: None,
            message: IDLE_MESSAGE.to_string(),
            frame_jpeg: None,
            frames: 0,
        }));
        Self {
            cfg,
            control,
            shared,
        }
    }

    pub fn spawn(self) -> Result<DashboardHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid dashboard address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind dashboard on {}", configured_addr))?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "dashboard configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let shared = self.shared.clone();
        let control = self.control.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = serve(listener, &shared, &control, shutdown_thread) {
                log::error!("dashboard stopped: {}", err);
            }
        });
        log::info!("dashboard listening on http://{}", addr);

        Ok(DashboardHandle {
            addr,
            sink: DashboardSink {
                shared: self.shared,
                jpeg_quality: self.cfg.jpeg_quality,
            },
            shutdown,
            join: Some(join),
        })
    }
}

pub struct DashboardHandle {
    pub addr: SocketAddr,
    sink: DashboardSink,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl DashboardHandle {
    pub fn sink(&self) -> DashboardSink {
        self.sink.clone()
    }

    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("dashboard thread panicked"))?;
        }
        Ok(())
    }
}

fn serve(
    listener: TcpListener,
    shared: &SharedState,
    control: &ControlHandle,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, shared, control) {
                    log::warn!("dashboard request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(25));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    shared: &SharedState,
    control: &ControlHandle,
) -> Result<()> {
    // accepted sockets may inherit the listener's nonblocking flag
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") => write_response(
            &mut stream,
            200,
            "text/html; charset=utf-8",
            page::INDEX_HTML.as_bytes(),
        ),
        ("GET", "/health") => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        ("GET", "/status") => {
            let body = {
                let state = lock(shared);
                let view = StatusView {
                    state: state.state,
                    run_requested: control.run_requested(),
                    counts: &state.counts,
                    parameters: control.parameters(),
                    error: state.error.as_ref(),
                    message: &state.message,
                    frames: state.frames,
                };
                serde_json::to_vec(&view)?
            };
            write_response(&mut stream, 200, "application/json", &body)
        }
        ("GET", "/frame.jpg") => {
            let jpeg = lock(shared).frame_jpeg.clone();
            match jpeg {
                Some(jpeg) => write_response(&mut stream, 200, "image/jpeg", &jpeg),
                None => write_json_response(&mut stream, 404, r#"{"error":"no_frame"}"#),
            }
        }
        ("POST", "/control/start") => {
            control.request_run();
            {
                let mut state = lock(shared);
                state.error = None;
                state.message = "Starting".to_string();
            }
            log::info!("dashboard: start requested");
            write_json_response(&mut stream, 200, r#"{"run_requested":true}"#)
        }
        ("POST", "/control/stop") => {
            control.request_stop();
            log::info!("dashboard: stop requested");
            write_json_response(&mut stream, 200, r#"{"run_requested":false}"#)
        }
        ("POST", "/control/parameters") => {
            match parse_parameters(&request.query, control.parameters()) {
                Ok(parameters) => {
                    control.set_parameters(parameters);
                    let body = serde_json::to_vec(&parameters)?;
                    write_response(&mut stream, 200, "application/json", &body)
                }
                Err(err) => {
                    let body = serde_json::to_vec(&serde_json::json!({
                        "error": "invalid_parameters",
                        "detail": format!("{:#}", err),
                    }))?;
                    write_response(&mut stream, 400, "application/json", &body)
                }
            }
        }
        (_, "/" | "/health" | "/status" | "/frame.jpg")
        | (_, "/control/start" | "/control/stop" | "/control/parameters") => {
            write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

/// Apply `confidence`, `overlap` and `agnostic` query values on top of `current`.
fn parse_parameters(
    query: &HashMap<String, String>,
    current: DetectionParameters,
) -> Result<DetectionParameters> {
    let confidence = match query.get("confidence") {
        Some(raw) => raw
            .parse::<f32>()
            .map_err(|_| anyhow!("confidence must be a number"))?,
        None => current.confidence_threshold(),
    };
    let overlap = match query.get("overlap") {
        Some(raw) => raw
            .parse::<f32>()
            .map_err(|_| anyhow!("overlap must be a number"))?,
        None => current.overlap_threshold(),
    };
    let agnostic = match query.get("agnostic").map(String::as_str) {
        Some("true" | "1" | "on") => true,
        Some("false" | "0" | "off") => false,
        Some(other) => return Err(anyhow!("agnostic must be true or false, got '{}'", other)),
        None => current.class_agnostic_suppression(),
    };
    DetectionParameters::new(confidence, overlap, agnostic)
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path, parse_query(query)),
        None => (raw_path, HashMap::new()),
    };
    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        query,
    })
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection};
    use crate::tally::tally;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parameters_keep_unspecified_fields() -> Result<()> {
        let current = DetectionParameters::new(0.4, 0.6, true)?;
        let updated = parse_parameters(&query(&[("confidence", "0.75")]), current)?;
        assert_eq!(updated.confidence_threshold(), 0.75);
        assert_eq!(updated.overlap_threshold(), 0.6);
        assert!(updated.class_agnostic_suppression());

        let updated = parse_parameters(&query(&[("agnostic", "false")]), current)?;
        assert!(!updated.class_agnostic_suppression());
        Ok(())
    }

    #[test]
    fn parameters_reject_out_of_range_and_garbage() {
        let current = DetectionParameters::default();
        assert!(parse_parameters(&query(&[("confidence", "1.5")]), current).is_err());
        assert!(parse_parameters(&query(&[("overlap", "abc")]), current).is_err());
        assert!(parse_parameters(&query(&[("agnostic", "maybe")]), current).is_err());
    }

    #[test]
    fn query_pairs_without_values_are_ignored() {
        let parsed = parse_query("confidence=0.3&flag&overlap=0.2");
        assert_eq!(parsed.get("confidence").map(String::as_str), Some("0.3"));
        assert_eq!(parsed.get("overlap").map(String::as_str), Some("0.2"));
        assert!(!parsed.contains_key("flag"));
    }

    #[test]
    fn sink_publishes_jpeg_counts_and_status() -> Result<()> {
        let tracked = TrackedLabels::default();
        let server = DashboardServer::new(
            DashboardConfig::default(),
            ControlHandle::new(DetectionParameters::default()),
            &tracked,
        );
        let mut sink = DashboardSink {
            shared: server.shared.clone(),
            jpeg_quality: 75,
        };

        let frame = Frame::new(vec![200; 8 * 8 * 3], 8, 8, PixelFormat::Rgb24)?;
        sink.publish_frame(&frame);
        let bottle = Detection::new("bottle", 0.9, BoundingBox::new(0.0, 0.0, 2.0, 2.0));
        let counts = tally(&vec![bottle; 3], &tracked);
        sink.publish_counts(&counts);
        sink.publish_status(LoopState::Running, None);

        let state = lock(&server.shared);
        let jpeg = state.frame_jpeg.as_ref().expect("frame stored");
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(state.counts.get("bottle"), Some(3));
        assert_eq!(state.state, LoopState::Running);
        assert_eq!(state.message, "Detecting");
        Ok(())
    }

    #[test]
    fn every_frame_layout_encodes_at_its_own_size() -> Result<()> {
        let frames = [
            Frame::new(vec![90; 8 * 4 * 3], 8, 4, PixelFormat::Bgr24)?,
            Frame::new(vec![128; 8 * 4 * 3 / 2], 8, 4, PixelFormat::Nv12)?,
            Frame::new(vec![128; 8 * 4 * 2], 8, 4, PixelFormat::Yuyv)?,
        ];
        for frame in &frames {
            let jpeg = encode_jpeg(frame, 80)?;
            let decoded = image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg)?;
            assert_eq!((decoded.width(), decoded.height()), (8, 4));
        }
        Ok(())
    }

    #[test]
    fn failure_status_sets_user_message() {
        let tracked = TrackedLabels::default();
        let server = DashboardServer::new(
            DashboardConfig::default(),
            ControlHandle::new(DetectionParameters::default()),
            &tracked,
        );
        let mut sink = DashboardSink {
            shared: server.shared.clone(),
            jpeg_quality: 75,
        };
        let err = LoopError::CaptureFailure {
            source_name: "stub://cam".to_string(),
            frame: 4,
            reason: "unplugged".to_string(),
        };
        sink.publish_status(LoopState::Stopped, Some(&err));

        let state = lock(&server.shared);
        assert_eq!(state.state, LoopState::Stopped);
        assert_eq!(state.error.as_ref().map(|e| e.kind), Some("capture_failure"));
        assert!(state.message.starts_with("Lost the camera feed"));
    }
}
