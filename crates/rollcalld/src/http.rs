//! HTTP front end: web UI, roster JSON, email/export actions, uploads and
//! the live MJPEG stream, served by a fixed pool of `tiny_http` workers.

use crate::config::FrameSourceKind;
use crate::engine::EngineHandle;
use crate::export::CsvExporter;
use crate::notifier::Notifier;
use crate::stream::{self, MjpegStream};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use rollcall_core::{Clock, Ledger};
use rollcall_hw::{decode_still, Frame};
use serde::Deserialize;
use serde_json::json;
use std::io::Read;
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

const INDEX_HTML: &str = include_str!("../static/index.html");
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Shared state injected into every handler.
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub engine: EngineHandle,
    pub clock: Arc<dyn Clock>,
    pub notifier: Option<Arc<dyn Notifier>>,
    pub exporter: CsvExporter,
    pub frame_source: FrameSourceKind,
    /// Camera description, when capturing.
    pub camera: Option<String>,
    /// Class names the detector can report.
    pub classes: usize,
}

/// A fully buffered response.
#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Reply {
    fn json(status: u16, value: serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: value.to_string().into_bytes(),
        }
    }

    fn message(status: u16, message: impl Into<String>) -> Self {
        Self::json(status, json!({ "message": message.into() }))
    }

    fn html(body: &str) -> Self {
        Self {
            status: 200,
            content_type: "text/html; charset=utf-8",
            body: body.as_bytes().to_vec(),
        }
    }
}

#[derive(Error, Debug)]
enum UploadError {
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid base64 image: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error(transparent)]
    Frame(#[from] rollcall_hw::FrameError),
}

#[derive(Deserialize)]
struct UploadBody {
    /// Data URL (`data:image/jpeg;base64,...`) or bare base64.
    image: String,
}

/// Start `workers` threads pulling requests off `server`.
pub fn serve(
    state: Arc<AppState>,
    server: Arc<Server>,
    workers: usize,
) -> std::io::Result<Vec<JoinHandle<()>>> {
    (0..workers)
        .map(|i| {
            let state = Arc::clone(&state);
            let server = Arc::clone(&server);
            std::thread::Builder::new()
                .name(format!("rollcall-http-{i}"))
                .spawn(move || {
                    for request in server.incoming_requests() {
                        handle(&state, request);
                    }
                    tracing::debug!(worker = i, "http worker exiting");
                })
        })
        .collect()
}

fn handle(state: &AppState, mut request: Request) {
    let method = request.method().clone();
    let path = request.url().split('?').next().unwrap_or("/").to_string();
    tracing::debug!(%method, path = %path, "request");

    if method == Method::Get && path == "/video_feed" {
        open_video_feed(state, request);
        return;
    }

    let content_type = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Content-Type"))
        .map(|h| h.value.as_str().to_string());

    let declared = request.body_length();
    let body = match read_body(request.as_reader(), declared, MAX_UPLOAD_BYTES) {
        Ok(body) => body,
        Err(reply) => {
            respond(request, reply);
            return;
        }
    };

    let reply = route(state, &method, &path, content_type.as_deref(), &body);
    respond(request, reply);
}

/// Buffer a request body of at most `limit` bytes.
///
/// A declared length over the limit is refused before reading; chunked
/// bodies are cut off one byte past the limit.
fn read_body<R: Read>(reader: R, declared: Option<usize>, limit: usize) -> Result<Vec<u8>, Reply> {
    let too_large = || Reply::message(413, "Request body too large.");
    if declared.is_some_and(|len| len > limit) {
        return Err(too_large());
    }

    let mut body = Vec::new();
    if let Err(e) = reader.take(limit as u64 + 1).read_to_end(&mut body) {
        tracing::warn!(error = %e, "failed to read request body");
        return Err(Reply::message(400, "Unreadable request body."));
    }
    if body.len() > limit {
        return Err(too_large());
    }
    Ok(body)
}

fn respond(request: Request, reply: Reply) {
    let response = Response::from_data(reply.body)
        .with_status_code(reply.status)
        .with_header(header("Content-Type", reply.content_type));
    if let Err(e) = request.respond(response) {
        tracing::debug!(error = %e, "client went away before response");
    }
}

fn header(name: &str, value: &str) -> Header {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).expect("static header is valid ASCII")
}

/// Hand the request to its own thread that streams until the camera stops
/// or the viewer disconnects.
fn open_video_feed(state: &AppState, request: Request) {
    let rx = match state.engine.subscribe() {
        Ok(Some(rx)) => rx,
        Ok(None) => {
            respond(request, Reply::message(404, "Camera capture is not running."));
            return;
        }
        Err(e) => {
            respond(request, Reply::message(503, e.to_string()));
            return;
        }
    };

    let spawned = std::thread::Builder::new()
        .name("rollcall-mjpeg".into())
        .spawn(move || {
            tracing::info!("video viewer connected");
            let response = Response::new(
                StatusCode(200),
                vec![
                    header("Content-Type", &stream::content_type()),
                    header("Cache-Control", "no-cache"),
                ],
                MjpegStream::new(rx),
                None,
                None,
            );
            let _ = request.respond(response);
            tracing::info!("video viewer disconnected");
        });
    if let Err(e) = spawned {
        tracing::error!(error = %e, "failed to spawn stream thread");
    }
}

/// Dispatch one buffered request.
pub fn route(
    state: &AppState,
    method: &Method,
    path: &str,
    content_type: Option<&str>,
    body: &[u8],
) -> Reply {
    match (method, path) {
        (Method::Get, "/") => Reply::html(INDEX_HTML),
        (Method::Get, "/get_attendance") => get_attendance(state),
        (Method::Post, "/send_attendance") => send_attendance(state),
        (Method::Post, "/export_attendance") => export_attendance(state),
        (Method::Post, "/reset_attendance") => reset_attendance(state),
        (Method::Post, "/detect") => detect(state, content_type, body),
        (Method::Get, "/status") => status(state),
        (
            _,
            "/" | "/get_attendance" | "/send_attendance" | "/export_attendance"
            | "/reset_attendance" | "/detect" | "/status" | "/video_feed",
        ) => Reply::message(405, "Method not allowed."),
        _ => Reply::message(404, "Not found."),
    }
}

fn get_attendance(state: &AppState) -> Reply {
    // Serialized straight to bytes to keep first-sighting order.
    match serde_json::to_vec(&state.ledger.snapshot()) {
        Ok(body) => Reply {
            status: 200,
            content_type: "application/json",
            body,
        },
        Err(e) => Reply::message(500, format!("Failed to render roster: {e}")),
    }
}

fn send_attendance(state: &AppState) -> Reply {
    let Ok(notification) = state.ledger.notification() else {
        return Reply::message(400, "No attendees to send.");
    };
    let Some(notifier) = &state.notifier else {
        return Reply::message(503, "Email notifications are not configured.");
    };

    match notifier.send(&notification) {
        Ok(()) => Reply::message(200, "Attendance list sent successfully!"),
        Err(e) => {
            tracing::error!(error = %e, "attendance email failed");
            Reply::message(502, format!("Failed to send attendance list: {e}"))
        }
    }
}

fn export_attendance(state: &AppState) -> Reply {
    let Ok(rows) = state.ledger.to_export_rows() else {
        return Reply::message(400, "No attendees to export.");
    };

    let date = state.clock.now().date();
    match state.exporter.write(date, &rows) {
        Ok(path) => {
            let file = CsvExporter::file_name(date);
            Reply::json(
                200,
                json!({
                    "message": format!("Attendance list saved as {file}."),
                    "path": path.display().to_string(),
                }),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "attendance export failed");
            Reply::message(500, format!("Failed to export attendance list: {e}"))
        }
    }
}

fn reset_attendance(state: &AppState) -> Reply {
    let removed = state.ledger.reset();
    tracing::info!(removed, "attendance reset");
    Reply::json(200, json!({ "message": "Attendance cleared.", "removed": removed }))
}

fn detect(state: &AppState, content_type: Option<&str>, body: &[u8]) -> Reply {
    let frame = match decode_upload(content_type, body) {
        Ok(frame) => frame,
        Err(e) => return Reply::message(400, format!("Could not decode image: {e}")),
    };

    match state.engine.detect_still(frame) {
        Ok(result) => Reply::json(
            200,
            json!({
                "detections": result.detections,
                "recorded": result.recorded,
            }),
        ),
        Err(e) if e.is_unavailable() => Reply::message(503, e.to_string()),
        Err(e) => {
            tracing::warn!(error = %e, "still detection failed");
            Reply::message(500, format!("Detection failed: {e}"))
        }
    }
}

fn decode_upload(content_type: Option<&str>, body: &[u8]) -> Result<Frame, UploadError> {
    let is_json = content_type.is_some_and(|ct| ct.starts_with("application/json"));
    if !is_json {
        return Ok(decode_still(body)?);
    }

    let upload: UploadBody = serde_json::from_slice(body)?;
    let encoded = match upload.image.split_once(";base64,") {
        Some((_, data)) => data,
        None => upload.image.as_str(),
    };
    let bytes = BASE64_STANDARD.decode(encoded.trim())?;
    Ok(decode_still(&bytes)?)
}

fn status(state: &AppState) -> Reply {
    Reply::json(
        200,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "frame_source": state.frame_source.to_string(),
            "camera": state.camera,
            "deadline": state.ledger.deadline().to_string(),
            "repeat_policy": state.ledger.policy().to_string(),
            "entries": state.ledger.len(),
            "classes": state.classes,
            "mail_configured": state.notifier.is_some(),
            "export_dir": state.exporter.dir().display().to_string(),
        }),
    )
}
