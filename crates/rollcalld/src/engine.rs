use crate::annotate::Annotator;
use rollcall_core::{Clock, Detection, Detector, DetectorError, Ledger, Sighting};
use rollcall_hw::{Frame, FrameSource};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{broadcast, mpsc};

/// Encoded frames buffered per viewer before it starts lagging.
const STREAM_BUFFER: usize = 2;
const REQUEST_QUEUE: usize = 8;
/// Longest an HTTP worker waits on the engine. A stalled camera read
/// delays requests by at most this much.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("engine request queue is full")]
    Busy,
    #[error("engine did not answer within {0:?}")]
    Timeout(Duration),
}

impl EngineError {
    /// Engine temporarily or permanently unreachable, as opposed to a failed detection.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::ChannelClosed | Self::Busy | Self::Timeout(_))
    }
}

/// Result of running detection on an uploaded still.
#[derive(Debug, Clone)]
pub struct StillResult {
    pub detections: Vec<Detection>,
    /// Labels recorded for the first time by this still.
    pub recorded: Vec<String>,
}

type StreamReceiver = broadcast::Receiver<Arc<Vec<u8>>>;

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    DetectStill {
        frame: Frame,
        reply: std_mpsc::SyncSender<Result<StillResult, EngineError>>,
    },
    Subscribe {
        reply: std_mpsc::SyncSender<Option<StreamReceiver>>,
    },
}

/// Clone-safe handle to the engine thread.
///
/// Methods block the calling thread for at most the request timeout; call
/// them from HTTP workers, never from inside the async runtime.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Duration,
}

impl EngineHandle {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Detect objects in a still and record their labels.
    pub fn detect_still(&self, frame: Frame) -> Result<StillResult, EngineError> {
        let (reply, rx) = std_mpsc::sync_channel(1);
        self.request(EngineRequest::DetectStill { frame, reply }, rx)?
    }

    /// Subscribe to annotated JPEG frames; `None` when no camera is capturing.
    pub fn subscribe(&self) -> Result<Option<StreamReceiver>, EngineError> {
        let (reply, rx) = std_mpsc::sync_channel(1);
        self.request(EngineRequest::Subscribe { reply }, rx)
    }

    fn request<T>(&self, req: EngineRequest, rx: std_mpsc::Receiver<T>) -> Result<T, EngineError> {
        self.tx.try_send(req).map_err(|e| match e {
            TrySendError::Full(_) => EngineError::Busy,
            TrySendError::Closed(_) => EngineError::ChannelClosed,
        })?;
        rx.recv_timeout(self.timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => {
                tracing::warn!(timeout = ?self.timeout, "engine request timed out");
                EngineError::Timeout(self.timeout)
            }
            RecvTimeoutError::Disconnected => EngineError::ChannelClosed,
        })
    }
}

/// Everything the engine thread owns.
pub struct EngineParts {
    pub detector: Box<dyn Detector>,
    pub source: Option<Box<dyn FrameSource>>,
    pub ledger: Arc<Ledger>,
    pub clock: Arc<dyn Clock>,
    pub annotator: Annotator,
}

struct Engine {
    detector: Box<dyn Detector>,
    source: Option<Box<dyn FrameSource>>,
    frames: Option<broadcast::Sender<Arc<Vec<u8>>>>,
    ledger: Arc<Ledger>,
    clock: Arc<dyn Clock>,
    annotator: Annotator,
}

/// Spawn the engine on a dedicated OS thread.
///
/// With a frame source the thread runs a continuous capture loop and serves
/// requests between frames; without one it only serves requests. The thread
/// exits once every [`EngineHandle`] is dropped.
pub fn spawn_engine(parts: EngineParts) -> Result<EngineHandle, EngineError> {
    let frames = parts
        .source
        .as_ref()
        .map(|_| broadcast::channel(STREAM_BUFFER).0);

    let engine = Engine {
        detector: parts.detector,
        source: parts.source,
        frames,
        ledger: parts.ledger,
        clock: parts.clock,
        annotator: parts.annotator,
    };

    let (tx, rx) = mpsc::channel::<EngineRequest>(REQUEST_QUEUE);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            engine.run(rx);
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle {
        tx,
        timeout: DEFAULT_REQUEST_TIMEOUT,
    })
}

impl Engine {
    fn run(mut self, mut rx: mpsc::Receiver<EngineRequest>) {
        loop {
            if self.source.is_none() {
                match rx.blocking_recv() {
                    Some(req) => self.handle(req),
                    None => return,
                }
                continue;
            }

            loop {
                match rx.try_recv() {
                    Ok(req) => self.handle(req),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return,
                }
            }
            self.capture_once();
        }
    }

    fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::DetectStill { frame, reply } => {
                let result = self.process(&frame).map(|(detections, recorded)| StillResult {
                    detections,
                    recorded,
                });
                let _ = reply.send(result);
            }
            EngineRequest::Subscribe { reply } => {
                let _ = reply.send(self.frames.as_ref().map(|tx| tx.subscribe()));
            }
        }
    }

    /// Detect, then record every distinct label in one ledger update.
    fn process(&mut self, frame: &Frame) -> Result<(Vec<Detection>, Vec<String>), EngineError> {
        let detections = self.detector.detect(&frame.image)?;
        if detections.is_empty() {
            return Ok((detections, Vec::new()));
        }

        let observed_at = self.clock.now();
        let outcomes = self
            .ledger
            .record_frame(detections.iter().map(|d| d.label.as_str()), observed_at);

        let mut recorded = Vec::new();
        for (label, outcome) in outcomes {
            match outcome {
                Sighting::Recorded { late } => {
                    tracing::info!(label = %label, late, at = %observed_at.format("%H:%M:%S"), "attendance recorded");
                    recorded.push(label);
                }
                Sighting::Updated => tracing::debug!(label = %label, "sighting time updated"),
                Sighting::Ignored => {}
            }
        }
        Ok((detections, recorded))
    }

    /// Grab one camera frame, record it, and publish it to any viewers.
    ///
    /// A capture failure stops the loop for good; uploads keep working.
    fn capture_once(&mut self) {
        let Some(source) = self.source.as_mut() else {
            return;
        };

        let mut frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(source = %source.describe(), error = %e, "camera capture failed; stopping capture loop");
                self.source = None;
                self.frames = None;
                return;
            }
        };

        let detections = match self.process(&frame) {
            Ok((detections, _)) => detections,
            Err(e) => {
                tracing::warn!(seq = frame.sequence, error = %e, "detection failed; frame skipped");
                Vec::new()
            }
        };

        let Some(frames) = self.frames.as_ref() else {
            return;
        };
        if frames.receiver_count() == 0 {
            return;
        }

        self.annotator.annotate(&mut frame.image, &detections);
        match self.annotator.encode_jpeg(&frame.image) {
            Ok(jpeg) => {
                let _ = frames.send(Arc::new(jpeg));
            }
            Err(e) => tracing::warn!(seq = frame.sequence, error = %e, "JPEG encode failed"),
        }
    }
}
