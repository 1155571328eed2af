//! `multipart/x-mixed-replace` body for the live video feed.

use std::io::{self, Read};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

pub const BOUNDARY: &str = "frame";

pub fn content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={BOUNDARY}")
}

/// Blocking reader that yields one multipart part per broadcast JPEG.
///
/// Reaches EOF once the engine drops the broadcast sender.
pub struct MjpegStream {
    rx: broadcast::Receiver<Arc<Vec<u8>>>,
    part: Vec<u8>,
    pos: usize,
}

impl MjpegStream {
    pub fn new(rx: broadcast::Receiver<Arc<Vec<u8>>>) -> Self {
        Self {
            rx,
            part: Vec::new(),
            pos: 0,
        }
    }

    fn next_part(&mut self) -> bool {
        loop {
            match self.rx.blocking_recv() {
                Ok(jpeg) => {
                    self.part = encode_part(&jpeg);
                    self.pos = 0;
                    return true;
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "slow viewer; dropping frames");
                }
                Err(RecvError::Closed) => return false,
            }
        }
    }
}

impl Read for MjpegStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.part.len() && !self.next_part() {
            return Ok(0);
        }
        let n = buf.len().min(self.part.len() - self.pos);
        buf[..n].copy_from_slice(&self.part[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

fn encode_part(jpeg: &[u8]) -> Vec<u8> {
    let header = format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}
