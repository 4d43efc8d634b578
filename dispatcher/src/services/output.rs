//! Bounded capture of build process output.
//!
//! Keeps the most recent `limit` bytes of a stream. Older bytes are dropped
//! and the rendered text starts with a marker saying how many were lost.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 8 * 1024;

/// Captured stdout/stderr of one process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Ring buffer over the tail of a byte stream.
#[derive(Debug)]
pub struct OutputBuffer {
    limit: usize,
    buf: VecDeque<u8>,
    dropped: usize,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            buf: VecDeque::with_capacity(limit.min(READ_CHUNK)),
            dropped: 0,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        if self.limit == 0 {
            self.dropped += bytes.len();
            return;
        }
        // Only the tail of an oversized chunk can survive.
        let keep = if bytes.len() > self.limit {
            self.dropped += bytes.len() - self.limit;
            &bytes[bytes.len() - self.limit..]
        } else {
            bytes
        };
        let overflow = (self.buf.len() + keep.len()).saturating_sub(self.limit);
        if overflow > 0 {
            self.buf.drain(..overflow);
            self.dropped += overflow;
        }
        self.buf.extend(keep);
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Render as text, replacing invalid UTF-8 (a cut may split a character).
    pub fn into_string(self) -> String {
        let (front, back) = self.buf.as_slices();
        let mut bytes = Vec::with_capacity(front.len() + back.len());
        bytes.extend_from_slice(front);
        bytes.extend_from_slice(back);
        let text = String::from_utf8_lossy(&bytes);
        if self.dropped > 0 {
            format!("...truncated {} bytes...\n{}", self.dropped, text)
        } else {
            text.into_owned()
        }
    }
}

/// Buffer shared between a reader task and the executor.
pub type SharedOutput = Arc<Mutex<OutputBuffer>>;

pub fn shared(limit: usize) -> SharedOutput {
    Arc::new(Mutex::new(OutputBuffer::new(limit)))
}

/// Drain `reader` to EOF into `sink`.
///
/// Bytes land in `sink` as they arrive, so an aborted capture keeps what
/// it had read.
pub async fn capture<R: AsyncRead + Unpin>(reader: Option<R>, sink: SharedOutput) {
    let Some(mut reader) = reader else {
        return;
    };
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("output stream read error: {e}");
                break;
            }
        };
        lock(&sink).push(&chunk[..n]);
    }
}

/// Take the text captured so far, leaving an empty buffer behind.
pub fn take(sink: &SharedOutput) -> String {
    let mut guard = lock(sink);
    let limit = guard.limit;
    std::mem::replace(&mut *guard, OutputBuffer::new(limit)).into_string()
}

fn lock(sink: &SharedOutput) -> MutexGuard<'_, OutputBuffer> {
    // A panicking reader cannot leave the buffer half-written.
    sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
