//! Output capture from a running execution unit.
//!
//! Chunks are appended as raw bytes in arrival order and converted to text
//! once, at the end, so a multibyte character split across two chunks comes
//! out intact. The sink is owned by the caller so whatever arrived before a
//! stream error or a deadline is still available afterwards.

use futures_util::stream::StreamExt;

use crate::errors::RuntimeError;
use crate::runtime::{ContainerRuntime, SandboxHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub output: String,
    pub truncated: bool,
}

#[derive(Debug, Default)]
pub struct CaptureSink {
    buf: Vec<u8>,
    limit: Option<usize>,
    truncated: bool,
}

impl CaptureSink {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Append `bytes`, clipping at the limit. Returns false once output had to
    /// be dropped.
    pub fn push(&mut self, bytes: &[u8]) -> bool {
        match self.limit {
            Some(limit) => {
                let room = limit.saturating_sub(self.buf.len());
                if bytes.len() > room {
                    self.buf.extend_from_slice(&bytes[..room]);
                    self.truncated = true;
                    return false;
                }
                self.buf.extend_from_slice(bytes);
                true
            }
            None => {
                self.buf.extend_from_slice(bytes);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Text accumulated so far.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }

    pub fn finish(self) -> CapturedOutput {
        CapturedOutput {
            output: match String::from_utf8(self.buf) {
                Ok(s) => s,
                Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
            },
            truncated: self.truncated,
        }
    }
}

/// Read the unit's combined output into `sink` until the stream ends or the
/// sink fills up.
pub async fn capture_into(
    runtime: &dyn ContainerRuntime,
    handle: &SandboxHandle,
    sink: &mut CaptureSink,
) -> Result<(), RuntimeError> {
    let mut stream = runtime.stream_output(handle).await?;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if !sink.push(chunk.bytes()) {
            log::warn!(
                "Output of unit {} exceeded {} bytes, truncating",
                handle.name,
                sink.len()
            );
            break;
        }
    }
    Ok(())
}

/// Capture everything the unit prints. A stream error is returned together
/// with the output received before it.
pub async fn capture(
    runtime: &dyn ContainerRuntime,
    handle: &SandboxHandle,
    limit: Option<usize>,
) -> Result<CapturedOutput, (RuntimeError, String)> {
    let mut sink = CaptureSink::new(limit);
    match capture_into(runtime, handle, &mut sink).await {
        Ok(()) => Ok(sink.finish()),
        Err(e) => Err((e, sink.text())),
    }
}
