//! Demultiplexing of container log streams.
//!
//! The task log service forwards the container runtime's multiplexed
//! format: every payload is preceded by an 8 byte header
//! `[stream, 0, 0, 0, len_be_u32]`.

use thiserror::Error;

const HEADER_LEN: usize = 8;

/// Largest frame payload accepted from the runtime.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Longest log line kept while waiting for its newline.
pub const MAX_LINE_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DemuxError {
    #[error("unknown stream type {0}")]
    UnknownStream(u8),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("frame of {len} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { len: usize, limit: usize },
    #[error("line exceeds the {limit} byte limit")]
    LineTooLong { limit: usize },
}

/// Incremental frame decoder; chunks may split headers and payloads anywhere.
#[derive(Debug, Default)]
pub struct Demuxer {
    buf: Vec<u8>,
}

impl Demuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<(StreamKind, Vec<u8>)>, DemuxError> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            if self.buf.len() < HEADER_LEN {
                break;
            }
            let len = u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]])
                as usize;
            if len > MAX_FRAME_LEN {
                self.buf.clear();
                return Err(DemuxError::FrameTooLarge {
                    len,
                    limit: MAX_FRAME_LEN,
                });
            }
            if self.buf.len() < HEADER_LEN + len {
                break;
            }

            let stream = self.buf[0];
            let payload: Vec<u8> = self.buf.drain(..HEADER_LEN + len).skip(HEADER_LEN).collect();
            let kind = match stream {
                0 => StreamKind::Stdin,
                1 => StreamKind::Stdout,
                2 => StreamKind::Stderr,
                3 => {
                    return Err(DemuxError::Runtime(
                        String::from_utf8_lossy(&payload).into_owned(),
                    ))
                }
                other => return Err(DemuxError::UnknownStream(other)),
            };
            frames.push((kind, payload));
        }

        Ok(frames)
    }
}

/// Reassembles newline-terminated lines from arbitrary byte payloads.
///
/// A line growing past the limit without a newline is discarded and
/// reported as [`DemuxError::LineTooLong`].
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    max_len: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::with_max_len(MAX_LINE_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_len,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, DemuxError> {
        let mut lines = Vec::new();
        let mut rest = bytes;

        // Only the new bytes are scanned; `pending` never holds a newline.
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.append(&rest[..pos])?;
            rest = &rest[pos + 1..];

            let mut line = std::mem::take(&mut self.pending);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        self.append(rest)?;

        Ok(lines)
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), DemuxError> {
        if self.pending.len() + bytes.len() > self.max_len {
            self.pending.clear();
            return Err(DemuxError::LineTooLong {
                limit: self.max_len,
            });
        }
        self.pending.extend_from_slice(bytes);
        Ok(())
    }
}

/// Encode a payload as a single frame, as the runtime does.
pub fn encode_frame(kind: StreamKind, payload: &[u8]) -> Vec<u8> {
    let stream = match kind {
        StreamKind::Stdin => 0u8,
        StreamKind::Stdout => 1,
        StreamKind::Stderr => 2,
    };
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&[stream, 0, 0, 0]);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}
