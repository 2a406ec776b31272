//! Line-delimited JSON framing for [`Envelope`]s.

use crate::protocol::Envelope;
use thiserror::Error;

/// Upper bound on a single frame; longer lines are rejected unread.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is missing its trailing newline")]
    MissingTerminator,
    #[error("empty frame")]
    Empty,
    #[error("frame exceeds {MAX_FRAME_LEN} bytes")]
    TooLong,
    #[error("frame is not valid utf-8")]
    InvalidUtf8,
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Encodes one envelope as a newline-terminated frame.
pub fn encode(envelope: &Envelope) -> Result<String, FrameError> {
    let mut line = serde_json::to_string(envelope)?;
    line.push('\n');
    Ok(line)
}

/// Decodes one complete frame, including its terminator.
pub fn decode(frame: &str) -> Result<Envelope, FrameError> {
    if frame.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLong);
    }
    let body = frame
        .strip_suffix('\n')
        .ok_or(FrameError::MissingTerminator)?;
    let body = body.strip_suffix('\r').unwrap_or(body);
    if body.trim().is_empty() {
        return Err(FrameError::Empty);
    }
    Ok(serde_json::from_str(body)?)
}
