//! Error types for [`super::MessageBuffer`] framing.

use thiserror::Error;

/// Errors produced while building, popping, or parsing a [`super::MessageBuffer`].
#[derive(Debug, Error)]
pub enum BufferError {
    /// `pop_frame` was called with the cursor already below the first frame.
    #[error("buffer underflow: no frame at or below the cursor")]
    Underflow,
    /// The wire representation was truncated, declared a frame longer than the
    /// remaining bytes, used more than 3 bytes of padding, or otherwise failed
    /// to satisfy the buffer's layout invariants.
    #[error("malformed message: {0}")]
    MalformedMessage(&'static str),
    /// A single frame payload exceeded the representable `i32` length.
    #[error("frame payload too large to encode")]
    FrameTooLarge,
    /// I/O error while reading or writing the buffer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
