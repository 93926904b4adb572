//! Framed, stackable binary envelope.
//!
//! A [`MessageBuffer`] is an ordered sequence of [`Frame`]s addressed through
//! a LIFO cursor. Each protocol layer (the dispatcher, the multiplexer, the
//! transport's seq-num envelope) pushes its own frame on top of whatever the
//! layer below produced; the receiving side pops frames off in the same
//! order, peeling layers outside-in.
//!
//! The buffer header is big-endian, matching every frame header, for
//! interoperability across platforms.

mod error;
mod frame;

pub use error::BufferError;
pub use frame::Frame;

#[expect(clippy::big_endian_bytes, reason = "wire format is big-endian by design")]
mod wire {
    pub const BUFFER_HEADER_LEN: usize = 8 + 4;
}

use wire::BUFFER_HEADER_LEN;

/// Ordered, cursor-addressed stack of [`Frame`]s.
///
/// `push_frame` always advances the cursor to the newly appended frame,
/// discarding any frames previously above it. `pop_frame` returns the frame at
/// the cursor and retreats the cursor by one; it does not erase the popped
/// frame from storage; a later push overwrites it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBuffer {
    frames: Vec<Frame>,
    /// `-1` when the cursor is below the first frame.
    cursor: i64,
}

impl MessageBuffer {
    /// Construct an empty buffer with the cursor below the first frame.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            frames: Vec::new(),
            cursor: -1,
        }
    }

    /// Current cursor position, or `None` when below the first frame.
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "cursor is bounded by frames actually pushed, never near usize::MAX"
    )]
    pub const fn cursor(&self) -> Option<usize> {
        if self.cursor < 0 { None } else { Some(self.cursor as usize) }
    }

    /// Number of frames logically present (`cursor + 1`).
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "cursor is bounded by frames actually pushed, never near usize::MAX"
    )]
    pub const fn len(&self) -> usize {
        if self.cursor < 0 { 0 } else { (self.cursor + 1) as usize }
    }

    /// Whether the buffer has no frames at or below the cursor.
    #[must_use]
    pub const fn is_empty(&self) -> bool { self.cursor < 0 }

    /// Append `payload` as a new frame after the cursor, discarding any
    /// frames previously above it, and advance the cursor onto it.
    pub fn push_frame(&mut self, payload: Vec<u8>) {
        let next = usize_from_cursor_plus_one(self.cursor);
        self.frames.truncate(next);
        self.frames.push(Frame::new(payload));
        self.cursor = i64::try_from(next).unwrap_or(i64::MAX);
    }

    /// Return the frame at the cursor and retreat the cursor by one.
    ///
    /// # Errors
    /// Returns [`BufferError::Underflow`] if the cursor is already below the
    /// first frame.
    pub fn pop_frame(&mut self) -> Result<Frame, BufferError> {
        let Some(idx) = self.cursor() else {
            return Err(BufferError::Underflow);
        };
        let frame = self.frames.get(idx).cloned().ok_or(BufferError::Underflow)?;
        self.cursor -= 1;
        Ok(frame)
    }

    /// Peek at the frame at the cursor without popping it.
    #[must_use]
    pub fn peek_frame(&self) -> Option<&Frame> { self.cursor().and_then(|idx| self.frames.get(idx)) }

    /// Serialise the buffer's wire representation: an 8-byte total length, a
    /// 4-byte cursor, then each active frame topmost-first.
    ///
    /// # Errors
    /// Returns [`BufferError::FrameTooLarge`] if any active frame's payload is
    /// too large to represent in the 4-byte frame length header.
    pub fn write_to(&self) -> Result<Vec<u8>, BufferError> {
        let active = self.active_frames();
        let mut body = Vec::new();
        for frame in active.iter().rev() {
            frame.write_to(&mut body)?;
        }
        let total_len = u64::try_from(BUFFER_HEADER_LEN + body.len()).map_err(|_| BufferError::FrameTooLarge)?;
        let cursor = i32::try_from(self.cursor).unwrap_or(i32::MAX);
        let mut out = Vec::with_capacity(BUFFER_HEADER_LEN + body.len());
        out.extend_from_slice(&total_len.to_be_bytes());
        out.extend_from_slice(&cursor.to_be_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Parse a buffer previously produced by [`Self::write_to`].
    ///
    /// # Errors
    /// Returns [`BufferError::MalformedMessage`] if the header is truncated,
    /// a declared frame length exceeds the remaining buffer, or any frame's
    /// padding is invalid.
    pub fn read_from(bytes: &[u8]) -> Result<Self, BufferError> {
        if bytes.len() < BUFFER_HEADER_LEN {
            return Err(BufferError::MalformedMessage("truncated buffer header"));
        }
        #[expect(clippy::indexing_slicing, reason = "length checked above")]
        let total_len_bytes: [u8; 8] = bytes[..8]
            .try_into()
            .map_err(|_| BufferError::MalformedMessage("truncated buffer header"))?;
        #[expect(clippy::indexing_slicing, reason = "length checked above")]
        let cursor_bytes: [u8; 4] = bytes[8..12]
            .try_into()
            .map_err(|_| BufferError::MalformedMessage("truncated buffer header"))?;
        let total_len = u64::from_be_bytes(total_len_bytes);
        let cursor = i32::from_be_bytes(cursor_bytes);
        let declared_len = usize::try_from(total_len).map_err(|_| BufferError::MalformedMessage("declared length overflows usize"))?;
        if declared_len != bytes.len() {
            return Err(BufferError::MalformedMessage("declared length does not match buffer size"));
        }

        let frame_count = if cursor < 0 {
            0usize
        } else {
            usize::try_from(cursor).map_err(|_| BufferError::MalformedMessage("cursor overflows usize"))? + 1
        };
        let mut body = bytes.get(BUFFER_HEADER_LEN..).unwrap_or(&[]);
        let mut top_down = Vec::with_capacity(frame_count);
        for _ in 0..frame_count {
            let (frame, consumed) = Frame::read_from(body)?;
            top_down.push(frame);
            body = body.get(consumed..).unwrap_or(&[]);
        }
        if !body.is_empty() {
            return Err(BufferError::MalformedMessage("trailing bytes after declared frames"));
        }
        top_down.reverse();
        Ok(Self {
            frames: top_down,
            cursor: i64::from(cursor),
        })
    }

    fn active_frames(&self) -> &[Frame] {
        match self.cursor() {
            Some(idx) => self.frames.get(..=idx).unwrap_or(&[]),
            None => &[],
        }
    }
}

const fn usize_from_cursor_plus_one(cursor: i64) -> usize {
    if cursor < 0 { 0 } else { (cursor + 1) as usize }
}
