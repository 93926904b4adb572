//! Single-frame encoding: a 4-byte big-endian length header, payload, and
//! zero-padding to a 4-byte boundary.

#![expect(clippy::big_endian_bytes, reason = "wire format is big-endian by design")]

use super::error::BufferError;

/// Length, in bytes, of a single frame's length header.
pub const FRAME_HEADER_LEN: usize = 4;

/// One entry in a [`super::MessageBuffer`]'s frame stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Vec<u8>,
}

impl Frame {
    /// Wrap a raw payload in a new frame.
    #[must_use]
    pub const fn new(payload: Vec<u8>) -> Self { Self { payload } }

    /// Borrow the frame's payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] { &self.payload }

    /// Consume the frame, returning its payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> { self.payload }

    /// Total on-wire length of this frame's header plus payload, excluding
    /// padding: the frame's `frameLength` header field.
    fn header_and_payload_len(&self) -> Result<u32, BufferError> {
        u32::try_from(FRAME_HEADER_LEN + self.payload.len()).map_err(|_| BufferError::FrameTooLarge)
    }

    /// Number of zero-padding bytes needed to align `header + payload` to a
    /// 4-byte boundary. Always in `0..=3`.
    fn padding_len(&self) -> Result<usize, BufferError> {
        let raw = self.header_and_payload_len()?;
        Ok(padding_for(raw))
    }

    /// Total padded length of this frame as it appears on the wire.
    pub(super) fn padded_len(&self) -> Result<usize, BufferError> {
        let raw = self.header_and_payload_len()? as usize;
        Ok(raw + self.padding_len()?)
    }

    /// Append this frame's wire representation to `out`.
    pub(super) fn write_to(&self, out: &mut Vec<u8>) -> Result<(), BufferError> {
        let raw = self.header_and_payload_len()?;
        out.extend_from_slice(&raw.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out.resize(out.len() + padding_for(raw), 0);
        Ok(())
    }

    /// Parse a single frame from the front of `buf`, returning the frame and
    /// the number of bytes consumed (header + payload + padding).
    pub(super) fn read_from(buf: &[u8]) -> Result<(Self, usize), BufferError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(BufferError::MalformedMessage("truncated frame header"));
        }
        #[expect(clippy::indexing_slicing, reason = "length checked above")]
        let header: [u8; FRAME_HEADER_LEN] = buf[..FRAME_HEADER_LEN]
            .try_into()
            .map_err(|_| BufferError::MalformedMessage("truncated frame header"))?;
        let raw = u32::from_be_bytes(header);
        #[expect(clippy::cast_possible_truncation, reason = "usize is at least 32 bits on every supported target")]
        let raw_usize = raw as usize;
        if raw_usize < FRAME_HEADER_LEN {
            return Err(BufferError::MalformedMessage("frame length shorter than header"));
        }
        let payload_len = raw_usize - FRAME_HEADER_LEN;
        let padding = padding_for(raw);
        let total = raw_usize + padding;
        if buf.len() < total {
            return Err(BufferError::MalformedMessage(
                "declared frame length exceeds remaining buffer",
            ));
        }
        let payload = buf
            .get(FRAME_HEADER_LEN..FRAME_HEADER_LEN + payload_len)
            .ok_or(BufferError::MalformedMessage("truncated frame payload"))?
            .to_vec();
        let pad_bytes = buf
            .get(FRAME_HEADER_LEN + payload_len..total)
            .ok_or(BufferError::MalformedMessage("truncated frame padding"))?;
        if pad_bytes.iter().any(|&b| b != 0) {
            return Err(BufferError::MalformedMessage("non-zero padding byte"));
        }
        if padding > 3 {
            return Err(BufferError::MalformedMessage("padding exceeds 3 bytes"));
        }
        Ok((Self::new(payload), total))
    }
}

/// Number of zero bytes needed to round `len` up to a 4-byte boundary.
const fn padding_for(len: u32) -> usize {
    let rem = len % 4;
    if rem == 0 { 0 } else { (4 - rem) as usize }
}
