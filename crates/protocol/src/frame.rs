//! SRCCP framing.
//!
//! # Wire format
//!
//! ```text
//! [2 bytes BE: length][13 bytes: "/SRCCP/v0.1/#"][payload][2 bytes: "#/"]
//!                     |<------------------- length ------------------->|
//! ```
//!
//! Streams may deliver partial frames, several frames per read, or garbage.
//! [`decode`] tells those cases apart so the caller can keep a receive
//! buffer: an incomplete frame is kept whole, a corrupted one costs exactly
//! its first byte before scanning resumes.

use std::ops::Range;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::constants::{
    END_MARKER, LENGTH_PREFIX_SIZE, MAX_PAYLOAD_SIZE, MIN_FRAME_LENGTH, START_MARKER,
};
use crate::error::{FramingError, ProtocolError};

/// Offset of the payload inside a frame.
const HEADER_SIZE: usize = LENGTH_PREFIX_SIZE + START_MARKER.len();

/// Result of one [`decode`] step over the front of a receive buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded<'a> {
    /// A complete frame; `consumed` bytes (prefix through end marker) can be dropped.
    Frame { payload: &'a [u8], consumed: usize },
    /// The buffer is empty or a prefix of a frame. Keep every byte and read more.
    Incomplete,
    /// The first `consumed` bytes cannot start a valid frame. Drop them and retry.
    Invalid {
        consumed: usize,
        reason: FramingError,
    },
}

/// Wraps `payload` into a frame.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len() + END_MARKER.len());
    put_frame(payload, &mut buf)?;
    Ok(buf.to_vec())
}

/// Examines the front of `buf`.
pub fn decode(buf: &[u8]) -> Decoded<'_> {
    match step(buf) {
        Step::Frame { payload, consumed } => Decoded::Frame {
            payload: &buf[payload],
            consumed,
        },
        Step::Incomplete => Decoded::Incomplete,
        Step::Invalid { consumed, reason } => Decoded::Invalid { consumed, reason },
    }
}

enum Step {
    Frame { payload: Range<usize>, consumed: usize },
    Incomplete,
    Invalid { consumed: usize, reason: FramingError },
}

fn step(buf: &[u8]) -> Step {
    if buf.is_empty() {
        return Step::Incomplete;
    }

    if !could_start_frame(buf, 0) {
        // Skip the noise run in one go, stopping at the next offset that
        // could still turn out to be a frame.
        let consumed = (1..buf.len())
            .find(|&pos| could_start_frame(buf, pos))
            .unwrap_or(buf.len());
        return Step::Invalid {
            consumed,
            reason: FramingError::NoStartMarker,
        };
    }

    if buf.len() < HEADER_SIZE {
        return Step::Incomplete;
    }

    let length = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    if length < MIN_FRAME_LENGTH {
        return Step::Invalid {
            consumed: 1,
            reason: FramingError::LengthTooShort(length),
        };
    }

    let total = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total {
        return Step::Incomplete;
    }

    let end = total - END_MARKER.len();
    if &buf[end..total] != END_MARKER {
        return Step::Invalid {
            consumed: 1,
            reason: FramingError::EndMarkerMismatch(length),
        };
    }

    Step::Frame {
        payload: HEADER_SIZE..end,
        consumed: total,
    }
}

/// Returns `true` if the bytes after a length prefix at `pos` match the start
/// marker as far as they are available.
fn could_start_frame(buf: &[u8], pos: usize) -> bool {
    let marker_at = pos + LENGTH_PREFIX_SIZE;
    if marker_at >= buf.len() {
        return true;
    }
    let available = &buf[marker_at..];
    let n = available.len().min(START_MARKER.len());
    available[..n] == START_MARKER[..n]
}

fn put_frame(payload: &[u8], dst: &mut BytesMut) -> Result<(), ProtocolError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }
    let length = MIN_FRAME_LENGTH + payload.len();
    dst.reserve(LENGTH_PREFIX_SIZE + length);
    dst.put_u16(length as u16);
    dst.put_slice(START_MARKER);
    dst.put_slice(payload);
    dst.put_slice(END_MARKER);
    Ok(())
}

/// [`Decoder`]/[`Encoder`] over SRCCP frames for `FramedRead`/`FramedWrite`.
///
/// Items are raw payloads; corrupted frames are logged and skipped.
#[derive(Debug, Default)]
pub struct FrameCodec {
    discarded: u64,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of corrupted frames skipped so far (noise bytes not counted).
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match step(src) {
                Step::Frame { payload, consumed } => {
                    let mut frame = src.split_to(consumed);
                    frame.truncate(payload.end);
                    frame.advance(payload.start);
                    return Ok(Some(frame.freeze()));
                }
                Step::Incomplete => return Ok(None),
                Step::Invalid { consumed, reason } => {
                    if reason == FramingError::NoStartMarker {
                        tracing::trace!(bytes = consumed, "skipping bytes outside a frame");
                    } else {
                        self.discarded += 1;
                        tracing::warn!("discarding corrupted frame: {reason}");
                    }
                    src.advance(consumed);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            tracing::debug!(bytes = src.len(), "dropping incomplete frame at end of stream");
            src.clear();
        }
        Ok(None)
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        put_frame(&item, dst)
    }
}
