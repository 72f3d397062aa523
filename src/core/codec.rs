//! # Frame Codec
//!
//! Tokio codec that cuts a byte stream into length-prefixed frames.
//!
//! The first two bytes of every frame hold its total length (little-endian,
//! header included). The decoder waits until a whole frame is buffered and then
//! splits it off the accumulator, so partial frames never reach the consumer and
//! frames are emitted in arrival order. The encoder writes already-framed bytes
//! through unchanged.

use crate::core::packet::HEADER_SIZE;
use crate::error::{constants, ProtocolError, Result};
use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

/// Size of the length prefix
const LENGTH_PREFIX: usize = 2;

/// Length-prefixed framer for one direction of a connection
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let frame_len = u16::from_le_bytes([src[0], src[1]]) as usize;
        if frame_len < HEADER_SIZE {
            // No way to resynchronise a stream whose length prefix cannot
            // even cover the header.
            warn!(frame_len, min = HEADER_SIZE, "{}", constants::ERR_INVALID_HEADER);
            return Err(ProtocolError::InvalidHeader);
        }

        if src.len() < frame_len {
            trace!(buffered = src.len(), frame_len, "Waiting for rest of frame");
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(frame_len).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(&frame);
        Ok(())
    }
}
