//! Decoder strategies.
//!
//! A [`Decoder`] is a cheap, shareable strategy value. For every connection
//! the transport asks it for a fresh codec, which carries any per-stream
//! framing state. Two strategies are provided:
//!
//! - [`ChunkDecoder`]: no framing. Whatever arrived, up to a fixed buffer
//!   size, is one payload.
//! - [`FrameDecoder`]: control-byte framing.
//!   - `0x01` + 4-byte big-endian length + payload
//!   - `0x02` then raw bytes until the sender closes its write side
//!
//! A codec returning `Ok(None)` at end of stream with an empty buffer means
//! the peer closed cleanly. Errors mean the stream was malformed.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec;

use crate::error::{P2pError, P2pResult};

/// Read buffer size of the default decoder.
pub const DEFAULT_CHUNK_SIZE: usize = 1028;

/// Default maximum frame size for [`FrameDecoder`] (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Control byte announcing a length-prefixed message.
pub const CONTROL_MESSAGE: u8 = 0x01;

/// Control byte announcing a payload that runs until end of stream.
pub const CONTROL_STREAM: u8 = 0x02;

/// Control byte + 4-byte length.
const FRAME_HEADER_SIZE: usize = 5;

/// Strategy that produces a per-connection decoding codec.
pub trait Decoder: Send + Sync + 'static {
    /// Codec type driving a single connection.
    type Codec: codec::Decoder<Item = Bytes, Error = P2pError> + Send + 'static;

    /// Create the codec for a new connection.
    fn new_codec(&self) -> Self::Codec;
}

/// Default decoder: each read of up to [`DEFAULT_CHUNK_SIZE`] bytes is one
/// message payload.
#[derive(Debug, Clone, Copy)]
pub struct ChunkDecoder {
    chunk_size: usize,
}

impl ChunkDecoder {
    /// Create a decoder with a custom chunk size.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// The configured chunk size.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Decoder for ChunkDecoder {
    type Codec = ChunkCodec;

    fn new_codec(&self) -> ChunkCodec {
        ChunkCodec {
            chunk_size: self.chunk_size,
        }
    }
}

/// Codec for [`ChunkDecoder`].
#[derive(Debug)]
pub struct ChunkCodec {
    chunk_size: usize,
}

impl codec::Decoder for ChunkCodec {
    type Item = Bytes;
    type Error = P2pError;

    fn decode(&mut self, src: &mut BytesMut) -> P2pResult<Option<Bytes>> {
        if src.is_empty() {
            return Ok(None);
        }
        let take = src.len().min(self.chunk_size);
        Ok(Some(src.split_to(take).freeze()))
    }
}

/// Length-prefixed decoder with control bytes.
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Create a decoder with a custom maximum frame size.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// The configured maximum frame size.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl Decoder for FrameDecoder {
    type Codec = FrameCodec;

    fn new_codec(&self) -> FrameCodec {
        FrameCodec::new(self.max_frame_size)
    }
}

/// Where the codec is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    /// Waiting for a control byte.
    Header,
    /// Header read, waiting for `len` payload bytes.
    Body(usize),
    /// Stream marker read, collecting until EOF.
    Stream,
}

/// Codec for [`FrameDecoder`]. Also encodes payloads into frames.
#[derive(Debug)]
pub struct FrameCodec {
    max_frame_size: usize,
    state: FrameState,
}

impl FrameCodec {
    /// Create a new frame codec.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            state: FrameState::Header,
        }
    }

    /// Write the stream marker. Every byte written after it, until the
    /// writer shuts down, is delivered as one message.
    pub fn encode_stream_header(dst: &mut BytesMut) {
        dst.put_u8(CONTROL_STREAM);
    }

    /// Frame a single payload into a fresh buffer.
    pub fn frame(payload: &[u8]) -> P2pResult<Bytes> {
        let mut codec = FrameCodec::default();
        let mut dst = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
        codec::Encoder::encode(&mut codec, Bytes::copy_from_slice(payload), &mut dst)?;
        Ok(dst.freeze())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl codec::Decoder for FrameCodec {
    type Item = Bytes;
    type Error = P2pError;

    fn decode(&mut self, src: &mut BytesMut) -> P2pResult<Option<Bytes>> {
        loop {
            match self.state {
                FrameState::Header => {
                    let Some(&control) = src.first() else {
                        return Ok(None);
                    };
                    match control {
                        CONTROL_MESSAGE => {
                            if src.len() < FRAME_HEADER_SIZE {
                                return Ok(None);
                            }
                            let mut len_bytes = [0u8; 4];
                            len_bytes.copy_from_slice(&src[1..FRAME_HEADER_SIZE]);
                            let length = u32::from_be_bytes(len_bytes) as usize;

                            if length > self.max_frame_size {
                                return Err(P2pError::MessageTooLarge {
                                    size: length,
                                    max: self.max_frame_size,
                                });
                            }

                            src.advance(FRAME_HEADER_SIZE);
                            self.state = FrameState::Body(length);
                        }
                        CONTROL_STREAM => {
                            src.advance(1);
                            self.state = FrameState::Stream;
                        }
                        other => {
                            return Err(P2pError::MalformedFrame(format!(
                                "unknown control byte 0x{other:02x}"
                            )));
                        }
                    }
                }
                FrameState::Body(length) => {
                    if src.len() < length {
                        src.reserve(length - src.len());
                        return Ok(None);
                    }
                    self.state = FrameState::Header;
                    return Ok(Some(src.split_to(length).freeze()));
                }
                FrameState::Stream => {
                    if src.len() > self.max_frame_size {
                        return Err(P2pError::MessageTooLarge {
                            size: src.len(),
                            max: self.max_frame_size,
                        });
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> P2pResult<Option<Bytes>> {
        match self.state {
            FrameState::Stream => {
                self.state = FrameState::Header;
                Ok(Some(src.split().freeze()))
            }
            FrameState::Body(length) if src.len() < length => Err(P2pError::MalformedFrame(
                format!("stream ended {} bytes into a {length} byte frame", src.len()),
            )),
            _ => match self.decode(src)? {
                Some(frame) => Ok(Some(frame)),
                None if src.is_empty() => Ok(None),
                None => Err(P2pError::MalformedFrame(format!(
                    "{} trailing bytes at end of stream",
                    src.len()
                ))),
            },
        }
    }
}

impl codec::Encoder<Bytes> for FrameCodec {
    type Error = P2pError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> P2pResult<()> {
        let length = payload.len();
        if length > self.max_frame_size {
            return Err(P2pError::MessageTooLarge {
                size: length,
                max: self.max_frame_size,
            });
        }

        dst.reserve(FRAME_HEADER_SIZE + length);
        dst.put_u8(CONTROL_MESSAGE);
        dst.put_u32(length as u32);
        dst.put_slice(&payload);
        Ok(())
    }
}
