//! Découpage des messages RTMP en chunks, et réassemblage.
//!
//! En émission chaque message part avec un en-tête fmt 0 suivi de
//! continuations fmt 3. En réception les quatre formats d'en-tête sont gérés,
//! ainsi que le timestamp étendu et `Set Chunk Size`.

use std::collections::HashMap;
use std::io::{self, Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use super::{DEFAULT_CHUNK_SIZE, RtmpError, message_type};

const EXTENDED_TIMESTAMP: u32 = 0x00FF_FFFF;
const MAX_CHUNK_SIZE: u32 = 0x7FFF_FFFF;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RtmpMessage {
    pub type_id: u8,
    pub stream_id: u32,
    pub timestamp: u32,
    pub payload: Bytes,
}

impl RtmpMessage {
    pub fn new(type_id: u8, stream_id: u32, timestamp: u32, payload: Bytes) -> Self {
        Self {
            type_id,
            stream_id,
            timestamp,
            payload,
        }
    }

    pub fn set_chunk_size(size: u32) -> Self {
        Self::new(
            message_type::SET_CHUNK_SIZE,
            0,
            0,
            Bytes::copy_from_slice(&(size & MAX_CHUNK_SIZE).to_be_bytes()),
        )
    }

    pub fn window_ack_size(size: u32) -> Self {
        Self::new(
            message_type::WINDOW_ACK_SIZE,
            0,
            0,
            Bytes::copy_from_slice(&size.to_be_bytes()),
        )
    }
}

fn put_basic_header(buf: &mut BytesMut, fmt: u8, csid: u32) {
    match csid {
        2..=63 => buf.put_u8((fmt << 6) | csid as u8),
        64..=319 => {
            buf.put_u8(fmt << 6);
            buf.put_u8((csid - 64) as u8);
        }
        _ => {
            let value = csid.saturating_sub(64);
            buf.put_u8((fmt << 6) | 1);
            buf.put_u8((value & 0xFF) as u8);
            buf.put_u8(((value >> 8) & 0xFF) as u8);
        }
    }
}

#[derive(Debug)]
pub struct ChunkWriter {
    chunk_size: u32,
}

impl Default for ChunkWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkWriter {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// À appeler après l'envoi du `Set Chunk Size` correspondant.
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    pub fn encode(&self, csid: u32, message: &RtmpMessage) -> BytesMut {
        let payload = &message.payload;
        let chunk_size = self.chunk_size as usize;
        let chunks = payload.len().div_ceil(chunk_size).max(1);
        let mut buf = BytesMut::with_capacity(payload.len() + 16 + chunks * 8);

        let extended = message.timestamp >= EXTENDED_TIMESTAMP;
        put_basic_header(&mut buf, 0, csid);
        buf.put_uint(message.timestamp.min(EXTENDED_TIMESTAMP) as u64, 3);
        buf.put_uint(payload.len() as u64, 3);
        buf.put_u8(message.type_id);
        buf.put_u32_le(message.stream_id);
        if extended {
            buf.put_u32(message.timestamp);
        }

        for (i, chunk) in payload.chunks(chunk_size).enumerate() {
            if i > 0 {
                put_basic_header(&mut buf, 3, csid);
                if extended {
                    buf.put_u32(message.timestamp);
                }
            }
            buf.put_slice(chunk);
        }
        buf
    }

    pub fn write<W: Write>(&self, out: &mut W, csid: u32, message: &RtmpMessage) -> io::Result<()> {
        out.write_all(&self.encode(csid, message))
    }
}

#[derive(Debug, Default)]
struct ChunkStreamState {
    timestamp: u32,
    delta: u32,
    length: u32,
    type_id: u8,
    stream_id: u32,
    extended: bool,
    payload: BytesMut,
}

#[derive(Debug)]
pub struct ChunkReader {
    chunk_size: u32,
    streams: HashMap<u32, ChunkStreamState>,
}

impl Default for ChunkReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkReader {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Lit les chunks jusqu'à obtenir un message complet. Un `Set Chunk Size`
    /// reçu est appliqué avant d'être rendu à l'appelant.
    pub fn read_message<R: Read>(&mut self, input: &mut R) -> Result<RtmpMessage, RtmpError> {
        loop {
            if let Some(message) = self.read_chunk(input)? {
                if message.type_id == message_type::SET_CHUNK_SIZE {
                    let mut payload = message.payload.clone();
                    if payload.remaining() < 4 {
                        return Err(RtmpError::Protocol("short Set Chunk Size".into()));
                    }
                    self.chunk_size = (payload.get_u32() & MAX_CHUNK_SIZE).max(1);
                    trace!(size = self.chunk_size, "Peer chunk size");
                }
                return Ok(message);
            }
        }
    }

    fn read_chunk<R: Read>(&mut self, input: &mut R) -> Result<Option<RtmpMessage>, RtmpError> {
        let first = read_u8(input)?;
        let fmt = first >> 6;
        let csid = match first & 0x3F {
            0 => 64 + read_u8(input)? as u32,
            1 => {
                let low = read_u8(input)? as u32;
                let high = read_u8(input)? as u32;
                64 + low + (high << 8)
            }
            id => id as u32,
        };

        let state = self.streams.entry(csid).or_default();
        let starting = state.payload.is_empty();

        match fmt {
            0 => {
                let mut timestamp = read_u24(input)?;
                state.length = read_u24(input)?;
                state.type_id = read_u8(input)?;
                state.stream_id = read_u32_le(input)?;
                state.extended = timestamp == EXTENDED_TIMESTAMP;
                if state.extended {
                    timestamp = read_u32(input)?;
                }
                state.timestamp = timestamp;
                state.delta = 0;
            }
            1 | 2 => {
                let mut delta = read_u24(input)?;
                if fmt == 1 {
                    state.length = read_u24(input)?;
                    state.type_id = read_u8(input)?;
                }
                state.extended = delta == EXTENDED_TIMESTAMP;
                if state.extended {
                    delta = read_u32(input)?;
                }
                state.delta = delta;
                if starting {
                    state.timestamp = state.timestamp.wrapping_add(delta);
                }
            }
            _ => {
                if state.extended {
                    let _ = read_u32(input)?;
                }
                if starting {
                    state.timestamp = state.timestamp.wrapping_add(state.delta);
                }
            }
        }

        let remaining = state.length as usize - state.payload.len();
        let to_read = remaining.min(self.chunk_size as usize);
        if to_read > 0 {
            let start = state.payload.len();
            state.payload.resize(start + to_read, 0);
            input.read_exact(&mut state.payload[start..])?;
        }

        if state.payload.len() < state.length as usize {
            return Ok(None);
        }

        Ok(Some(RtmpMessage {
            type_id: state.type_id,
            stream_id: state.stream_id,
            timestamp: state.timestamp,
            payload: state.payload.split().freeze(),
        }))
    }
}

fn read_u8<R: Read>(input: &mut R) -> io::Result<u8> {
    let mut b = [0u8; 1];
    input.read_exact(&mut b)?;
    Ok(b[0])
}

fn read_u24<R: Read>(input: &mut R) -> io::Result<u32> {
    let mut b = [0u8; 3];
    input.read_exact(&mut b)?;
    Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
}

fn read_u32<R: Read>(input: &mut R) -> io::Result<u32> {
    let mut b = [0u8; 4];
    input.read_exact(&mut b)?;
    Ok(u32::from_be_bytes(b))
}

fn read_u32_le<R: Read>(input: &mut R) -> io::Result<u32> {
    let mut b = [0u8; 4];
    input.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn large_message_is_split_and_reassembled() {
        let payload: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
        let message = RtmpMessage::new(message_type::VIDEO, 1, 1234, Bytes::from(payload));

        let encoded = ChunkWriter::new().encode(6, &message);
        // 12 octets d'en-tête + 128 + (1 + 128) + (1 + 44)
        assert_eq!(encoded.len(), 12 + 300 + 2);
        assert_eq!(encoded[0], 0x06);
        assert_eq!(encoded[12 + 128], 0xC6);

        let mut reader = ChunkReader::new();
        let decoded = reader.read_message(&mut Cursor::new(encoded.freeze())).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn extended_timestamp_round_trip() {
        let message = RtmpMessage::new(message_type::AUDIO, 1, 0x0100_0000, Bytes::from(vec![7u8; 200]));
        let encoded = ChunkWriter::new().encode(4, &message);
        assert_eq!(&encoded[1..4], &[0xFF, 0xFF, 0xFF]);

        let decoded = ChunkReader::new()
            .read_message(&mut Cursor::new(encoded.freeze()))
            .unwrap();
        assert_eq!(decoded.timestamp, 0x0100_0000);
        assert_eq!(decoded.payload.len(), 200);
    }

    #[test]
    fn peer_chunk_size_applies_to_following_messages() {
        let mut writer = ChunkWriter::new();
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&writer.encode(2, &RtmpMessage::set_chunk_size(4096)));
        writer.set_chunk_size(4096);
        let big = RtmpMessage::new(message_type::COMMAND_AMF0, 0, 0, Bytes::from(vec![1u8; 1000]));
        wire.extend_from_slice(&writer.encode(3, &big));

        let mut reader = ChunkReader::new();
        let mut cursor = Cursor::new(wire.freeze());
        let first = reader.read_message(&mut cursor).unwrap();
        assert_eq!(first.type_id, message_type::SET_CHUNK_SIZE);
        assert_eq!(reader.chunk_size(), 4096);
        assert_eq!(reader.read_message(&mut cursor).unwrap(), big);
    }

    #[test]
    fn compressed_headers_reuse_previous_fields() {
        // fmt 0 puis fmt 2 (delta 40) puis fmt 3 (même delta)
        let mut wire = BytesMut::new();
        wire.put_u8(0x04);
        wire.put_uint(100, 3);
        wire.put_uint(2, 3);
        wire.put_u8(message_type::AUDIO);
        wire.put_u32_le(1);
        wire.put_slice(&[0xAA, 0xBB]);

        wire.put_u8(0x84);
        wire.put_uint(40, 3);
        wire.put_slice(&[0xCC, 0xDD]);

        wire.put_u8(0xC4);
        wire.put_slice(&[0xEE, 0xFF]);

        let mut reader = ChunkReader::new();
        let mut cursor = Cursor::new(wire.freeze());
        let timestamps: Vec<u32> = (0..3)
            .map(|_| reader.read_message(&mut cursor).unwrap().timestamp)
            .collect();
        assert_eq!(timestamps, vec![100, 140, 180]);
    }

    #[test]
    fn two_byte_chunk_stream_id() {
        let message = RtmpMessage::new(message_type::DATA_AMF0, 1, 5, Bytes::from_static(b"abc"));
        let encoded = ChunkWriter::new().encode(100, &message);
        assert_eq!(&encoded[..2], &[0x00, 36]);
        let decoded = ChunkReader::new()
            .read_message(&mut Cursor::new(encoded.freeze()))
            .unwrap();
        assert_eq!(decoded, message);
    }
}
