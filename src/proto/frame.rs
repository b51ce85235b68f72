//! Frame serialization: bit-exact header encoding, CRC32 checksums, and
//! incremental stream extraction.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use super::{checksum, MessageType, HEADER_SIZE, MAGIC, MAX_FRAME_SIZE, PROTOCOL_VERSION};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame truncated: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },
    #[error("Invalid magic: 0x{0:08X}")]
    BadMagic(u32),
    #[error("Unsupported protocol version: {0}")]
    BadVersion(u16),
    #[error("Unknown message type: {0}")]
    UnknownType(u16),
    #[error("Trailing bytes after body: {0}")]
    TrailingBytes(usize),
    #[error("Malformed body at offset {0}")]
    MalformedBody(usize),
    #[error("Frame exceeds maximum size: {0} bytes")]
    TooLarge(usize),
    #[error("Missing key: {0}")]
    MissingKey(String),
    #[error("Malformed value for key {key}: {value:?}")]
    MalformedValue { key: String, value: String },
}

/// One protocol frame: header fields plus a key/value body.
///
/// Keys are unique within a frame; redefining a key replaces its value. The
/// body is kept sorted by key so that encoding is deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: MessageType,
    sequence_id: u32,
    session_id: u32,
    checksum: u32,
    body: BTreeMap<String, String>,
}

impl Frame {
    /// Build an empty frame of the given type with magic/version implied.
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            sequence_id: 0,
            session_id: 0,
            checksum: 0,
            body: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> MessageType {
        self.kind
    }

    pub fn sequence_id(&self) -> u32 {
        self.sequence_id
    }

    pub fn set_sequence_id(&mut self, sequence_id: u32) {
        self.sequence_id = sequence_id;
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn set_session_id(&mut self, session_id: u32) {
        self.session_id = session_id;
    }

    pub fn checksum_field(&self) -> u32 {
        self.checksum
    }

    // ========================================================================
    // Typed body access
    // ========================================================================

    pub fn has(&self, key: &str) -> bool {
        self.body.contains_key(key)
    }

    pub fn set_str(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.body.insert(key.to_string(), value.into());
        self
    }

    pub fn set_i64(&mut self, key: &str, value: i64) -> &mut Self {
        self.set_str(key, value.to_string())
    }

    pub fn set_f64(&mut self, key: &str, value: f64) -> &mut Self {
        self.set_str(key, value.to_string())
    }

    pub fn set_bool(&mut self, key: &str, value: bool) -> &mut Self {
        self.set_str(key, if value { "true" } else { "false" })
    }

    /// Binary values travel as comma-separated decimal octets.
    pub fn set_bytes(&mut self, key: &str, value: &[u8]) -> &mut Self {
        let encoded = value
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.set_str(key, encoded)
    }

    /// Missing keys yield the empty string.
    pub fn get_str(&self, key: &str) -> &str {
        self.body.get(key).map(String::as_str).unwrap_or("")
    }

    /// Missing or unparseable values yield 0.
    pub fn get_i64(&self, key: &str) -> i64 {
        self.body
            .get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Missing or unparseable values yield 0.0.
    pub fn get_f64(&self, key: &str) -> f64 {
        self.body
            .get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0)
    }

    /// Missing keys and anything but the literal `"true"` yield false.
    pub fn get_bool(&self, key: &str) -> bool {
        self.body.get(key).map(|v| v == "true").unwrap_or(false)
    }

    /// Missing keys yield an empty vector.
    pub fn get_bytes(&self, key: &str) -> Vec<u8> {
        let Some(value) = self.body.get(key) else {
            return Vec::new();
        };
        if value.is_empty() {
            return Vec::new();
        }
        value
            .split(',')
            .filter_map(|tok| tok.parse::<u8>().ok())
            .collect()
    }

    /// Strict integer parse: the key must be present and the value must be a
    /// plain decimal integer (no locale formats, no separators).
    pub fn try_get_i64(&self, key: &str) -> Result<i64, FrameError> {
        let value = self
            .body
            .get(key)
            .ok_or_else(|| FrameError::MissingKey(key.to_string()))?;
        value.parse().map_err(|_| FrameError::MalformedValue {
            key: key.to_string(),
            value: value.clone(),
        })
    }

    /// Strict float parse: `.` decimal point only, no thousands separators.
    pub fn try_get_f64(&self, key: &str) -> Result<f64, FrameError> {
        let value = self
            .body
            .get(key)
            .ok_or_else(|| FrameError::MissingKey(key.to_string()))?;
        if value.contains(',') {
            return Err(FrameError::MalformedValue {
                key: key.to_string(),
                value: value.clone(),
            });
        }
        value.parse().map_err(|_| FrameError::MalformedValue {
            key: key.to_string(),
            value: value.clone(),
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.body.keys().map(String::as_str)
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    fn encode_body(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        for (key, value) in &self.body {
            buf.put_u32(key.len() as u32);
            buf.put_slice(key.as_bytes());
            buf.put_u32(value.len() as u32);
            buf.put_slice(value.as_bytes());
        }
        buf
    }

    fn encode_with_checksum(&self, checksum_field: u32) -> Vec<u8> {
        let body = self.encode_body();
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + body.len());
        buf.put_u32(MAGIC);
        buf.put_u16(PROTOCOL_VERSION);
        buf.put_u16(self.kind.as_wire());
        buf.put_u32(body.len() as u32);
        buf.put_u32(self.sequence_id);
        buf.put_u32(self.session_id);
        buf.put_u32(checksum_field);
        buf.extend_from_slice(&body);
        buf.to_vec()
    }

    /// Encode header (network byte order) plus body. The body-length field is
    /// always refreshed from the current body contents.
    pub fn encode(&self) -> Vec<u8> {
        self.encode_with_checksum(self.checksum)
    }

    /// Encode with a u32 network-order total-length prefix.
    pub fn encode_stream(&self) -> Vec<u8> {
        let encoded = self.encode();
        let mut buf = BytesMut::with_capacity(4 + encoded.len());
        buf.put_u32(encoded.len() as u32);
        buf.extend_from_slice(&encoded);
        buf.to_vec()
    }

    /// Set the checksum field so that a CRC32 over the full encoding (with
    /// the checksum field zeroed) equals the stored value.
    pub fn compute_checksum(&mut self) -> &mut Self {
        self.checksum = checksum(&self.encode_with_checksum(0));
        self
    }

    /// Recompute the checksum and compare against the stored field.
    /// Idempotent and side-effect free.
    pub fn verify_checksum(&self) -> bool {
        self.checksum == checksum(&self.encode_with_checksum(0))
    }

    // ========================================================================
    // Decoding
    // ========================================================================

    /// Decode one full frame. The slice must contain exactly the header plus
    /// the advertised body; trailing bytes are an error.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < HEADER_SIZE {
            return Err(FrameError::Truncated {
                needed: HEADER_SIZE,
                have: data.len(),
            });
        }

        let mut header = &data[..HEADER_SIZE];
        let magic = header.get_u32();
        if magic != MAGIC {
            return Err(FrameError::BadMagic(magic));
        }
        let version = header.get_u16();
        if version != PROTOCOL_VERSION {
            return Err(FrameError::BadVersion(version));
        }
        let kind_raw = header.get_u16();
        let kind = MessageType::from_wire(kind_raw).ok_or(FrameError::UnknownType(kind_raw))?;
        let body_len = header.get_u32() as usize;
        let sequence_id = header.get_u32();
        let session_id = header.get_u32();
        let checksum_field = header.get_u32();

        if body_len > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(body_len));
        }
        if data.len() < HEADER_SIZE + body_len {
            return Err(FrameError::Truncated {
                needed: HEADER_SIZE + body_len,
                have: data.len(),
            });
        }
        if data.len() > HEADER_SIZE + body_len {
            return Err(FrameError::TrailingBytes(data.len() - HEADER_SIZE - body_len));
        }

        let body = Self::decode_body(&data[HEADER_SIZE..])?;

        Ok(Self {
            kind,
            sequence_id,
            session_id,
            checksum: checksum_field,
            body,
        })
    }

    fn decode_body(data: &[u8]) -> Result<BTreeMap<String, String>, FrameError> {
        let mut body = BTreeMap::new();
        let mut pos = 0usize;

        while pos < data.len() {
            let key = Self::decode_string(data, &mut pos)?;
            let value = Self::decode_string(data, &mut pos)?;
            body.insert(key, value);
        }
        Ok(body)
    }

    fn decode_string(data: &[u8], pos: &mut usize) -> Result<String, FrameError> {
        if *pos + 4 > data.len() {
            return Err(FrameError::MalformedBody(*pos));
        }
        let len = u32::from_be_bytes(data[*pos..*pos + 4].try_into().expect("4-byte slice")) as usize;
        *pos += 4;
        if *pos + len > data.len() {
            return Err(FrameError::MalformedBody(*pos));
        }
        let s = std::str::from_utf8(&data[*pos..*pos + len])
            .map_err(|_| FrameError::MalformedBody(*pos))?
            .to_string();
        *pos += len;
        Ok(s)
    }

    /// Decode a stream-framed message: u32 length prefix, then the frame.
    /// Fails when fewer bytes than advertised are present.
    pub fn decode_stream(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < 4 {
            return Err(FrameError::Truncated {
                needed: 4,
                have: data.len(),
            });
        }
        let len = u32::from_be_bytes(data[..4].try_into().expect("4-byte slice")) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(len));
        }
        if data.len() < 4 + len {
            return Err(FrameError::Truncated {
                needed: 4 + len,
                have: data.len(),
            });
        }
        Self::decode(&data[4..4 + len])
    }
}

/// Incremental extractor for stream-framed frames.
///
/// Bytes may arrive in arbitrary slices; [`FrameExtractor::next_frame`]
/// yields one complete encoded frame (without the length prefix) as soon as
/// its prefix and payload are fully buffered.
#[derive(Debug, Default)]
pub struct FrameExtractor {
    buffer: BytesMut,
}

impl FrameExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Pop the next complete frame's bytes, if any.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        if self.buffer.len() < 4 {
            return Ok(None);
        }
        let len =
            u32::from_be_bytes(self.buffer[..4].try_into().expect("4-byte slice")) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(len));
        }
        if self.buffer.len() < 4 + len {
            return Ok(None);
        }
        self.buffer.advance(4);
        let frame = self.buffer.split_to(len);
        Ok(Some(frame.to_vec()))
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
