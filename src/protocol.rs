//! Framed binary protocol spoken with the streaming ASR service
//!
//! Every frame starts with a 4-byte header:
//!
//! | byte | high nibble      | low nibble       |
//! |------|------------------|------------------|
//! | 0    | protocol version | header size      |
//! | 1    | message type     | flags            |
//! | 2    | serialization    | compression      |
//! | 3    | reserved         | reserved         |
//!
//! Client frames follow the header with a 4-byte big-endian payload length and
//! the (gzip-compressed) payload. Server responses insert a 4-byte sequence
//! number (or an error code for error frames) before the payload length.
//!
//! Decoding never fails loudly: malformed input yields `None` and the caller
//! skips the frame.

use crate::config::Config;
use crate::error::VoiceResult;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{Read, Write};
use tracing::debug;

pub const PROTOCOL_VERSION: u8 = 0b0001;
/// Header length in 4-byte words
pub const HEADER_WORDS: u8 = 0b0001;
pub const HEADER_LEN: usize = 4;

/// Flag bits carried in the low nibble of byte 1
pub mod flags {
    pub const NONE: u8 = 0b0000;
    /// Server frame carries a sequence number
    pub const HAS_SEQUENCE: u8 = 0b0001;
    /// Final audio chunk of a recording
    pub const LAST_AUDIO: u8 = 0b0010;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Session-init request carrying identity, audio format and options
    FullClientRequest = 0b0001,
    /// Raw audio chunk
    AudioOnlyRequest = 0b0010,
    FullServerResponse = 0b1001,
    ServerError = 0b1111,
}

impl MessageType {
    pub fn from_nibble(value: u8) -> Option<Self> {
        match value {
            0b0001 => Some(Self::FullClientRequest),
            0b0010 => Some(Self::AudioOnlyRequest),
            0b1001 => Some(Self::FullServerResponse),
            0b1111 => Some(Self::ServerError),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Serialization {
    None = 0b0000,
    Json = 0b0001,
}

impl Serialization {
    fn from_nibble(value: u8) -> Option<Self> {
        match value {
            0b0000 => Some(Self::None),
            0b0001 => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None = 0b0000,
    Gzip = 0b0001,
}

impl Compression {
    fn from_nibble(value: u8) -> Option<Self> {
        match value {
            0b0000 => Some(Self::None),
            0b0001 => Some(Self::Gzip),
            _ => None,
        }
    }
}

fn header(message_type: u8, flags: u8, serialization: u8, compression: u8) -> [u8; HEADER_LEN] {
    [
        (PROTOCOL_VERSION << 4) | HEADER_WORDS,
        (message_type << 4) | (flags & 0x0F),
        (serialization << 4) | compression,
        0x00,
    ]
}

pub fn gzip(data: &[u8]) -> VoiceResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub fn gunzip(data: &[u8]) -> Option<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    match decoder.read_to_end(&mut out) {
        Ok(_) => Some(out),
        Err(e) => {
            debug!("gzip payload rejected: {}", e);
            None
        }
    }
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

// ── Client frames ─────────────────────────────────────────────

/// A client-to-server frame with its payload held uncompressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: MessageType,
    pub flags: u8,
    pub serialization: Serialization,
    pub compression: Compression,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Session-init frame (message type 1, JSON, gzip)
    pub fn session_init(request: &SessionInit) -> VoiceResult<Self> {
        Ok(Self {
            message_type: MessageType::FullClientRequest,
            flags: flags::NONE,
            serialization: Serialization::Json,
            compression: Compression::Gzip,
            payload: serde_json::to_vec(request)?,
        })
    }

    /// Audio frame (message type 2, raw bytes, gzip)
    pub fn audio(chunk: &[u8], last: bool) -> Self {
        Self {
            message_type: MessageType::AudioOnlyRequest,
            flags: if last { flags::LAST_AUDIO } else { flags::NONE },
            serialization: Serialization::None,
            compression: Compression::Gzip,
            payload: chunk.to_vec(),
        }
    }

    pub fn is_last_audio(&self) -> bool {
        self.message_type == MessageType::AudioOnlyRequest && self.flags & flags::LAST_AUDIO != 0
    }

    pub fn encode(&self) -> VoiceResult<Vec<u8>> {
        let body = match self.compression {
            Compression::Gzip => gzip(&self.payload)?,
            Compression::None => self.payload.clone(),
        };

        let mut out = Vec::with_capacity(HEADER_LEN + 4 + body.len());
        out.extend_from_slice(&header(
            self.message_type as u8,
            self.flags,
            self.serialization as u8,
            self.compression as u8,
        ));
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN + 4 {
            debug!("frame too short: {} bytes", data.len());
            return None;
        }

        let message_type = MessageType::from_nibble(data[1] >> 4)?;
        let serialization = Serialization::from_nibble(data[2] >> 4)?;
        let compression = Compression::from_nibble(data[2] & 0x0F)?;
        let size = read_u32(data, HEADER_LEN)? as usize;
        let body = data.get(HEADER_LEN + 4..HEADER_LEN + 4 + size)?;

        let payload = match compression {
            Compression::Gzip => gunzip(body)?,
            Compression::None => body.to_vec(),
        };

        if serialization == Serialization::Json
            && serde_json::from_slice::<Value>(&payload).is_err()
        {
            debug!("frame declares JSON but payload does not parse");
            return None;
        }

        Some(Self {
            message_type,
            flags: data[1] & 0x0F,
            serialization,
            compression,
            payload,
        })
    }

    /// Payload parsed as JSON, for JSON-serialized frames
    pub fn json(&self) -> Option<Value> {
        match self.serialization {
            Serialization::Json => serde_json::from_slice(&self.payload).ok(),
            Serialization::None => None,
        }
    }
}

// ── Session init body ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub uid: String,
    pub platform: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSpec {
    pub format: String,
    pub codec: String,
    pub rate: u32,
    pub bits: u16,
    pub channel: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionOptions {
    pub model_name: String,
    /// Inverse text normalization
    pub enable_itn: bool,
    pub enable_punc: bool,
    pub enable_ddc: bool,
    /// Utterance segmentation
    pub show_utterances: bool,
    pub result_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInit {
    pub user: UserInfo,
    pub audio: AudioSpec,
    pub request: RecognitionOptions,
}

impl SessionInit {
    pub fn from_config(config: &Config) -> Self {
        Self {
            user: UserInfo {
                uid: config.uid.clone(),
                platform: config.platform.clone(),
            },
            audio: AudioSpec {
                format: "pcm".to_string(),
                codec: "raw".to_string(),
                rate: config.sample_rate,
                bits: 16,
                channel: config.channels,
            },
            request: RecognitionOptions {
                model_name: config.model_name.clone(),
                enable_itn: true,
                enable_punc: true,
                enable_ddc: false,
                show_utterances: true,
                result_type: "full".to_string(),
            },
        }
    }
}

// ── Server frames ─────────────────────────────────────────────

/// A decoded server frame
#[derive(Debug, Clone, PartialEq)]
pub struct ServerResponse {
    pub sequence: u32,
    pub body: Value,
}

impl ServerResponse {
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN + 8 {
            debug!("server frame too short: {} bytes", data.len());
            return None;
        }

        let is_error = data[1] >> 4 == MessageType::ServerError as u8;
        let compression = Compression::from_nibble(data[2] & 0x0F)?;
        let word = read_u32(data, HEADER_LEN)?;
        let size = read_u32(data, HEADER_LEN + 4)? as usize;
        let body = data.get(HEADER_LEN + 8..HEADER_LEN + 8 + size)?;

        let payload = match compression {
            Compression::Gzip => gunzip(body)?,
            Compression::None => body.to_vec(),
        };

        if is_error {
            let message = match serde_json::from_slice::<Value>(&payload) {
                Ok(v) => v
                    .get("error")
                    .or_else(|| v.get("message"))
                    .map(|m| m.as_str().map(str::to_string).unwrap_or_else(|| m.to_string()))
                    .unwrap_or_else(|| v.to_string()),
                Err(_) => String::from_utf8(payload).ok()?,
            };
            return Some(Self {
                sequence: 0,
                body: serde_json::json!({ "error": message, "code": word }),
            });
        }

        let text = std::str::from_utf8(&payload).ok()?;
        let body: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!("server payload is not JSON: {}", e);
                return None;
            }
        };

        Some(Self {
            sequence: word,
            body,
        })
    }

    /// Some deployments answer with plain JSON text messages
    pub fn from_json_text(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok().map(|body| Self { sequence: 0, body })
    }

    /// Encode as a full server response; used by local ASR stubs
    pub fn encode(&self) -> VoiceResult<Vec<u8>> {
        let body = gzip(&serde_json::to_vec(&self.body)?)?;
        let mut out = Vec::with_capacity(HEADER_LEN + 8 + body.len());
        out.extend_from_slice(&header(
            MessageType::FullServerResponse as u8,
            flags::HAS_SEQUENCE,
            Serialization::Json as u8,
            Compression::Gzip as u8,
        ));
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Recognized text, if this response carries any
    pub fn text(&self) -> Option<&str> {
        self.body.get("result")?.get("text")?.as_str()
    }

    pub fn error(&self) -> Option<String> {
        self.body.get("error").map(|e| match e.as_str() {
            Some(s) => s.to_string(),
            None => e.to_string(),
        })
    }
}
