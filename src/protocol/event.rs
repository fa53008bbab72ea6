//! # Protocol Events
//!
//! The closed set of events this service understands, and their mapping to and
//! from wire frames. Any event type not listed here decodes to `Event::Other`
//! so the session can ignore it and keep going.
//!
//! ## Event Types:
//! - `audio-start`: a stream is about to begin
//! - `audio-chunk`: audio samples (format in data, samples in payload)
//! - `audio-stop`: the stream is complete; answered with `played`
//! - `played`: acknowledgement sent back to the client

use crate::audio::format::{AudioChunk, AudioFormat};
use crate::error::{SessionError, SessionResult};
use crate::protocol::codec::Frame;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const AUDIO_START_TYPE: &str = "audio-start";
pub const AUDIO_CHUNK_TYPE: &str = "audio-chunk";
pub const AUDIO_STOP_TYPE: &str = "audio-stop";
pub const PLAYED_TYPE: &str = "played";

/// Data carried by `audio-start`. All fields are optional here because the
/// session does not depend on them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioStart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

/// Data carried by `audio-stop`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioStop {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

/// Data section of an `audio-chunk`; the samples travel in the payload.
#[derive(Debug, Serialize, Deserialize)]
struct ChunkData {
    rate: u32,
    width: u16,
    channels: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
}

/// A decoded protocol event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    AudioStart(AudioStart),
    AudioChunk(AudioChunk),
    AudioStop(AudioStop),
    Played,
    /// Any event type this service does not act on
    Other {
        kind: String,
        data: Map<String, Value>,
    },
}

impl Event {
    /// Wire type tag for this event.
    pub fn kind(&self) -> &str {
        match self {
            Event::AudioStart(_) => AUDIO_START_TYPE,
            Event::AudioChunk(_) => AUDIO_CHUNK_TYPE,
            Event::AudioStop(_) => AUDIO_STOP_TYPE,
            Event::Played => PLAYED_TYPE,
            Event::Other { kind, .. } => kind,
        }
    }

    /// Decode a frame into an event.
    ///
    /// ## Errors:
    /// - **Protocol**: a known event type whose data is missing required fields
    ///   or has the wrong types (e.g. `audio-chunk` without `rate`)
    pub fn from_frame(frame: Frame) -> SessionResult<Self> {
        match frame.kind.as_str() {
            AUDIO_START_TYPE => Ok(Event::AudioStart(from_data(frame.data)?)),
            AUDIO_STOP_TYPE => Ok(Event::AudioStop(from_data(frame.data)?)),
            AUDIO_CHUNK_TYPE => {
                let data: ChunkData = from_data(frame.data).map_err(|e| {
                    SessionError::Protocol(format!("audio-chunk is missing its format: {}", e))
                })?;
                Ok(Event::AudioChunk(AudioChunk::new(
                    AudioFormat::new(data.rate, data.width, data.channels),
                    frame.payload.unwrap_or_default(),
                    data.timestamp,
                )))
            }
            PLAYED_TYPE => Ok(Event::Played),
            _ => Ok(Event::Other {
                kind: frame.kind,
                data: frame.data,
            }),
        }
    }

    /// Encode this event as a frame.
    pub fn into_frame(self) -> SessionResult<Frame> {
        let frame = match self {
            Event::AudioStart(start) => Frame {
                kind: AUDIO_START_TYPE.to_string(),
                data: to_data(&start)?,
                payload: None,
            },
            Event::AudioStop(stop) => Frame {
                kind: AUDIO_STOP_TYPE.to_string(),
                data: to_data(&stop)?,
                payload: None,
            },
            Event::AudioChunk(chunk) => {
                let data = ChunkData {
                    rate: chunk.format.rate,
                    width: chunk.format.width,
                    channels: chunk.format.channels,
                    timestamp: chunk.timestamp,
                };
                Frame {
                    kind: AUDIO_CHUNK_TYPE.to_string(),
                    data: to_data(&data)?,
                    payload: Some(chunk.audio),
                }
            }
            Event::Played => Frame::new(PLAYED_TYPE),
            Event::Other { kind, data } => Frame {
                kind,
                data,
                payload: None,
            },
        };
        Ok(frame)
    }
}

fn from_data<T: DeserializeOwned>(data: Map<String, Value>) -> SessionResult<T> {
    Ok(serde_json::from_value(Value::Object(data))?)
}

fn to_data<T: Serialize>(value: &T) -> SessionResult<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(SessionError::Protocol(format!(
            "event data must be a JSON object, got {}",
            other
        ))),
    }
}
