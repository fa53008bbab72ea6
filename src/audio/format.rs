//! # Audio Formats and Chunks
//!
//! Plain value types describing raw PCM audio as it arrives from clients and as
//! the sink program expects it. Samples are signed little-endian integers,
//! interleaved by channel, with no header or framing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sample rate, sample width and channel count of a PCM stream.
///
/// ## Fields:
/// - `rate`: samples per second per channel (Hz)
/// - `width`: bytes per sample (1 = 8-bit, 2 = 16-bit, 3 = 24-bit, 4 = 32-bit)
/// - `channels`: interleaved channel count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub rate: u32,
    pub width: u16,
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(rate: u32, width: u16, channels: u16) -> Self {
        Self {
            rate,
            width,
            channels,
        }
    }

    /// Bytes in one frame (one sample for every channel).
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.channels as usize
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz/{}B/{}ch", self.rate, self.width, self.channels)
    }
}

/// One unit of audio received from a client: sample bytes plus their format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub format: AudioFormat,
    pub audio: Vec<u8>,
    /// Client-supplied timestamp in milliseconds, passed through untouched
    pub timestamp: Option<u64>,
}

impl AudioChunk {
    pub fn new(format: AudioFormat, audio: Vec<u8>, timestamp: Option<u64>) -> Self {
        Self {
            format,
            audio,
            timestamp,
        }
    }

    /// Number of whole frames in the chunk.
    pub fn frame_count(&self) -> usize {
        match self.format.frame_size() {
            0 => 0,
            size => self.audio.len() / size,
        }
    }
}
