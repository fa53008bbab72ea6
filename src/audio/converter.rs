//! # Chunk Format Conversion
//!
//! Converts incoming audio chunks to the fixed format the sink program expects.
//! The converter is stateless apart from its target format, so one chunk's
//! conversion never depends on the chunks before it.
//!
//! ## Conversion Order:
//! 1. **Sample width**: rescale every sample to the target width (bit shift)
//! 2. **Channels**: average channels down, or repeat them up
//! 3. **Sample rate**: linear interpolation between neighbouring frames
//!
//! Each step is skipped when that part of the format already matches, and a
//! chunk that already has the target format is passed through untouched.
//!
//! ## Sample Encoding:
//! Signed little-endian integers of 1 to 4 bytes, interleaved by channel.

use crate::audio::format::{AudioChunk, AudioFormat};
use crate::error::{SessionError, SessionResult};
use byteorder::{ByteOrder, LittleEndian};

/// Widest sample supported (32-bit).
pub const MAX_SAMPLE_WIDTH: u16 = 4;

/// Converts chunks of any supported format to one fixed target format.
#[derive(Debug, Clone)]
pub struct ChunkConverter {
    target: AudioFormat,
}

impl ChunkConverter {
    /// Create a converter for the given target format.
    ///
    /// The target is expected to have passed `validate_format` already
    /// (configuration validation does this at startup).
    pub fn new(target: AudioFormat) -> Self {
        Self { target }
    }

    pub fn target(&self) -> AudioFormat {
        self.target
    }

    /// Convert a chunk to the target format.
    ///
    /// ## Returns:
    /// - **Ok(chunk)**: the same chunk if it already matched, otherwise a new
    ///   chunk in the target format carrying the original timestamp
    /// - **Err(Conversion)**: unsupported width, zero rate or channels, or a byte
    ///   length that is not a whole number of frames
    pub fn convert(&self, chunk: AudioChunk) -> SessionResult<AudioChunk> {
        validate_chunk(&chunk)?;

        let source = chunk.format;
        let target = self.target;
        if source == target {
            return Ok(chunk);
        }

        let mut samples = decode_samples(&chunk.audio, source.width);

        if source.width != target.width {
            change_width(&mut samples, source.width, target.width);
        }

        if source.channels != target.channels {
            samples = remix_channels(&samples, source.channels, target.channels);
        }

        if source.rate != target.rate {
            samples = resample_linear(&samples, target.channels, source.rate, target.rate);
        }

        Ok(AudioChunk::new(
            target,
            encode_samples(&samples, target.width),
            chunk.timestamp,
        ))
    }
}

/// Check that a format describes PCM this converter can read or produce.
pub fn validate_format(format: &AudioFormat) -> Result<(), String> {
    if format.rate == 0 {
        return Err("Sample rate must be greater than 0".to_string());
    }
    if format.width == 0 || format.width > MAX_SAMPLE_WIDTH {
        return Err(format!(
            "Sample width must be between 1 and {} bytes, got {}",
            MAX_SAMPLE_WIDTH, format.width
        ));
    }
    if format.channels == 0 {
        return Err("Channel count must be greater than 0".to_string());
    }
    Ok(())
}

fn validate_chunk(chunk: &AudioChunk) -> SessionResult<()> {
    validate_format(&chunk.format).map_err(SessionError::Conversion)?;

    let frame_size = chunk.format.frame_size();
    if chunk.audio.len() % frame_size != 0 {
        return Err(SessionError::Conversion(format!(
            "{} bytes is not a whole number of {}-byte frames for {}",
            chunk.audio.len(),
            frame_size,
            chunk.format
        )));
    }
    Ok(())
}

/// Read interleaved samples into `i32`s, keeping their native range.
fn decode_samples(bytes: &[u8], width: u16) -> Vec<i32> {
    bytes
        .chunks_exact(width as usize)
        .map(|sample| match width {
            1 => sample[0] as i8 as i32,
            2 => LittleEndian::read_i16(sample) as i32,
            3 => LittleEndian::read_i24(sample),
            _ => LittleEndian::read_i32(sample),
        })
        .collect()
}

fn encode_samples(samples: &[i32], width: u16) -> Vec<u8> {
    let width = width as usize;
    let mut bytes = vec![0u8; samples.len() * width];

    for (sample, slot) in samples.iter().zip(bytes.chunks_exact_mut(width)) {
        match width {
            1 => slot[0] = *sample as i8 as u8,
            2 => LittleEndian::write_i16(slot, *sample as i16),
            3 => LittleEndian::write_i24(slot, *sample),
            _ => LittleEndian::write_i32(slot, *sample),
        }
    }

    bytes
}

/// Rescale samples between widths. Narrowing drops the low-order bits.
fn change_width(samples: &mut [i32], from: u16, to: u16) {
    let shift = 8 * u32::from(from.abs_diff(to));
    if to > from {
        for sample in samples.iter_mut() {
            *sample <<= shift;
        }
    } else {
        for sample in samples.iter_mut() {
            *sample >>= shift;
        }
    }
}

/// Change the channel count of interleaved samples.
///
/// ## Mapping:
/// - **Fewer channels**: output channel `c` is the average of every input
///   channel `i` with `i % to == c` (so anything to mono averages all channels)
/// - **More channels**: output channel `c` repeats input channel `c % from`
///   (so mono to stereo duplicates the signal)
fn remix_channels(samples: &[i32], from: u16, to: u16) -> Vec<i32> {
    let from = from as usize;
    let to = to as usize;
    let mut remixed = Vec::with_capacity(samples.len() / from * to);

    for frame in samples.chunks_exact(from) {
        if to > from {
            for channel in 0..to {
                remixed.push(frame[channel % from]);
            }
        } else {
            for channel in 0..to {
                let (sum, count) = frame
                    .iter()
                    .skip(channel)
                    .step_by(to)
                    .fold((0i64, 0i64), |(sum, count), sample| {
                        (sum + *sample as i64, count + 1)
                    });
                remixed.push((sum / count) as i32);
            }
        }
    }

    remixed
}

/// Resample interleaved frames by linear interpolation.
///
/// Output frame count is `ceil(frames * to_rate / from_rate)`. Each output frame
/// `k` sits at input position `k * from_rate / to_rate`; the last input frame is
/// held for positions past the end.
///
/// No filter history is carried between calls, so every chunk comes back in
/// full with no added latency.
fn resample_linear(samples: &[i32], channels: u16, from_rate: u32, to_rate: u32) -> Vec<i32> {
    let channels = channels as usize;
    let in_frames = samples.len() / channels;
    if in_frames == 0 {
        return Vec::new();
    }

    let from_rate = from_rate as u64;
    let to_rate = to_rate as u64;
    let out_frames = (in_frames as u64 * to_rate + from_rate - 1) / from_rate;

    let mut resampled = Vec::with_capacity(out_frames as usize * channels);
    for frame in 0..out_frames {
        let position = frame * from_rate;
        let index = (position / to_rate) as usize;
        let fraction = (position % to_rate) as f64 / to_rate as f64;
        let next = (index + 1).min(in_frames - 1);

        for channel in 0..channels {
            let current = samples[index * channels + channel] as f64;
            let following = samples[next * channels + channel] as f64;
            resampled.push((current + (following - current) * fraction).round() as i32);
        }
    }

    resampled
}
