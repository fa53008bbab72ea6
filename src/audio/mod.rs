//! # Audio Module
//!
//! PCM value types and the chunk converter that reformats client audio for the
//! sink program.
//!
//! ## Key Components:
//! - **Audio Format**: rate / width / channels triple shared by chunks and config
//! - **Audio Chunk**: raw sample bytes plus their format and optional timestamp
//! - **Chunk Converter**: stateless conversion to the fixed target format

pub mod converter; // Width, channel and rate conversion
pub mod format; // AudioFormat and AudioChunk value types
