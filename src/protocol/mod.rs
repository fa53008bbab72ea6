//! # Wyoming Protocol
//!
//! Framing and event types for the Wyoming protocol spoken with clients.
//!
//! ## Message Flow:
//! - **Client → Server**: `audio-start`, `audio-chunk`*, `audio-stop`
//! - **Server → Client**: `played` once the stop has been handled

pub mod codec; // Header / data / payload framing
pub mod event; // Closed Event enum and frame conversion
