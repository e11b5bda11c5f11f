//! Kelion Voice Runtime
//!
//! Concrete implementations of the seams `kelion-core` leaves open: the
//! WebSocket transport to the realtime service, credential sources, HTTP
//! capability providers and pipe-based audio. The `kelion-voice` binary wires
//! them into a `VoiceSession`.

pub mod audio_utils;
pub mod config;
pub mod credential;
pub mod media;
pub mod providers;
pub mod transport;
