//! Wire types for the realtime control channel.
//!
//! The control channel is the reliable, ordered message lane of a realtime
//! voice session. Every frame is a JSON object discriminated by its `type`
//! field. This crate defines the closed set of frames the client understands
//! ([`ControlMessage`]) and the pure [`encode`]/[`decode`] pair that maps them
//! to and from text frames.

pub mod codec;
pub mod item;
pub mod message;
pub mod session;

pub use codec::{CodecError, decode, encode};
pub use item::{ContentPart, ConversationItem, Role};
pub use message::{ControlMessage, ErrorDetail};
pub use session::{SessionSettings, ToolDefinition, TranscriptionSettings, TurnDetection};
