//! Kelion voice session core.
//!
//! This crate owns everything that happens between "the caller pressed the
//! microphone button" and "the remote model's audio reaches the speaker":
//!
//! - `session`: the lifecycle state machine (`Idle → Connecting → Active → Closed`)
//!   and the loops it runs while active.
//! - `monitor`: turns assistant audio into a debounced speaking signal.
//! - `interrupt`: the barge-in/override sequence and microphone gating.
//! - `dispatcher`: routes model function calls to capability providers.
//! - `brain`: classifies user utterances and seizes the turn when a computed
//!   answer is needed.
//!
//! Transport, credentials, media devices and capability providers are traits;
//! concrete implementations live in the runtime service.

pub mod brain;
pub mod channel;
pub mod config;
pub mod conversation;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod interrupt;
pub mod location;
pub mod monitor;
mod priming;
pub mod provider;
pub mod session;
pub mod transport;

pub use brain::{Category, Classifier, Decision, TranscriptOrchestrator, Utterance};
pub use config::{MonitorConfig, SessionConfig};
pub use error::{MediaError, ProviderError, SessionError, TransportError};
pub use events::{EventSink, SessionEvent, SpeakingState, UiAction};
pub use interrupt::{InterruptController, InterruptSource};
pub use provider::{CapabilityProvider, ProviderRegistry, ToolSpec};
pub use session::{SessionState, VoiceSession};
pub use transport::{
    Connection, Credential, CredentialSource, MediaDevices, MediaStreams, Transport, TransportLink,
};
