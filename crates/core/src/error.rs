//! Error types for the voice session core.

use std::time::Duration;
use thiserror::Error;

/// Failures that end (or prevent) a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No ephemeral credential could be obtained.
    #[error("failed to obtain session credential: {0}")]
    Token(String),

    /// Transport negotiation failed or did not finish in time.
    #[error("failed to connect to the realtime service: {0}")]
    Connect(#[from] TransportError),

    /// `stop()` was called while the session was still connecting.
    #[error("session start aborted by stop()")]
    Aborted,

    #[error("media devices unavailable: {0}")]
    Media(#[from] MediaError),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("negotiation timed out after {0:?}")]
    Timeout(Duration),

    #[error("negotiation rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("microphone unavailable: {0}")]
    Microphone(String),

    #[error("speaker unavailable: {0}")]
    Speaker(String),
}

/// Failures of a capability provider call. Never fatal to the session.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no provider registered for `{0}`")]
    NotRegistered(String),

    #[error("provider `{name}` timed out after {after:?}")]
    Timeout { name: String, after: Duration },

    #[error("provider `{name}` failed: {message}")]
    Failed { name: String, message: String },
}
