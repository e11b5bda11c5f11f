//! Seams to the outside world: credentials, the realtime transport and local
//! media devices.

use crate::error::{MediaError, TransportError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use tokio::sync::mpsc;

/// Short-lived credential for one realtime connection.
#[derive(Debug)]
pub struct Credential {
    pub token: SecretString,
    pub expires_at: DateTime<Utc>,
    pub session_id: Option<String>,
}

impl Credential {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<Credential>;
}

/// Closes the underlying connection. Must be safe to call more than once.
#[async_trait]
pub trait TransportLink: Send {
    async fn close(&mut self);
}

/// An established connection: one reliable control lane plus one audio lane
/// in each direction.
pub struct Connection {
    /// Encoded control frames to the service.
    pub outbound: mpsc::Sender<String>,
    /// Encoded control frames from the service. Closes when the link drops.
    pub inbound: mpsc::Receiver<String>,
    /// Assistant audio, mono f32 in `-1.0..=1.0`.
    pub remote_audio: mpsc::Receiver<Vec<f32>>,
    /// Microphone audio, mono PCM16.
    pub local_audio: mpsc::Sender<Vec<i16>>,
    pub link: Box<dyn TransportLink>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, credential: &Credential) -> Result<Connection, TransportError>;
}

/// Opened local audio devices.
#[derive(Debug)]
pub struct MediaStreams {
    pub microphone: mpsc::Receiver<Vec<i16>>,
    pub speaker: mpsc::Sender<Vec<f32>>,
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Opens the microphone and speaker. Dropping the returned streams
    /// releases the devices.
    async fn open(&self) -> Result<MediaStreams, MediaError>;
}
