//! Events published to the presentation layer.

use kelion_realtime_types::Role;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

/// Debounced speaking signal derived from the assistant's audio.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct SpeakingState {
    pub speaking: bool,
    /// Normalised loudness in `0.0..=1.0`; zero whenever `speaking` is false.
    pub intensity: f32,
}

impl SpeakingState {
    pub const SILENT: SpeakingState = SpeakingState {
        speaking: false,
        intensity: 0.0,
    };

    pub fn speaking(intensity: f32) -> Self {
        Self {
            speaking: true,
            intensity: intensity.clamp(0.0, 1.0),
        }
    }
}

impl Default for SpeakingState {
    fn default() -> Self {
        Self::SILENT
    }
}

/// A request for the presentation layer to show something.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UiAction {
    OpenWorkspace,
    ShowWeatherMap { lat: f64, lon: f64, info: String },
    ShowLocation { lat: f64, lon: f64, label: String },
    Navigate { destination: String },
    ShowImage { url: String, caption: String },
    ShowVideo { url: String, caption: String },
    /// Live camera or USB microscope feed.
    OpenCamera,
    OpenCodeEditor { code: String },
    OpenDocument { request: String },
}

/// Everything the core tells the outside world while a session runs.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Rising or falling edge of the speaking signal.
    Speaking(SpeakingState),
    /// Loudness update while already speaking; never an edge.
    Intensity(f32),
    Transcript { role: Role, text: String },
    UiAction(UiAction),
    /// The transport failed after the session became active.
    SessionLost { reason: String },
}

/// Sending half of the presentation event stream.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { tx }
    }

    /// Creates a sink together with the receiver the presentation layer reads.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Publishes an event. A presentation layer that stopped listening is not
    /// an error for the session.
    pub fn emit(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            trace!("event receiver dropped; discarding event");
        }
    }
}
