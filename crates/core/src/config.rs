//! Tunables for a voice session.

use std::time::Duration;

/// Audio activity monitor parameters.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How often the analysis context is sampled (default: 50ms, ~20 Hz).
    pub cadence: Duration,
    /// Normalised magnitude above which the assistant counts as speaking.
    pub threshold: f32,
    /// Continuous silence required before the falling edge is emitted.
    pub debounce: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cadence: Duration::from_millis(50),
            threshold: 0.05,
            debounce: Duration::from_millis(300),
        }
    }
}

/// Configuration for [`crate::VoiceSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound on fetching the ephemeral credential.
    pub token_timeout: Duration,
    /// Upper bound on transport negotiation.
    pub connect_timeout: Duration,
    /// Upper bound on the location/weather lookups done at session start.
    pub priming_timeout: Duration,
    pub monitor: MonitorConfig,
    /// How long playback stays muted after an interrupt.
    pub mute_window: Duration,
    /// Age after which an unfinished tool call is force-failed.
    pub call_ttl: Duration,
    pub instructions: Option<String>,
    pub voice: Option<String>,
    /// Model used by the service to transcribe user audio.
    pub transcription_model: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(15),
            priming_timeout: Duration::from_secs(5),
            monitor: MonitorConfig::default(),
            mute_window: Duration::from_millis(300),
            call_ttl: Duration::from_secs(120),
            instructions: None,
            voice: Some("alloy".to_string()),
            transcription_model: Some("whisper-1".to_string()),
        }
    }
}
