//! Audio activity monitor.
//!
//! Samples the assistant's audio at a fixed cadence and turns it into a
//! debounced speaking signal for avatar animation. The rising edge fires on
//! the first loud frame; the falling edge only after `debounce` of continuous
//! silence, so natural pauses in synthesized speech do not make the mouth
//! flicker.

use crate::{
    config::MonitorConfig,
    events::{EventSink, SessionEvent, SpeakingState},
};
use std::sync::Arc;
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Samples kept in the analysis context between two ticks (one second at 24 kHz).
const MAX_PENDING_SAMPLES: usize = 24_000;

/// What a single observation changed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    Rising(SpeakingState),
    Intensity(f32),
    Falling,
}

/// The debounce state machine, free of timers and I/O.
#[derive(Debug)]
pub struct ActivityDetector {
    threshold: f32,
    debounce: std::time::Duration,
    speaking: bool,
    /// Single pending "stop speaking" deadline. Armed on the first quiet frame,
    /// cleared by any loud frame.
    silence_deadline: Option<Instant>,
}

impl ActivityDetector {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            threshold: config.threshold,
            debounce: config.debounce,
            speaking: false,
            silence_deadline: None,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn observe(&mut self, magnitude: f32, now: Instant) -> Option<Transition> {
        if magnitude > self.threshold {
            self.silence_deadline = None;
            let intensity = magnitude.clamp(0.0, 1.0);
            if self.speaking {
                return Some(Transition::Intensity(intensity));
            }
            self.speaking = true;
            return Some(Transition::Rising(SpeakingState::speaking(intensity)));
        }

        if !self.speaking {
            return None;
        }
        match self.silence_deadline {
            None => {
                self.silence_deadline = Some(now + self.debounce);
                None
            }
            Some(deadline) if now >= deadline => {
                self.speaking = false;
                self.silence_deadline = None;
                Some(Transition::Falling)
            }
            Some(_) => None,
        }
    }

    /// Drops to silent immediately, discarding any pending deadline.
    pub fn force_silent(&mut self) {
        self.speaking = false;
        self.silence_deadline = None;
    }
}

/// The one audio analysis context of a session: samples written by the
/// downlink pump, drained by the sampling loop.
#[derive(Debug, Default)]
pub struct AnalysisContext {
    pending: Mutex<Vec<f32>>,
}

impl AnalysisContext {
    pub async fn write(&self, samples: &[f32]) {
        let mut pending = self.pending.lock().await;
        pending.extend_from_slice(samples);
        if pending.len() > MAX_PENDING_SAMPLES {
            let excess = pending.len() - MAX_PENDING_SAMPLES;
            pending.drain(..excess);
        }
    }

    /// Mean absolute amplitude of everything written since the last call,
    /// normalised to `0.0..=1.0`. Silence when nothing was written.
    pub async fn take_magnitude(&self) -> f32 {
        let mut pending = self.pending.lock().await;
        if pending.is_empty() {
            return 0.0;
        }
        let sum: f32 = pending.iter().map(|s| s.abs()).sum();
        let magnitude = sum / pending.len() as f32;
        pending.clear();
        magnitude.clamp(0.0, 1.0)
    }

    pub async fn clear(&self) {
        self.pending.lock().await.clear();
    }
}

/// Publishes speaking edges and intensity updates derived from the analysis
/// context. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct AudioActivityMonitor {
    config: MonitorConfig,
    detector: Arc<Mutex<ActivityDetector>>,
    analysis: Arc<AnalysisContext>,
    latest: Arc<watch::Sender<SpeakingState>>,
    events: EventSink,
}

impl AudioActivityMonitor {
    pub fn new(config: MonitorConfig, events: EventSink) -> Self {
        Self {
            detector: Arc::new(Mutex::new(ActivityDetector::new(&config))),
            analysis: Arc::new(AnalysisContext::default()),
            latest: Arc::new(watch::Sender::new(SpeakingState::SILENT)),
            config,
            events,
        }
    }

    pub fn analysis(&self) -> Arc<AnalysisContext> {
        Arc::clone(&self.analysis)
    }

    /// Latest speaking state.
    pub fn current(&self) -> SpeakingState {
        *self.latest.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SpeakingState> {
        self.latest.subscribe()
    }

    /// Feeds one magnitude sample through the detector and publishes the result.
    pub async fn observe(&self, magnitude: f32, now: Instant) {
        let transition = self.detector.lock().await.observe(magnitude, now);
        match transition {
            Some(Transition::Rising(state)) => {
                debug!(intensity = state.intensity, "assistant speaking");
                self.latest.send_replace(state);
                self.events.emit(SessionEvent::Speaking(state));
            }
            Some(Transition::Intensity(intensity)) => {
                trace!(intensity, "speaking intensity");
                self.latest.send_replace(SpeakingState::speaking(intensity));
                self.events.emit(SessionEvent::Intensity(intensity));
            }
            Some(Transition::Falling) => {
                debug!("assistant silent");
                self.latest.send_replace(SpeakingState::SILENT);
                self.events.emit(SessionEvent::Speaking(SpeakingState::SILENT));
            }
            None => {}
        }
    }

    /// Emits `speaking=false` right away, whatever the detector thought.
    pub async fn force_silent(&self) {
        self.detector.lock().await.force_silent();
        self.latest.send_replace(SpeakingState::SILENT);
        self.events.emit(SessionEvent::Speaking(SpeakingState::SILENT));
    }

    /// Starts the sampling loop. It stops when `cancel` fires.
    pub fn spawn(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.config.cadence);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    tick = ticker.tick() => {
                        let magnitude = monitor.analysis.take_magnitude().await;
                        monitor.observe(magnitude, tick).await;
                    }
                }
            }
            debug!("audio monitor stopped");
        })
    }

    /// Releases the analysis context and leaves the signal silent. Call after
    /// the sampling loop has been joined.
    pub async fn release(&self) {
        self.analysis.clear().await;
        self.force_silent().await;
    }
}
