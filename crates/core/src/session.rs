//! Session lifecycle: `Idle → Connecting → Active → Closed`.
//!
//! A [`VoiceSession`] owns the transport, the media streams and every task
//! that runs while the session is active. Everything else borrows what it
//! needs through the shared [`Conversation`].

use crate::{
    brain::{TranscriptOrchestrator, Utterance},
    channel::ControlChannel,
    config::SessionConfig,
    conversation::Conversation,
    dispatcher::ToolDispatcher,
    error::{SessionError, TransportError},
    events::{EventSink, SessionEvent, SpeakingState},
    interrupt::{InterruptController, InterruptSource},
    location::LocationCache,
    monitor::{AnalysisContext, AudioActivityMonitor},
    priming,
    provider::ProviderRegistry,
    transport::{Connection, CredentialSource, MediaDevices, MediaStreams, Transport, TransportLink},
};
use kelion_realtime_types::{
    ControlMessage, Role, SessionSettings, TranscriptionSettings, TurnDetection, decode,
};
use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, trace, warn};
use uuid::Uuid;

/// How long a cancelled session task may take to wind down.
const TASK_GRACE: Duration = Duration::from_secs(2);

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Closed,
}

enum Phase {
    Idle,
    Connecting {
        attempt: u64,
        cancel: CancellationToken,
    },
    Active(Box<ActiveSession>),
    Closed,
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Phase::Idle => SessionState::Idle,
            Phase::Connecting { .. } => SessionState::Connecting,
            Phase::Active(_) => SessionState::Active,
            Phase::Closed => SessionState::Closed,
        }
    }
}

/// Everything that only exists while the session is active.
struct ActiveSession {
    id: Uuid,
    conversation: Arc<Conversation>,
    monitor: AudioActivityMonitor,
    interrupts: Arc<InterruptController>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    link: Box<dyn TransportLink>,
}

impl ActiveSession {
    /// Stops every loop before the transport and media are released. A task
    /// that does not stop within [`TASK_GRACE`] is aborted.
    async fn shutdown(mut self) {
        self.cancel.cancel();
        for mut task in self.tasks.drain(..) {
            match timeout(TASK_GRACE, &mut task).await {
                Ok(Err(e)) if e.is_panic() => {
                    error!(session_id = %self.id, "session task panicked");
                }
                Ok(_) => {}
                Err(_) => {
                    warn!(session_id = %self.id, "session task ignored cancellation; aborting it");
                    task.abort();
                }
            }
        }
        self.interrupts.release().await;
        self.link.close().await;
        self.monitor.release().await;
        info!(session_id = %self.id, "session closed");
    }
}

struct Inner {
    config: SessionConfig,
    credentials: Arc<dyn CredentialSource>,
    transport: Arc<dyn Transport>,
    media: Arc<dyn MediaDevices>,
    registry: Arc<ProviderRegistry>,
    events: EventSink,
    /// Outlives individual connections so a restart keeps the known position.
    location: LocationCache,
    attempts: AtomicU64,
    phase: Mutex<Phase>,
}

/// Handle to a voice session. Clones share the same session.
#[derive(Clone)]
pub struct VoiceSession {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for VoiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSession")
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

impl VoiceSession {
    pub fn new(
        config: SessionConfig,
        credentials: Arc<dyn CredentialSource>,
        transport: Arc<dyn Transport>,
        media: Arc<dyn MediaDevices>,
        registry: ProviderRegistry,
        events: EventSink,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                credentials,
                transport,
                media,
                registry: Arc::new(registry),
                events,
                location: LocationCache::default(),
                attempts: AtomicU64::new(0),
                phase: Mutex::new(Phase::Idle),
            }),
        }
    }

    /// Connects and starts the session loops.
    ///
    /// A no-op while already connecting or active. Returns
    /// [`SessionError::Aborted`] if [`stop`](Self::stop) is called before the
    /// connection completes.
    pub async fn start(&self) -> Result<(), SessionError> {
        let (attempt, cancel) = {
            let mut phase = self.inner.phase.lock().await;
            if matches!(*phase, Phase::Connecting { .. } | Phase::Active(_)) {
                debug!(state = ?phase.state(), "start ignored; session already running");
                return Ok(());
            }
            let attempt = self.inner.attempts.fetch_add(1, Ordering::Relaxed) + 1;
            let cancel = CancellationToken::new();
            *phase = Phase::Connecting {
                attempt,
                cancel: cancel.clone(),
            };
            (attempt, cancel)
        };
        info!(attempt, "starting voice session");

        let established = tokio::select! {
            _ = cancel.cancelled() => Err(SessionError::Aborted),
            result = self.establish() => result,
        };

        let mut phase = self.inner.phase.lock().await;
        let current = matches!(*phase, Phase::Connecting { attempt: a, .. } if a == attempt);
        match established {
            Ok((connection, media)) if current => {
                *phase = Phase::Active(Box::new(self.activate(connection, media)));
                Ok(())
            }
            Ok((mut connection, _media)) => {
                drop(phase);
                info!(attempt, "connection completed after stop; closing it");
                connection.link.close().await;
                Err(SessionError::Aborted)
            }
            Err(e) => {
                if current {
                    *phase = Phase::Idle;
                }
                warn!(attempt, error = %e, "voice session failed to start");
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<(Connection, MediaStreams), SessionError> {
        let config = &self.inner.config;

        let credential = match timeout(config.token_timeout, self.inner.credentials.fetch()).await {
            Ok(Ok(credential)) => credential,
            Ok(Err(e)) => return Err(SessionError::Token(format!("{e:#}"))),
            Err(_) => {
                return Err(SessionError::Token(format!(
                    "no credential after {:?}",
                    config.token_timeout
                )));
            }
        };
        if credential.is_expired() {
            return Err(SessionError::Token("credential already expired".to_string()));
        }
        debug!(session_id = ?credential.session_id, expires_at = %credential.expires_at, "credential obtained");

        let media = self.inner.media.open().await?;

        let connection = match timeout(
            config.connect_timeout,
            self.inner.transport.connect(&credential),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::Timeout(config.connect_timeout).into()),
        };
        Ok((connection, media))
    }

    fn settings(&self) -> SessionSettings {
        let config = &self.inner.config;
        SessionSettings {
            instructions: config.instructions.clone(),
            voice: config.voice.clone(),
            tools: self.inner.registry.tool_definitions(),
            input_audio_transcription: config
                .transcription_model
                .clone()
                .map(|model| TranscriptionSettings { model }),
            turn_detection: Some(TurnDetection::default()),
        }
    }

    /// Wires up an established connection and spawns the session tasks.
    fn activate(&self, connection: Connection, media: MediaStreams) -> ActiveSession {
        let inner = &self.inner;
        let Connection {
            outbound,
            inbound,
            remote_audio,
            local_audio,
            link,
        } = connection;

        let id = Uuid::new_v4();
        let span = info_span!("voice_session", session_id = %id);
        let cancel = CancellationToken::new();

        let conversation = Arc::new(Conversation::new(
            ControlChannel::new(outbound, cancel.clone()),
            inner.events.clone(),
            inner.location.clone(),
        ));
        let monitor = AudioActivityMonitor::new(inner.config.monitor.clone(), inner.events.clone());
        let interrupts = Arc::new(InterruptController::new(
            Arc::clone(&conversation),
            monitor.clone(),
            inner.config.mute_window,
        ));
        let router = Router {
            conversation: Arc::clone(&conversation),
            interrupts: Arc::clone(&interrupts),
            dispatcher: Arc::new(ToolDispatcher::new(
                Arc::clone(&conversation),
                Arc::clone(&inner.registry),
                inner.config.call_ttl,
            )),
            brain: Arc::new(TranscriptOrchestrator::new(Arc::clone(&inner.registry))),
            work: Vec::new(),
        };

        let on_lost = lost_handler(Arc::downgrade(&self.inner), id);
        let mut tasks = vec![tokio::spawn(
            router
                .run(inbound, cancel.clone(), on_lost)
                .instrument(span.clone()),
        )];
        tasks.push(monitor.spawn(cancel.clone()));
        tasks.push(tokio::spawn(
            uplink(
                media.microphone,
                local_audio,
                conversation.gates().microphone_muted.subscribe(),
                cancel.clone(),
            )
            .instrument(span.clone()),
        ));
        tasks.push(tokio::spawn(
            downlink(
                remote_audio,
                media.speaker,
                monitor.analysis(),
                conversation.gates().playback_muted.subscribe(),
                cancel.clone(),
            )
            .instrument(span.clone()),
        ));
        tasks.push({
            let conversation = Arc::clone(&conversation);
            let registry = Arc::clone(&inner.registry);
            let settings = self.settings();
            let priming_timeout = inner.config.priming_timeout;
            let cancel = cancel.clone();
            tokio::spawn(
                async move {
                    tokio::select! {
                        _ = cancel.cancelled() => debug!("priming abandoned"),
                        _ = priming::prime(&conversation, &registry, settings, priming_timeout) => {}
                    }
                }
                .instrument(span.clone()),
            )
        });

        span.in_scope(|| info!("voice session active"));
        ActiveSession {
            id,
            conversation,
            monitor,
            interrupts,
            cancel,
            tasks,
            link,
        }
    }

    /// Tears the session down from any state. Safe to call repeatedly.
    pub async fn stop(&self) {
        self.shutdown(None).await;
    }

    /// Shuts down; with `only`, just the active session with that id.
    async fn shutdown(&self, only: Option<Uuid>) {
        let previous = {
            let mut phase = self.inner.phase.lock().await;
            if let Some(id) = only {
                match &*phase {
                    Phase::Active(active) if active.id == id => {}
                    _ => return,
                }
            }
            std::mem::replace(&mut *phase, Phase::Closed)
        };
        match previous {
            Phase::Idle | Phase::Closed => debug!("stop: nothing to tear down"),
            Phase::Connecting { attempt, cancel } => {
                info!(attempt, "stop: aborting connection attempt");
                cancel.cancel();
            }
            Phase::Active(active) => active.shutdown().await,
        }
    }

    /// Interrupts the assistant. `None` unless the session is active.
    pub async fn interrupt(&self, source: InterruptSource) -> Option<u64> {
        let interrupts = match &*self.inner.phase.lock().await {
            Phase::Active(active) => Arc::clone(&active.interrupts),
            _ => return None,
        };
        Some(interrupts.interrupt(source).await)
    }

    pub async fn is_active(&self) -> bool {
        matches!(*self.inner.phase.lock().await, Phase::Active(_))
    }

    pub async fn state(&self) -> SessionState {
        self.inner.phase.lock().await.state()
    }

    pub async fn speaking_state(&self) -> SpeakingState {
        match &*self.inner.phase.lock().await {
            Phase::Active(active) => active.monitor.current(),
            _ => SpeakingState::SILENT,
        }
    }

    /// Current response epoch, while active.
    pub async fn epoch(&self) -> Option<u64> {
        let conversation = match &*self.inner.phase.lock().await {
            Phase::Active(active) => Arc::clone(&active.conversation),
            _ => return None,
        };
        Some(conversation.epoch().await)
    }
}

/// Ends the session after the transport is lost, unless it was already
/// stopped or replaced by then.
fn lost_handler(inner: Weak<Inner>, id: Uuid) -> impl FnOnce() + Send + 'static {
    move || {
        tokio::spawn(
            async move {
                if let Some(inner) = inner.upgrade() {
                    VoiceSession { inner }.shutdown(Some(id)).await;
                }
            }
            .instrument(Span::current()),
        );
    }
}

/// Routes inbound control messages to the component that handles them.
struct Router {
    conversation: Arc<Conversation>,
    interrupts: Arc<InterruptController>,
    dispatcher: Arc<ToolDispatcher>,
    brain: Arc<TranscriptOrchestrator>,
    /// Tool calls and takeovers started by this session.
    work: Vec<JoinHandle<()>>,
}

impl Router {
    async fn run(
        mut self,
        mut inbound: mpsc::Receiver<String>,
        cancel: CancellationToken,
        on_lost: impl FnOnce(),
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                frame = inbound.recv() => match frame {
                    Some(frame) => self.route(&frame).await,
                    None => {
                        error!("realtime transport closed unexpectedly");
                        self.conversation.events().emit(SessionEvent::SessionLost {
                            reason: "transport closed".to_string(),
                        });
                        on_lost();
                        break;
                    }
                },
            }
        }
        for task in self.work.drain(..) {
            task.abort();
        }
        debug!("receive loop stopped");
    }

    async fn route(&mut self, frame: &str) {
        self.work.retain(|task| !task.is_finished());

        let message = match decode(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping undecodable control message");
                return;
            }
        };

        match message {
            ControlMessage::SessionCreated => info!("remote session created"),
            ControlMessage::ResponseCreated => self.interrupts.on_response_created().await,
            ControlMessage::ResponseDone => self.interrupts.on_response_done().await,
            ControlMessage::SpeechStarted => {
                self.interrupts.interrupt(InterruptSource::BargeIn).await;
            }
            ControlMessage::SpeechStopped => debug!("user stopped speaking"),
            ControlMessage::InputTranscriptionCompleted { transcript } => {
                self.on_user_transcript(transcript).await;
            }
            ControlMessage::ResponseTranscriptDone { transcript } => {
                self.conversation.events().emit(SessionEvent::Transcript {
                    role: Role::Assistant,
                    text: transcript,
                });
            }
            ControlMessage::ResponseAudioDelta { .. } => {
                trace!("audio delta on the control lane ignored");
            }
            ControlMessage::FunctionCallArgumentsDone {
                name,
                arguments,
                call_id,
            } => {
                let task = self.dispatcher.dispatch(call_id, name, arguments).await;
                self.work.push(task);
            }
            ControlMessage::Error { error } => {
                warn!(
                    message = %error.message,
                    kind = ?error.kind,
                    code = ?error.code,
                    "realtime service reported an error"
                );
            }
            ControlMessage::Unknown { kind, .. } => {
                debug!(%kind, "ignoring unknown control message");
            }
            other @ (ControlMessage::SessionUpdate { .. }
            | ControlMessage::ConversationItemCreate { .. }
            | ControlMessage::ResponseCreate
            | ControlMessage::ResponseCancel
            | ControlMessage::OutputAudioBufferClear
            | ControlMessage::InputAudioBufferAppend { .. }) => {
                warn!(kind = other.kind(), "client message received from the service");
            }
        }
    }

    async fn on_user_transcript(&mut self, transcript: String) {
        let text = transcript.trim().to_string();
        if text.is_empty() {
            return;
        }
        info!(%text, "user said");
        self.conversation.events().emit(SessionEvent::Transcript {
            role: Role::User,
            text: text.clone(),
        });

        let utterance = Utterance {
            text,
            epoch: self.conversation.epoch().await,
        };
        let brain = Arc::clone(&self.brain);
        let interrupts = Arc::clone(&self.interrupts);
        let conversation = Arc::clone(&self.conversation);
        self.work.push(tokio::spawn(
            async move {
                let outcome = brain.handle(utterance, &interrupts, &conversation).await;
                debug!(?outcome, "utterance handled");
            }
            .instrument(Span::current()),
        ));
    }
}

/// Microphone to transport, dropped while the microphone is gated.
async fn uplink(
    mut microphone: mpsc::Receiver<Vec<i16>>,
    local_audio: mpsc::Sender<Vec<i16>>,
    muted: watch::Receiver<bool>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = microphone.recv() => match frame {
                Some(frame) => {
                    if *muted.borrow() {
                        continue;
                    }
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        sent = local_audio.send(frame) => {
                            if sent.is_err() {
                                debug!("transport audio lane closed");
                                break;
                            }
                        }
                    }
                }
                None => {
                    debug!("microphone closed");
                    break;
                }
            },
        }
    }
}

/// Transport to speaker. Played frames feed the activity monitor; frames
/// arriving inside the mute window are dropped.
async fn downlink(
    mut remote_audio: mpsc::Receiver<Vec<f32>>,
    speaker: mpsc::Sender<Vec<f32>>,
    analysis: Arc<AnalysisContext>,
    muted: watch::Receiver<bool>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = remote_audio.recv() => match frame {
                Some(samples) => {
                    if *muted.borrow() {
                        trace!(samples = samples.len(), "assistant audio muted");
                        continue;
                    }
                    analysis.write(&samples).await;
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        sent = speaker.send(samples) => {
                            if sent.is_err() {
                                warn!("speaker closed");
                                break;
                            }
                        }
                    }
                }
                None => break,
            },
        }
    }
}
