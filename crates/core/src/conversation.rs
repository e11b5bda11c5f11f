//! Shared per-session state and the single point through which it changes.

use crate::{channel::ControlChannel, events::EventSink, location::LocationCache};
use kelion_realtime_types::ControlMessage;
use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::debug;

/// Mutable flags shared by every task of an active session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversationState {
    /// The remote model has a response in flight.
    pub is_responding: bool,
    /// `response.created` events not yet matched by `response.done`.
    pub pending_responses: u32,
    /// The local microphone is gated.
    pub is_muted: bool,
    /// Bumped by every interrupt; results computed under an older epoch are
    /// discarded.
    pub epoch: u64,
}

/// Outcome of [`Conversation::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// An interrupt happened after the work started; nothing was sent.
    Stale { current: u64 },
}

/// Playback and capture gates observed by the media pumps.
#[derive(Debug)]
pub struct MediaGates {
    pub microphone_muted: watch::Sender<bool>,
    pub playback_muted: watch::Sender<bool>,
}

impl MediaGates {
    pub fn new() -> Self {
        Self {
            microphone_muted: watch::Sender::new(false),
            playback_muted: watch::Sender::new(false),
        }
    }
}

impl Default for MediaGates {
    fn default() -> Self {
        Self::new()
    }
}

/// The session aggregate shared by the receive loop, tool tasks and
/// orchestrator tasks.
///
/// `state` is the only synchronisation point for `is_responding`, `is_muted`
/// and `epoch`. Holding its lock while sending keeps an interrupt from slipping
/// between an epoch check and the messages it guards.
#[derive(Debug)]
pub struct Conversation {
    state: Mutex<ConversationState>,
    channel: ControlChannel,
    events: EventSink,
    gates: MediaGates,
    location: LocationCache,
}

impl Conversation {
    pub fn new(channel: ControlChannel, events: EventSink, location: LocationCache) -> Self {
        Self {
            state: Mutex::new(ConversationState::default()),
            channel,
            events,
            gates: MediaGates::new(),
            location,
        }
    }

    pub async fn snapshot(&self) -> ConversationState {
        *self.state.lock().await
    }

    pub async fn epoch(&self) -> u64 {
        self.state.lock().await.epoch
    }

    pub fn channel(&self) -> &ControlChannel {
        &self.channel
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn gates(&self) -> &MediaGates {
        &self.gates
    }

    pub fn location(&self) -> &LocationCache {
        &self.location
    }

    pub(crate) async fn lock_state(&self) -> MutexGuard<'_, ConversationState> {
        self.state.lock().await
    }

    /// Sends `messages` in order, but only if no interrupt happened since
    /// `epoch` was read.
    pub async fn deliver(
        &self,
        epoch: u64,
        messages: impl IntoIterator<Item = ControlMessage>,
    ) -> Delivery {
        let state = self.state.lock().await;
        if state.epoch != epoch {
            debug!(epoch, current = state.epoch, "discarding stale result");
            return Delivery::Stale {
                current: state.epoch,
            };
        }
        for message in messages {
            self.channel.send(message).await;
        }
        Delivery::Delivered
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::events::SessionEvent;
    use kelion_realtime_types::decode;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    pub(crate) struct Harness {
        pub conversation: Arc<Conversation>,
        pub frames: mpsc::Receiver<String>,
        pub events: mpsc::UnboundedReceiver<SessionEvent>,
    }

    impl Harness {
        pub fn new() -> Self {
            let (tx, frames) = mpsc::channel(64);
            let (sink, events) = EventSink::channel();
            let conversation = Arc::new(Conversation::new(
                ControlChannel::new(tx, CancellationToken::new()),
                sink,
                LocationCache::default(),
            ));
            Self {
                conversation,
                frames,
                events,
            }
        }

        /// Everything sent on the control channel so far.
        pub fn sent(&mut self) -> Vec<ControlMessage> {
            let mut sent = Vec::new();
            while let Ok(frame) = self.frames.try_recv() {
                sent.push(decode(&frame).expect("sent frames decode"));
            }
            sent
        }

        pub fn emitted(&mut self) -> Vec<SessionEvent> {
            let mut emitted = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                emitted.push(event);
            }
            emitted
        }
    }
}
