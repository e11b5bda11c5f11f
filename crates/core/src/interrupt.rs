//! Barge-in and override handling.

use crate::{conversation::Conversation, monitor::AudioActivityMonitor};
use kelion_realtime_types::ControlMessage;
use std::{sync::Arc, time::Duration};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info};

/// Why the assistant is being cut off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptSource {
    /// The user started talking over the assistant.
    BargeIn,
    /// The transcript orchestrator is taking the turn.
    Override,
    /// An explicit request from the presentation layer.
    Manual,
}

/// Stops assistant output within one control-channel round trip and
/// invalidates work started before the interrupt.
///
/// Also owns microphone gating: the mic is muted while the model is
/// responding so the assistant never hears itself.
#[derive(Debug)]
pub struct InterruptController {
    conversation: Arc<Conversation>,
    monitor: AudioActivityMonitor,
    mute_window: Duration,
    /// At most one playback-unmute timer; re-arming aborts the previous one.
    mute_release: Mutex<Option<JoinHandle<()>>>,
}

impl InterruptController {
    pub fn new(
        conversation: Arc<Conversation>,
        monitor: AudioActivityMonitor,
        mute_window: Duration,
    ) -> Self {
        Self {
            conversation,
            monitor,
            mute_window,
            mute_release: Mutex::new(None),
        }
    }

    /// Runs the interrupt sequence and returns the new epoch.
    ///
    /// `response.cancel` is only sent when a response is in flight (or the
    /// orchestrator is overriding), so two interrupts in a row never cancel
    /// twice. `output_audio_buffer.clear` is always sent.
    pub async fn interrupt(&self, source: InterruptSource) -> u64 {
        self.monitor.force_silent().await;

        let epoch = {
            let mut state = self.conversation.lock_state().await;
            let channel = self.conversation.channel();
            if state.is_responding || source == InterruptSource::Override {
                channel.send(ControlMessage::ResponseCancel).await;
                state.is_responding = false;
                state.pending_responses = 0;
                state.is_muted = false;
                self.conversation.gates().microphone_muted.send_replace(false);
            }
            channel.send(ControlMessage::OutputAudioBufferClear).await;
            state.epoch += 1;
            state.epoch
        };

        self.arm_mute_window().await;
        info!(?source, epoch, "assistant interrupted");
        epoch
    }

    /// Mutes playback now and unmutes it after the mute window. Any audio
    /// still arriving for the cancelled response is dropped meanwhile.
    async fn arm_mute_window(&self) {
        let gate = &self.conversation.gates().playback_muted;
        gate.send_replace(true);

        let mut slot = self.mute_release.lock().await;
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        let conversation = Arc::clone(&self.conversation);
        let window = self.mute_window;
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            conversation.gates().playback_muted.send_replace(false);
            debug!("playback unmuted");
        }));
    }

    pub async fn on_response_created(&self) {
        let mut state = self.conversation.lock_state().await;
        state.pending_responses += 1;
        state.is_responding = true;
        state.is_muted = true;
        self.conversation.gates().microphone_muted.send_replace(true);
        debug!("response started; microphone muted");
    }

    /// The microphone stays muted until every started response is done.
    pub async fn on_response_done(&self) {
        let mut state = self.conversation.lock_state().await;
        state.pending_responses = state.pending_responses.saturating_sub(1);
        if state.pending_responses > 0 {
            debug!(pending = state.pending_responses, "response finished; others still running");
            return;
        }
        state.is_responding = false;
        state.is_muted = false;
        self.conversation.gates().microphone_muted.send_replace(false);
        debug!("response finished; microphone unmuted");
    }

    /// Cancels the pending unmute timer and clears both gates.
    pub async fn release(&self) {
        if let Some(timer) = self.mute_release.lock().await.take() {
            timer.abort();
        }
        let gates = self.conversation.gates();
        gates.playback_muted.send_replace(false);
        gates.microphone_muted.send_replace(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::MonitorConfig,
        conversation::test_support::Harness,
        events::{SessionEvent, SpeakingState},
    };

    fn controller(harness: &Harness) -> InterruptController {
        let monitor = AudioActivityMonitor::new(
            MonitorConfig::default(),
            harness.conversation.events().clone(),
        );
        InterruptController::new(
            Arc::clone(&harness.conversation),
            monitor,
            Duration::from_millis(300),
        )
    }

    #[tokio::test]
    async fn interrupt_while_responding_cancels_clears_and_bumps_epoch() {
        let mut harness = Harness::new();
        let interrupts = controller(&harness);
        interrupts.on_response_created().await;
        assert!(*harness.conversation.gates().microphone_muted.borrow());

        let epoch = interrupts.interrupt(InterruptSource::BargeIn).await;

        assert_eq!(epoch, 1);
        assert_eq!(
            harness.sent(),
            vec![
                ControlMessage::ResponseCancel,
                ControlMessage::OutputAudioBufferClear
            ]
        );
        let state = harness.conversation.snapshot().await;
        assert!(!state.is_responding);
        assert!(!state.is_muted);
        assert!(!*harness.conversation.gates().microphone_muted.borrow());
        assert!(harness
            .emitted()
            .contains(&SessionEvent::Speaking(SpeakingState::SILENT)));
    }

    #[tokio::test]
    async fn back_to_back_interrupts_cancel_only_once() {
        let mut harness = Harness::new();
        let interrupts = controller(&harness);
        interrupts.on_response_created().await;

        let first = interrupts.interrupt(InterruptSource::BargeIn).await;
        let second = interrupts.interrupt(InterruptSource::BargeIn).await;

        assert!(second > first);
        let cancels = harness
            .sent()
            .into_iter()
            .filter(|m| *m == ControlMessage::ResponseCancel)
            .count();
        assert_eq!(cancels, 1);
    }

    #[tokio::test]
    async fn idle_barge_in_only_clears_audio() {
        let mut harness = Harness::new();
        let interrupts = controller(&harness);
        interrupts.interrupt(InterruptSource::Manual).await;
        assert_eq!(harness.sent(), vec![ControlMessage::OutputAudioBufferClear]);
    }

    #[tokio::test]
    async fn override_always_cancels() {
        let mut harness = Harness::new();
        let interrupts = controller(&harness);
        interrupts.interrupt(InterruptSource::Override).await;
        assert_eq!(
            harness.sent(),
            vec![
                ControlMessage::ResponseCancel,
                ControlMessage::OutputAudioBufferClear
            ]
        );
    }

    #[tokio::test]
    async fn response_done_unmutes_microphone() {
        let harness = Harness::new();
        let interrupts = controller(&harness);
        interrupts.on_response_created().await;
        interrupts.on_response_done().await;
        let state = harness.conversation.snapshot().await;
        assert!(!state.is_responding && !state.is_muted);
        assert!(!*harness.conversation.gates().microphone_muted.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn playback_mute_window_is_rearmed_by_each_interrupt() {
        let harness = Harness::new();
        let interrupts = controller(&harness);
        let playback = harness.conversation.gates().playback_muted.subscribe();

        interrupts.interrupt(InterruptSource::BargeIn).await;
        assert!(*playback.borrow());

        tokio::time::sleep(Duration::from_millis(200)).await;
        interrupts.interrupt(InterruptSource::BargeIn).await;

        // The first timer would have fired at 300ms; it was replaced.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(*playback.borrow());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!*playback.borrow());
    }

    #[tokio::test]
    async fn release_clears_gates() {
        let harness = Harness::new();
        let interrupts = controller(&harness);
        interrupts.on_response_created().await;
        interrupts.interrupt(InterruptSource::BargeIn).await;
        interrupts.release().await;
        let gates = harness.conversation.gates();
        assert!(!*gates.playback_muted.borrow());
        assert!(!*gates.microphone_muted.borrow());
    }

    #[tokio::test]
    async fn microphone_stays_muted_until_every_response_is_done() {
        let harness = Harness::new();
        let interrupts = controller(&harness);
        interrupts.on_response_created().await;
        interrupts.on_response_created().await;

        interrupts.on_response_done().await;
        let state = harness.conversation.snapshot().await;
        assert!(state.is_responding && state.is_muted);
        assert!(*harness.conversation.gates().microphone_muted.borrow());

        interrupts.on_response_done().await;
        let state = harness.conversation.snapshot().await;
        assert_eq!(state.pending_responses, 0);
        assert!(!state.is_responding && !state.is_muted);
        assert!(!*harness.conversation.gates().microphone_muted.borrow());

        // A stray done never underflows.
        interrupts.on_response_done().await;
        assert_eq!(harness.conversation.snapshot().await.pending_responses, 0);
    }

    #[tokio::test]
    async fn cancel_forgets_every_pending_response() {
        let harness = Harness::new();
        let interrupts = controller(&harness);
        interrupts.on_response_created().await;
        interrupts.on_response_created().await;

        interrupts.interrupt(InterruptSource::BargeIn).await;

        let state = harness.conversation.snapshot().await;
        assert_eq!(state.pending_responses, 0);
        assert!(!state.is_muted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_interrupts_get_distinct_consecutive_epochs() {
        const CALLERS: u64 = 16;
        let mut harness = Harness::new();
        let interrupts = Arc::new(controller(&harness));
        interrupts.on_response_created().await;

        let barrier = Arc::new(tokio::sync::Barrier::new(CALLERS as usize));
        let tasks: Vec<_> = (0..CALLERS)
            .map(|_| {
                let interrupts = Arc::clone(&interrupts);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    interrupts.interrupt(InterruptSource::BargeIn).await
                })
            })
            .collect();
        let mut epochs = Vec::new();
        for task in tasks {
            epochs.push(task.await.unwrap());
        }
        epochs.sort_unstable();

        assert_eq!(epochs, (1..=CALLERS).collect::<Vec<_>>());
        let sent = harness.sent();
        let cancels = sent
            .iter()
            .filter(|m| **m == ControlMessage::ResponseCancel)
            .count();
        let clears = sent
            .iter()
            .filter(|m| **m == ControlMessage::OutputAudioBufferClear)
            .count();
        assert_eq!(cancels, 1);
        assert_eq!(clears, CALLERS as usize);
        assert_eq!(harness.conversation.epoch().await, CALLERS);
    }
}
