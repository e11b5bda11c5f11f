//! The control-message protocol exchanged with the realtime service.

use crate::{
    item::{ConversationItem, Role},
    session::SessionSettings,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error details attached to an `error` frame.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// A frame on the control channel, keyed by its `type` tag.
///
/// Inbound and outbound frames share one enum so a single codec handles both
/// directions. Frames whose `type` is not listed here decode to
/// [`ControlMessage::Unknown`], which keeps the raw object around for logging.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ControlMessage {
    // ---- Inbound ----
    #[serde(rename = "session.created")]
    SessionCreated,

    #[serde(rename = "response.created")]
    ResponseCreated,

    #[serde(rename = "response.done")]
    ResponseDone,

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    /// Final transcript of what the user said.
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted { transcript: String },

    /// Final transcript of what the assistant said.
    #[serde(rename = "response.audio_transcript.done")]
    ResponseTranscriptDone { transcript: String },

    /// Base64 PCM16 chunk of assistant audio (WebSocket transports only).
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta { delta: String },

    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        #[serde(default)]
        name: String,
        /// JSON-encoded arguments object, as produced by the model.
        arguments: String,
        call_id: String,
    },

    #[serde(rename = "error")]
    Error { error: ErrorDetail },

    // ---- Outbound ----
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionSettings },

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate,

    #[serde(rename = "response.cancel")]
    ResponseCancel,

    #[serde(rename = "output_audio_buffer.clear")]
    OutputAudioBufferClear,

    /// Base64 PCM16 chunk of microphone audio (WebSocket transports only).
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    /// A frame with a `type` this client does not know. `payload` is the
    /// whole original object, including its `type`.
    #[serde(skip)]
    Unknown { kind: String, payload: Value },
}

impl ControlMessage {
    /// Tags the codec maps onto typed variants.
    pub(crate) const KNOWN_KINDS: &'static [&'static str] = &[
        "session.created",
        "response.created",
        "response.done",
        "input_audio_buffer.speech_started",
        "input_audio_buffer.speech_stopped",
        "conversation.item.input_audio_transcription.completed",
        "response.audio_transcript.done",
        "response.audio.delta",
        "response.function_call_arguments.done",
        "error",
        "session.update",
        "conversation.item.create",
        "response.create",
        "response.cancel",
        "output_audio_buffer.clear",
        "input_audio_buffer.append",
    ];

    /// The wire `type` of this frame. Safe to log; never includes payloads.
    pub fn kind(&self) -> &str {
        match self {
            ControlMessage::SessionCreated => "session.created",
            ControlMessage::ResponseCreated => "response.created",
            ControlMessage::ResponseDone => "response.done",
            ControlMessage::SpeechStarted => "input_audio_buffer.speech_started",
            ControlMessage::SpeechStopped => "input_audio_buffer.speech_stopped",
            ControlMessage::InputTranscriptionCompleted { .. } => {
                "conversation.item.input_audio_transcription.completed"
            }
            ControlMessage::ResponseTranscriptDone { .. } => "response.audio_transcript.done",
            ControlMessage::ResponseAudioDelta { .. } => "response.audio.delta",
            ControlMessage::FunctionCallArgumentsDone { .. } => {
                "response.function_call_arguments.done"
            }
            ControlMessage::Error { .. } => "error",
            ControlMessage::SessionUpdate { .. } => "session.update",
            ControlMessage::ConversationItemCreate { .. } => "conversation.item.create",
            ControlMessage::ResponseCreate => "response.create",
            ControlMessage::ResponseCancel => "response.cancel",
            ControlMessage::OutputAudioBufferClear => "output_audio_buffer.clear",
            ControlMessage::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ControlMessage::Unknown { kind, .. } => kind,
        }
    }

    /// `conversation.item.create` carrying a function result for `call_id`.
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        ControlMessage::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput {
                call_id: call_id.into(),
                output: output.into(),
            },
        }
    }

    /// `conversation.item.create` carrying a single-part text message.
    pub fn text_item(role: Role, text: impl Into<String>) -> Self {
        ControlMessage::ConversationItemCreate {
            item: ConversationItem::text_message(role, text),
        }
    }
}
