//! Wire types of the realtime conversation socket.
//!
//! Client and server frames are JSON objects tagged by `type`, except for
//! microphone audio which is sent as a bare `{"user_audio_chunk": ...}`.

use serde::{Deserialize, Serialize};

/// Frames sent from the widget to the agent.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens the conversation. Sent once, right after the socket connects.
    ConversationInitiationClientData,
    /// Typed user text.
    UserMessage { text: String },
    /// Keep-alive answer to a server ping.
    Pong { event_id: u64 },
}

/// Microphone audio frame (base64 PCM16 little-endian).
#[derive(Debug, Clone, Serialize)]
pub struct UserAudioChunk<'a> {
    pub user_audio_chunk: &'a str,
}

/// Frames received from the agent.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake reply. Its fields are read from the raw JSON by the handshake.
    ConversationInitiationMetadata,
    Ping {
        ping_event: PingEvent,
    },
    AgentResponse {
        agent_response_event: AgentResponseEvent,
    },
    AgentResponseCorrection {
        agent_response_correction_event: AgentResponseCorrectionEvent,
    },
    AgentChatResponsePart {
        text_response_part: TextResponsePart,
    },
    UserTranscript {
        user_transcription_event: UserTranscriptionEvent,
    },
    Audio {
        audio_event: AudioEvent,
    },
    Interruption {
        #[serde(default)]
        interruption_event: Option<InterruptionEvent>,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        error_event: Option<serde_json::Value>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PingEvent {
    pub event_id: u64,
    #[serde(default)]
    pub ping_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentResponseEvent {
    #[serde(default)]
    pub agent_response: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentResponseCorrectionEvent {
    #[serde(default)]
    pub original_agent_response: String,
    #[serde(default)]
    pub corrected_agent_response: String,
}

/// Phase of a streamed text reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartKind {
    Start,
    Delta,
    Stop,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextResponsePart {
    #[serde(default)]
    pub text: String,
    #[serde(rename = "type")]
    pub kind: PartKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserTranscriptionEvent {
    #[serde(default)]
    pub user_transcript: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioEvent {
    pub audio_base_64: String,
    #[serde(default)]
    pub event_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterruptionEvent {
    #[serde(default)]
    pub event_id: u64,
}

impl ServerMessage {
    /// Human-readable description of an `error` frame.
    pub fn error_text(&self) -> Option<String> {
        match self {
            Self::Error {
                message,
                error_event,
            } => Some(
                message
                    .clone()
                    .or_else(|| {
                        error_event
                            .as_ref()
                            .and_then(|e| e.get("message"))
                            .and_then(|m| m.as_str())
                            .map(str::to_owned)
                    })
                    .unwrap_or_else(|| "unknown agent error".to_owned()),
            ),
            _ => None,
        }
    }
}

/// Sample rate from an output format tag such as `pcm_16000`.
pub fn pcm_sample_rate(format: &str) -> Option<u32> {
    format.strip_prefix("pcm_")?.parse().ok().filter(|r| *r > 0)
}
