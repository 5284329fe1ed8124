//! Realtime session connection to the remote agent.
//!
//! The controller talks to the transport only through these traits. A
//! connector opens a [`SessionConnection`] with a credential and reports
//! everything the remote side does through one [`SessionListener`], with one
//! method per event kind.

pub mod protocol;
pub mod websocket;

use std::sync::Arc;

use async_trait::async_trait;

use crate::credentials::SignedUrl;
use crate::error::Result;
use crate::transcript::MessageSource;

pub use websocket::{WebSocketConnection, WebSocketConnector};

/// Transport-level session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// What the agent is doing with its voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    /// Agent audio is playing.
    Speaking,
    /// The agent is idle and listening.
    Listening,
}

/// A text event from the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub source: MessageSource,
    pub text: String,
    /// `false` for a streamed fragment of a longer reply.
    pub complete: bool,
}

impl InboundMessage {
    pub fn agent_fragment(text: impl Into<String>) -> Self {
        Self {
            source: MessageSource::Agent,
            text: text.into(),
            complete: false,
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            source: MessageSource::Agent,
            text: text.into(),
            complete: true,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            source: MessageSource::User,
            text: text.into(),
            complete: true,
        }
    }
}

/// Decoded agent audio, mono `f32` samples.
#[derive(Debug, Clone)]
pub struct AgentAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Receives session events. Implementations must not block.
pub trait SessionListener: Send + Sync {
    fn on_status(&self, status: ConnectionStatus);
    fn on_mode(&self, mode: AgentMode);
    fn on_message(&self, message: InboundMessage);
    fn on_error(&self, message: String);
    fn on_audio(&self, audio: AgentAudio) {
        let _ = audio;
    }
}

/// An open session with the remote agent.
#[async_trait]
pub trait SessionConnection: Send + Sync {
    /// Conversation identifier assigned by the remote side, if it sent one.
    ///
    /// Once `Some`, the value never changes for this connection.
    fn conversation_id(&self) -> Option<String>;

    /// Whether [`send_text`](Self::send_text) is available.
    fn supports_text_input(&self) -> bool;

    /// Send typed user text to the agent.
    ///
    /// # Errors
    ///
    /// Returns [`WidgetError::Send`](crate::error::WidgetError::Send) if the
    /// text could not be handed to the transport.
    async fn send_text(&self, text: &str) -> Result<()>;

    /// Forward captured microphone samples. Text-only transports ignore them.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is closed.
    fn send_audio(&self, samples: &[f32]) -> Result<()> {
        let _ = samples;
        Ok(())
    }

    /// The connection's own microphone gate.
    fn set_muted(&self, muted: bool);

    /// Ask the remote side to end the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the close could not be delivered.
    async fn close(&self) -> Result<()>;
}

/// Opens sessions.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Open a session, reporting events to `listener`.
    ///
    /// # Errors
    ///
    /// Returns [`WidgetError::Connection`](crate::error::WidgetError::Connection)
    /// if the session cannot be established.
    async fn open(
        &self,
        credential: &SignedUrl,
        listener: Arc<dyn SessionListener>,
    ) -> Result<Arc<dyn SessionConnection>>;
}

/// Find the conversation id in a handshake payload.
///
/// Peers have reported it under several names; this is the one place that
/// knows about them. Returns the first non-empty candidate.
pub fn probe_conversation_id(value: &serde_json::Value) -> Option<String> {
    const POINTERS: [&str; 6] = [
        "/conversation_id",
        "/conversationId",
        "/conversation_initiation_metadata_event/conversation_id",
        "/conversation/id",
        "/conversation/conversation_id",
        "/id",
    ];
    POINTERS
        .iter()
        .filter_map(|p| value.pointer(p))
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_owned)
}
