//! Events emitted by the session controller for the UI.
//!
//! Events carry no heavy payloads; the UI pulls a transcript snapshot from
//! the controller when it sees [`WidgetEvent::TranscriptUpdated`].

use crate::session::ConnectionState;

/// Default capacity of the UI event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What the widget is doing "right now".
#[derive(Debug, Clone, PartialEq)]
pub enum WidgetEvent {
    /// The lifecycle state machine moved.
    StateChanged(ConnectionState),
    /// The agent started or stopped speaking.
    SpeakingChanged { speaking: bool },
    /// The typing indicator should be shown or hidden.
    PendingChanged { pending: bool },
    /// The transcript gained an entry or its last entry grew.
    TranscriptUpdated { len: usize },
    /// Local capture was muted or unmuted.
    MuteChanged { muted: bool },
    /// Cosmetic loudness of agent playback in `[0, 1]`.
    AudioLevel { level: f32 },
    /// Advisory text from the local recognizer. Never part of the transcript.
    RecognitionHint { text: String, is_final: bool },
    /// User-visible, non-fatal error notice.
    Alert(String),
}
