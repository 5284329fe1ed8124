use std::sync::Weak;

use tracing::{debug, error, info};

use super::{ConnectionState, SessionId, Shared, close_in_background};
use crate::connection::{AgentAudio, AgentMode, ConnectionStatus, InboundMessage, SessionListener};
use crate::transcript::{MessageSource, Transcript};

/// Routes connection events for one session into the controller.
///
/// Holds the controller weakly so a dropped controller ends delivery.
pub(super) struct SessionBinding {
    id: SessionId,
    shared: Weak<Shared>,
}

impl SessionBinding {
    pub(super) fn new(id: SessionId, shared: Weak<Shared>) -> Self {
        Self { id, shared }
    }
}

/// A speaking turn with no agent text yet means a reply is on its way.
fn reply_outstanding(transcript: &Transcript) -> bool {
    transcript
        .last()
        .is_none_or(|m| m.source != MessageSource::Agent)
}

impl SessionListener for SessionBinding {
    fn on_status(&self, status: ConnectionStatus) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut inner = shared.lock();
        if !inner.is_current(self.id) {
            debug!(session = %self.id, ?status, "ignoring status from stale session");
            return;
        }
        match status {
            ConnectionStatus::Connecting => {}
            ConnectionStatus::Connected => {
                if inner.state != ConnectionState::Connecting {
                    return;
                }
                let Some(session) = inner.current_session_mut(self.id) else {
                    return;
                };
                session.connected_reported = true;
                if session.connection.is_some() {
                    shared.enter_connected(&mut inner);
                }
            }
            ConnectionStatus::Disconnected => {
                info!(session = %self.id, "agent closed the conversation");
                if let Some(connection) = shared.teardown(&mut inner).and_then(|s| s.connection) {
                    close_in_background(connection);
                }
            }
        }
    }

    fn on_mode(&self, mode: AgentMode) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut inner = shared.lock();
        if !inner.is_current(self.id) {
            return;
        }
        match mode {
            AgentMode::Speaking => {
                shared.set_speaking(&mut inner, true);
                if reply_outstanding(&inner.transcript) {
                    shared.set_pending(&mut inner, true);
                }
            }
            AgentMode::Listening => shared.set_speaking(&mut inner, false),
        }
    }

    fn on_message(&self, message: InboundMessage) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut inner = shared.lock();
        if !inner.is_current(self.id) {
            debug!(session = %self.id, "discarding message from stale session");
            return;
        }
        match (message.source, message.complete) {
            (MessageSource::User, _) => {
                inner.transcript.append(MessageSource::User, &message.text);
                shared.transcript_changed(&inner);
            }
            (MessageSource::Agent, true) => shared.record_agent_reply(&mut inner, &message.text),
            (MessageSource::Agent, false) => {
                shared.set_pending(&mut inner, true);
                inner.transcript.append(MessageSource::Agent, &message.text);
                shared.transcript_changed(&inner);
            }
        }
    }

    fn on_error(&self, message: String) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut inner = shared.lock();
        if !inner.is_current(self.id) {
            debug!(session = %self.id, "ignoring error from stale session: {message}");
            return;
        }
        error!(session = %self.id, "conversation failed: {message}");
        let connection = shared.teardown(&mut inner).and_then(|s| s.connection);
        shared.alert(format!("{}{message}", shared.config.labels.agent_error_prefix));
        drop(inner);
        if let Some(connection) = connection {
            close_in_background(connection);
        }
    }

    fn on_audio(&self, audio: AgentAudio) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let inner = shared.lock();
        if !inner.is_current(self.id) {
            return;
        }
        inner.analyzer.feed(&audio.samples);
        drop(inner);
        if let Some(playback) = &shared.deps.playback {
            playback.play(&audio);
        }
    }
}
