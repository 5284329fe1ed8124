//! Outbound text: realtime channel first, HTTP interaction as fallback.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{ConnectionState, SessionController, SessionId, close_in_background};
use crate::connection::SessionConnection;
use crate::fallback::InteractionFallback;
use crate::transcript::MessageSource;

/// Result of [`SessionController::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Empty text or not connected. Nothing was recorded.
    Ignored,
    /// Handed to the realtime channel.
    Sent,
    /// The realtime channel refused the text. The user message stays in the
    /// transcript and an alert was raised.
    SendFailed,
    /// The interaction endpoint replied and the reply was recorded.
    FallbackReplied,
    /// The interaction endpoint failed and an error reply was recorded.
    FallbackFailed,
    /// No way to deliver text. An error reply was recorded.
    Unavailable,
    /// The conversation ended before the reply arrived. The reply was dropped.
    Stale,
}

enum Route {
    Realtime(Arc<dyn SessionConnection>),
    Fallback {
        client: Arc<dyn InteractionFallback>,
        conversation_id: String,
    },
}

impl SessionController {
    /// Send typed text to the agent.
    ///
    /// Empty text and text typed while not connected are dropped silently.
    /// The user message is recorded before delivery is attempted.
    pub async fn send(&self, text: &str) -> SendOutcome {
        let text = text.trim();
        if text.is_empty() {
            return SendOutcome::Ignored;
        }

        let (id, route) = {
            let shared = &self.shared;
            let mut inner = shared.lock();
            if inner.state != ConnectionState::Connected {
                debug!(state = %inner.state, "dropping typed text, not connected");
                return SendOutcome::Ignored;
            }
            let Some(session) = inner.session.as_ref() else {
                return SendOutcome::Ignored;
            };
            let id = session.id;
            let connection = session.connection.clone();
            let conversation_id = session.conversation_id.clone();

            inner.transcript.append(MessageSource::User, text);
            shared.transcript_changed(&inner);

            let route = match (connection, conversation_id, shared.deps.fallback.clone()) {
                (Some(connection), _, _) if connection.supports_text_input() => {
                    Route::Realtime(connection)
                }
                (_, Some(conversation_id), Some(client)) => {
                    shared.set_pending(&mut inner, true);
                    Route::Fallback {
                        client,
                        conversation_id,
                    }
                }
                _ => {
                    warn!(session = %id, "no path for typed text");
                    shared.record_agent_reply(&mut inner, &shared.config.labels.fallback_unavailable);
                    return SendOutcome::Unavailable;
                }
            };
            (id, route)
        };

        match route {
            Route::Realtime(connection) => self.send_realtime(id, connection.as_ref(), text).await,
            Route::Fallback {
                client,
                conversation_id,
            } => {
                self.send_fallback(id, client.as_ref(), &conversation_id, text)
                    .await
            }
        }
    }

    async fn send_realtime(
        &self,
        id: SessionId,
        connection: &dyn SessionConnection,
        text: &str,
    ) -> SendOutcome {
        match connection.send_text(text).await {
            Ok(()) => SendOutcome::Sent,
            Err(e) => {
                warn!(session = %id, "sending typed text failed: {e}");
                let shared = &self.shared;
                let mut inner = shared.lock();
                if !inner.is_current(id) {
                    return SendOutcome::SendFailed;
                }
                let lost = if e.is_recoverable() {
                    None
                } else {
                    shared.teardown(&mut inner).and_then(|s| s.connection)
                };
                shared.alert(shared.config.labels.send_failed.clone());
                drop(inner);
                if let Some(connection) = lost {
                    close_in_background(connection);
                }
                SendOutcome::SendFailed
            }
        }
    }

    async fn send_fallback(
        &self,
        id: SessionId,
        client: &dyn InteractionFallback,
        conversation_id: &str,
        text: &str,
    ) -> SendOutcome {
        let result = client.interact(conversation_id, text).await;

        let shared = &self.shared;
        let mut inner = shared.lock();
        if !inner.is_current(id) {
            debug!(session = %id, "discarding interaction reply for ended conversation");
            return SendOutcome::Stale;
        }
        match result {
            Ok(reply) => {
                shared.record_agent_reply(&mut inner, &reply);
                SendOutcome::FallbackReplied
            }
            Err(e) => {
                warn!(session = %id, "interaction fallback failed: {e}");
                shared.record_agent_reply(&mut inner, &shared.config.labels.fallback_error);
                SendOutcome::FallbackFailed
            }
        }
    }
}
