//! Ordered conversation transcript assembled from streamed fragments.
//!
//! Agent replies can arrive in pieces. While the pending flag is set, agent
//! fragments extend the reply currently being streamed instead of starting a
//! new entry. A complete agent message closes the reply and clears the flag.

pub mod export;

use serde::{Deserialize, Serialize};

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSource {
    /// The local visitor (typed text or voice transcript).
    User,
    /// The remote conversational agent.
    Agent,
}

impl std::fmt::Display for MessageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Agent => write!(f, "agent"),
        }
    }
}

/// A single transcript entry. Identity is its position in the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub source: MessageSource,
    pub text: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            source: MessageSource::User,
            text: text.into(),
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            source: MessageSource::Agent,
            text: text.into(),
        }
    }
}

/// What an append did to the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    /// A new entry was pushed.
    New,
    /// The fragment was concatenated onto the last agent entry.
    Extended,
}

/// Append-only, insertion-ordered message list.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    messages: Vec<Message>,
    /// An agent reply is expected or being streamed (typing indicator).
    pending: bool,
    /// The last entry is an agent reply opened while `pending` was set.
    streaming: bool,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment from `source`.
    ///
    /// User text always creates a new entry. Agent text extends the last
    /// entry when a reply is pending and that entry is the agent reply being
    /// streamed; otherwise it creates a new agent entry.
    pub fn append(&mut self, source: MessageSource, fragment: &str) -> Appended {
        match source {
            MessageSource::User => {
                self.messages.push(Message::user(fragment));
                self.streaming = false;
                Appended::New
            }
            MessageSource::Agent => {
                if self.pending
                    && self.streaming
                    && let Some(last) = self.messages.last_mut()
                    && last.source == MessageSource::Agent
                {
                    last.text.push_str(fragment);
                    return Appended::Extended;
                }
                self.messages.push(Message::agent(fragment));
                self.streaming = self.pending;
                Appended::New
            }
        }
    }

    /// Record a complete, discrete agent message and clear the pending flag.
    ///
    /// When the reply was already streamed into the last entry, the complete
    /// text replaces it so the reply is not recorded twice.
    pub fn complete_agent_message(&mut self, text: &str) -> Appended {
        let effect = if self.pending && self.streaming {
            match self.messages.last_mut() {
                Some(last) if last.source == MessageSource::Agent => {
                    last.text = text.to_owned();
                    Appended::Extended
                }
                _ => {
                    self.messages.push(Message::agent(text));
                    Appended::New
                }
            }
        } else {
            self.messages.push(Message::agent(text));
            Appended::New
        };
        self.clear_pending();
        effect
    }

    /// Expect an agent reply that has not landed yet.
    pub fn mark_pending(&mut self) {
        self.pending = true;
    }

    /// Stop expecting an agent reply and close any streamed reply.
    pub fn clear_pending(&mut self) {
        self.pending = false;
        self.streaming = false;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Owned copy of the current messages for rendering or export.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
