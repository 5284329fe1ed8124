//! Conversation session controller.
//!
//! [`SessionController`] owns the lifecycle state machine
//! (`disconnected → connecting → connected → disconnected`), the transcript,
//! the microphone adapter and the playback analyzer. Remote events arrive
//! through a [`SessionListener`](crate::connection::SessionListener) bound to
//! one session id; events for any other id are stale and dropped.
//!
//! State lives behind a `std::sync::Mutex` that is only held for synchronous
//! bookkeeping, never across an `.await`. The controller is cheap to clone and
//! all clones drive the same conversation.

mod dispatch;
mod listener;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::audio::{PlaybackAnalyzer, PlaybackSink};
use crate::config::WidgetConfig;
use crate::connection::{SessionConnection, SessionConnector, WebSocketConnector};
use crate::credentials::{self, CredentialProvider, SignedUrl};
use crate::error::Result;
use crate::fallback::{HttpInteractionClient, InteractionFallback};
use crate::recognition::{
    HintSink, MicrophoneAdapter, NoopRecognizerFactory, RecognitionHint, RecognizerFactory,
};
use crate::runtime::{EVENT_CHANNEL_CAPACITY, WidgetEvent};
use crate::transcript::export::{self, ExportFormat};
use crate::transcript::{Message, Transcript};

pub use dispatch::SendOutcome;
use listener::SessionBinding;

/// Lifecycle state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Identifies one conversation started by a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Result of [`SessionController::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The session handle is open. The state is `connected`, or `connecting`
    /// until the connection reports its first connected status.
    Started,
    /// A session is already connecting or connected; nothing happened.
    AlreadyActive,
    /// No credential was issued. An alert was raised.
    CredentialFailed,
    /// The session connection could not be opened. An alert was raised.
    ConnectionFailed,
    /// The session was ended while it was being started.
    Superseded,
}

/// Collaborators of the controller.
pub struct SessionDeps {
    pub credentials: Arc<dyn CredentialProvider>,
    pub connector: Arc<dyn SessionConnector>,
    /// `None` disables the HTTP interaction fallback.
    pub fallback: Option<Arc<dyn InteractionFallback>>,
    pub recognizers: Arc<dyn RecognizerFactory>,
    /// Host output for agent speech, if the host plays audio.
    pub playback: Option<Arc<dyn PlaybackSink>>,
}

impl SessionDeps {
    /// Production collaborators: REST credentials, WebSocket sessions, HTTP
    /// fallback and no local recognizer.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn from_config(config: &WidgetConfig) -> Result<Self> {
        Ok(Self {
            credentials: credentials::provider_from_config(&config.agent)?,
            connector: Arc::new(WebSocketConnector::new(config)),
            fallback: Some(Arc::new(HttpInteractionClient::new(&config.agent)?)),
            recognizers: Arc::new(NoopRecognizerFactory),
            playback: None,
        })
    }
}

/// The one open conversation.
struct Session {
    id: SessionId,
    credential: Option<SignedUrl>,
    connection: Option<Arc<dyn SessionConnection>>,
    /// Set from the connection once, never changed afterwards.
    conversation_id: Option<String>,
    /// The connection reported `connected` before its handle was stored.
    connected_reported: bool,
}

impl Session {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            credential: None,
            connection: None,
            conversation_id: None,
            connected_reported: false,
        }
    }
}

struct Inner {
    state: ConnectionState,
    session: Option<Session>,
    transcript: Transcript,
    speaking: bool,
    muted: bool,
    microphone: Option<MicrophoneAdapter>,
    analyzer: PlaybackAnalyzer,
}

impl Inner {
    fn is_current(&self, id: SessionId) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == id)
    }

    fn current_session_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.session.as_mut().filter(|s| s.id == id)
    }

    fn connection(&self) -> Option<Arc<dyn SessionConnection>> {
        self.session.as_ref().and_then(|s| s.connection.clone())
    }
}

struct Shared {
    config: WidgetConfig,
    deps: SessionDeps,
    events: broadcast::Sender<WidgetEvent>,
    next_session: AtomicU64,
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: WidgetEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn alert(&self, message: impl Into<String>) {
        self.emit(WidgetEvent::Alert(message.into()));
    }

    fn set_state(&self, inner: &mut Inner, state: ConnectionState) {
        if inner.state != state {
            inner.state = state;
            self.emit(WidgetEvent::StateChanged(state));
        }
    }

    fn set_pending(&self, inner: &mut Inner, pending: bool) {
        if inner.transcript.is_pending() == pending {
            return;
        }
        if pending {
            inner.transcript.mark_pending();
        } else {
            inner.transcript.clear_pending();
        }
        self.emit(WidgetEvent::PendingChanged { pending });
    }

    fn transcript_changed(&self, inner: &Inner) {
        self.emit(WidgetEvent::TranscriptUpdated {
            len: inner.transcript.len(),
        });
    }

    /// Record a complete agent message, closing any streamed reply.
    fn record_agent_reply(&self, inner: &mut Inner, text: &str) {
        let was_pending = inner.transcript.is_pending();
        inner.transcript.complete_agent_message(text);
        if was_pending {
            self.emit(WidgetEvent::PendingChanged { pending: false });
        }
        self.transcript_changed(inner);
    }

    fn set_speaking(&self, inner: &mut Inner, speaking: bool) {
        if inner.speaking == speaking {
            return;
        }
        inner.speaking = speaking;
        if speaking {
            inner.analyzer.attach();
        } else {
            inner.analyzer.detach();
        }
        self.emit(WidgetEvent::SpeakingChanged { speaking });
    }

    fn set_muted(&self, inner: &mut Inner, muted: bool) {
        if inner.muted != muted {
            inner.muted = muted;
            self.emit(WidgetEvent::MuteChanged { muted });
        }
    }

    fn hint_sink(&self) -> HintSink {
        let events = self.events.clone();
        Arc::new(move |hint: RecognitionHint| {
            let _ = events.send(WidgetEvent::RecognitionHint {
                text: hint.text,
                is_final: hint.is_final,
            });
        })
    }

    fn create_microphone(&self) -> MicrophoneAdapter {
        MicrophoneAdapter::create(
            self.deps.recognizers.as_ref(),
            &self.config.recognition,
            self.hint_sink(),
        )
    }

    /// Both halves of "connected" are in: the handle and its status.
    fn enter_connected(&self, inner: &mut Inner) {
        let Some(session) = inner.session.as_ref() else {
            return;
        };
        let id = session.id;
        if let Some(connection) = &session.connection {
            connection.set_muted(false);
        }
        self.set_state(inner, ConnectionState::Connected);
        let microphone = inner
            .microphone
            .get_or_insert_with(|| self.create_microphone());
        microphone.start();
        info!(session = %id, "conversation connected");
    }

    /// Return to `disconnected`, releasing everything owned by the session.
    ///
    /// The transcript is kept.
    fn teardown(&self, inner: &mut Inner) -> Option<Session> {
        let session = inner.session.take();
        // Drop stops the recognizer and disables the track.
        inner.microphone = None;
        self.set_speaking(inner, false);
        self.set_muted(inner, false);
        self.set_pending(inner, false);
        if let Some(playback) = &self.deps.playback {
            playback.stop();
        }
        self.set_state(inner, ConnectionState::Disconnected);
        if let Some(s) = &session {
            info!(session = %s.id, credential = ?s.credential, "conversation ended");
        }
        session
    }
}

/// Close a connection from a synchronous context.
fn close_in_background(connection: Arc<dyn SessionConnection>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = connection.close().await {
                    warn!("closing session connection failed: {e}");
                }
            });
        }
        Err(_) => debug!("no async runtime, dropping session connection without close"),
    }
}

/// Drives one conversation at a time with the remote agent.
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
}

impl SessionController {
    pub fn new(config: WidgetConfig, deps: SessionDeps) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let analyzer = PlaybackAnalyzer::new(&config.analyzer).with_events(events.clone());
        Self {
            shared: Arc::new(Shared {
                config,
                deps,
                events,
                next_session: AtomicU64::new(1),
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    session: None,
                    transcript: Transcript::new(),
                    speaking: false,
                    muted: false,
                    microphone: None,
                    analyzer,
                }),
            }),
        }
    }

    /// Validate `config` and build the production collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or a client cannot be built.
    pub fn from_config(config: WidgetConfig) -> Result<Self> {
        config.validate()?;
        let deps = SessionDeps::from_config(&config)?;
        Ok(Self::new(config, deps))
    }

    pub fn config(&self) -> &WidgetConfig {
        &self.shared.config
    }

    /// Start a conversation. Only valid from `disconnected`.
    pub async fn start(&self) -> StartOutcome {
        let shared = &self.shared;
        let id = {
            let mut inner = shared.lock();
            if inner.state != ConnectionState::Disconnected {
                debug!(state = %inner.state, "start ignored, conversation already active");
                return StartOutcome::AlreadyActive;
            }
            let id = SessionId(shared.next_session.fetch_add(1, Ordering::Relaxed));
            inner.session = Some(Session::new(id));
            inner.microphone = Some(shared.create_microphone());
            shared.set_state(&mut inner, ConnectionState::Connecting);
            info!(session = %id, agent = %shared.config.agent.agent_id, "starting conversation");
            id
        };

        let credential = match shared
            .deps
            .credentials
            .signed_url(&shared.config.agent.agent_id)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!(session = %id, "no session credential: {e}");
                let mut inner = shared.lock();
                if !inner.is_current(id) {
                    return StartOutcome::Superseded;
                }
                shared.teardown(&mut inner);
                shared.alert(shared.config.labels.credential_error.clone());
                return StartOutcome::CredentialFailed;
            }
        };

        {
            let mut inner = shared.lock();
            match inner.current_session_mut(id) {
                Some(session) => session.credential = Some(credential.clone()),
                None => return StartOutcome::Superseded,
            }
        }

        let binding = Arc::new(SessionBinding::new(id, Arc::downgrade(shared)));
        let connection = match shared.deps.connector.open(&credential, binding).await {
            Ok(c) => c,
            Err(e) => {
                warn!(session = %id, "session connection failed: {e}");
                let mut inner = shared.lock();
                if !inner.is_current(id) {
                    return StartOutcome::Superseded;
                }
                shared.teardown(&mut inner);
                shared.alert(shared.config.labels.connection_error.clone());
                return StartOutcome::ConnectionFailed;
            }
        };

        let mut inner = shared.lock();
        let Some(session) = inner.current_session_mut(id) else {
            debug!(session = %id, "conversation ended while connecting");
            close_in_background(connection);
            return StartOutcome::Superseded;
        };
        session.conversation_id = connection.conversation_id();
        if session.conversation_id.is_none() {
            debug!(session = %id, "connection reported no conversation id");
        }
        session.connection = Some(connection);
        if session.connected_reported {
            shared.enter_connected(&mut inner);
        }
        StartOutcome::Started
    }

    /// End the conversation. No-op when already disconnected.
    pub async fn end(&self) {
        let connection = {
            let mut inner = self.shared.lock();
            if inner.state == ConnectionState::Disconnected {
                return;
            }
            self.shared
                .teardown(&mut inner)
                .and_then(|s| s.connection)
        };
        if let Some(connection) = connection
            && let Err(e) = connection.close().await
        {
            warn!("closing session connection failed: {e}");
        }
    }

    /// Flip the mute state of the active conversation.
    ///
    /// Returns the new mute state, or `None` when not connected.
    pub fn toggle_mute(&self) -> Option<bool> {
        let muted = self.shared.lock().muted;
        self.set_muted(!muted)
    }

    /// Mute or unmute local capture without touching the session.
    ///
    /// Returns the resulting mute state, or `None` when not connected. A
    /// refused unmute leaves the conversation muted and raises an alert.
    pub fn set_muted(&self, muted: bool) -> Option<bool> {
        let shared = &self.shared;
        let mut inner = shared.lock();
        if inner.state != ConnectionState::Connected {
            debug!("mute ignored, not connected");
            return None;
        }
        let result = match inner.microphone.as_mut() {
            Some(microphone) => microphone.set_muted(muted),
            None => Ok(()),
        };
        match result {
            Ok(()) => {
                if let Some(connection) = inner.connection() {
                    connection.set_muted(muted);
                }
                shared.set_muted(&mut inner, muted);
                Some(muted)
            }
            Err(e) => {
                warn!("unmute refused: {e}");
                shared.alert(shared.config.labels.microphone_permission_denied.clone());
                Some(inner.muted)
            }
        }
    }

    /// Forward captured microphone samples to the agent.
    ///
    /// Returns `true` if the samples were handed to the connection.
    pub fn push_microphone_audio(&self, samples: &[f32]) -> bool {
        let connection = {
            let inner = self.shared.lock();
            let capturing = inner.state == ConnectionState::Connected
                && !inner.muted
                && inner
                    .microphone
                    .as_ref()
                    .is_some_and(MicrophoneAdapter::capture_enabled);
            if !capturing {
                return false;
            }
            inner.connection()
        };
        let Some(connection) = connection else {
            return false;
        };
        match connection.send_audio(samples) {
            Ok(()) => true,
            Err(e) => {
                debug!("dropping microphone audio: {e}");
                false
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WidgetEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Ordered copy of the transcript.
    pub fn transcript(&self) -> Vec<Message> {
        self.shared.lock().transcript.snapshot()
    }

    pub fn is_speaking(&self) -> bool {
        self.shared.lock().speaking
    }

    pub fn is_muted(&self) -> bool {
        self.shared.lock().muted
    }

    /// Whether the typing indicator should show.
    pub fn is_pending(&self) -> bool {
        self.shared.lock().transcript.is_pending()
    }

    pub fn has_microphone(&self) -> bool {
        self.shared.lock().microphone.is_some()
    }

    pub fn is_analyzing(&self) -> bool {
        self.shared.lock().analyzer.is_attached()
    }

    pub fn audio_level(&self) -> f32 {
        self.shared.lock().analyzer.level()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.shared.lock().session.as_ref().map(|s| s.id)
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.shared
            .lock()
            .session
            .as_ref()
            .and_then(|s| s.conversation_id.clone())
    }

    /// Render the transcript with source labels.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON rendering fails.
    pub fn render_transcript(&self, format: ExportFormat) -> Result<String> {
        let messages = self.transcript();
        export::render(&messages, format, &self.shared.config.labels)
    }

    /// Write the transcript to a timestamped file in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transcript is empty or cannot be written.
    pub fn export_transcript(&self, format: ExportFormat, dir: &Path) -> Result<PathBuf> {
        let messages = self.transcript();
        export::write_to_dir(&messages, format, &self.shared.config.labels, dir)
    }
}
