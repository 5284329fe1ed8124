//! Shared helpers for integration tests: scripted collaborators and a
//! harness that wires them into a `SessionController`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, broadcast};
use voice_widget::config::{RecognitionConfig, WidgetConfig};
use voice_widget::connection::{
    ConnectionStatus, SessionConnection, SessionConnector, SessionListener,
};
use voice_widget::credentials::{CredentialProvider, SignedUrl};
use voice_widget::fallback::InteractionFallback;
use voice_widget::recognition::{HintSink, Recognizer, RecognizerFactory};
use voice_widget::{Result, SessionController, SessionDeps, WidgetError, WidgetEvent};

pub(crate) const AGENT_ID: &str = "agent_test";

/// Config with a test agent and a fast analyzer.
pub(crate) fn test_config() -> WidgetConfig {
    let mut config = WidgetConfig::default();
    config.agent.agent_id = AGENT_ID.to_owned();
    config.agent.api_key = Some("test-key".to_owned());
    config.analyzer.frame_interval_ms = 5;
    config.audio.speaking_tail_ms = 50;
    config
}

// ── Credentials ─────────────────────────────────────────────────────────────

pub(crate) struct FakeCredentials {
    url: Option<String>,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
}

impl FakeCredentials {
    pub(crate) fn ok(url: &str) -> Self {
        Self {
            url: Some(url.to_owned()),
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            url: None,
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Waits for `gate` before answering.
    pub(crate) fn gated(url: &str, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::ok(url)
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for FakeCredentials {
    async fn signed_url(&self, agent_id: &str) -> Result<SignedUrl> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(agent_id, AGENT_ID);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.url
            .clone()
            .map(SignedUrl::new)
            .ok_or_else(|| WidgetError::Credential("no signed url".into()))
    }
}

// ── Connection ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct FakeConnection {
    text_input: bool,
    conversation_id: Option<String>,
    fail_send: bool,
    connection_lost: bool,
    pub(crate) sent: Mutex<Vec<String>>,
    pub(crate) audio_chunks: AtomicUsize,
    pub(crate) muted: AtomicBool,
    pub(crate) closed: AtomicBool,
}

impl FakeConnection {
    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionConnection for FakeConnection {
    fn conversation_id(&self) -> Option<String> {
        self.conversation_id.clone()
    }

    fn supports_text_input(&self) -> bool {
        self.text_input
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        if self.connection_lost {
            return Err(WidgetError::Connection("socket closed".into()));
        }
        if self.fail_send {
            return Err(WidgetError::Send("queue full".into()));
        }
        self.sent.lock().unwrap().push(text.to_owned());
        Ok(())
    }

    fn send_audio(&self, _samples: &[f32]) -> Result<()> {
        self.audio_chunks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) struct Opened {
    pub(crate) listener: Arc<dyn SessionListener>,
    pub(crate) connection: Arc<FakeConnection>,
}

/// Connector whose sessions are driven by the test through their listeners.
pub(crate) struct FakeConnector {
    text_input: bool,
    conversation_id: Option<String>,
    report_connected: bool,
    fail: bool,
    fail_send: bool,
    connection_lost: bool,
    opened: Mutex<Vec<Opened>>,
}

impl FakeConnector {
    pub(crate) fn new() -> Self {
        Self {
            text_input: true,
            conversation_id: Some("abc".to_owned()),
            report_connected: true,
            fail: false,
            fail_send: false,
            connection_lost: false,
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Sessions without realtime text input.
    pub(crate) fn text_only(mut self, conversation_id: Option<&str>) -> Self {
        self.text_input = false;
        self.conversation_id = conversation_id.map(str::to_owned);
        self
    }

    /// Sessions that never report `connected` on their own.
    pub(crate) fn silent(mut self) -> Self {
        self.report_connected = false;
        self
    }

    pub(crate) fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub(crate) fn failing_send(mut self) -> Self {
        self.fail_send = true;
        self
    }

    /// Sessions whose socket is already gone when text is sent.
    pub(crate) fn losing_connection(mut self) -> Self {
        self.connection_lost = true;
        self
    }

    pub(crate) fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub(crate) fn listener(&self, index: usize) -> Arc<dyn SessionListener> {
        Arc::clone(&self.opened.lock().unwrap()[index].listener)
    }

    pub(crate) fn connection(&self, index: usize) -> Arc<FakeConnection> {
        Arc::clone(&self.opened.lock().unwrap()[index].connection)
    }

    pub(crate) fn last_listener(&self) -> Arc<dyn SessionListener> {
        self.listener(self.open_count() - 1)
    }

    pub(crate) fn last_connection(&self) -> Arc<FakeConnection> {
        self.connection(self.open_count() - 1)
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn open(
        &self,
        _credential: &SignedUrl,
        listener: Arc<dyn SessionListener>,
    ) -> Result<Arc<dyn SessionConnection>> {
        if self.fail {
            return Err(WidgetError::Connection("refused".into()));
        }
        let connection = Arc::new(FakeConnection {
            text_input: self.text_input,
            conversation_id: self.conversation_id.clone(),
            fail_send: self.fail_send,
            connection_lost: self.connection_lost,
            ..FakeConnection::default()
        });
        self.opened.lock().unwrap().push(Opened {
            listener: Arc::clone(&listener),
            connection: Arc::clone(&connection),
        });
        listener.on_status(ConnectionStatus::Connecting);
        if self.report_connected {
            listener.on_status(ConnectionStatus::Connected);
        }
        Ok(connection)
    }
}

// ── Recognizer ──────────────────────────────────────────────────────────────

/// Counts live recognizers and can refuse microphone permission.
#[derive(Default)]
pub(crate) struct FakeRecognizers {
    pub(crate) created: AtomicUsize,
    pub(crate) listening: Arc<AtomicUsize>,
    pub(crate) deny_start: Arc<AtomicBool>,
    pub(crate) hints: Mutex<Vec<HintSink>>,
}

struct FakeRecognizer {
    listening: Arc<AtomicUsize>,
    deny_start: Arc<AtomicBool>,
}

impl Recognizer for FakeRecognizer {
    fn start(&mut self) -> Result<()> {
        if self.deny_start.load(Ordering::SeqCst) {
            return Err(WidgetError::PermissionDenied);
        }
        self.listening.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.listening.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

impl RecognizerFactory for FakeRecognizers {
    fn create(&self, config: &RecognitionConfig, hints: HintSink) -> Result<Box<dyn Recognizer>> {
        assert!(config.continuous);
        self.created.fetch_add(1, Ordering::SeqCst);
        self.hints.lock().unwrap().push(hints);
        Ok(Box::new(FakeRecognizer {
            listening: Arc::clone(&self.listening),
            deny_start: Arc::clone(&self.deny_start),
        }))
    }
}

impl FakeRecognizers {
    pub(crate) fn listening(&self) -> usize {
        self.listening.load(Ordering::SeqCst)
    }

    /// Publish a hint through the most recently created recognizer.
    pub(crate) fn emit_hint(&self, text: &str, is_final: bool) {
        let sink = self.hints.lock().unwrap().last().cloned();
        if let Some(sink) = sink {
            sink(voice_widget::recognition::RecognitionHint {
                text: text.to_owned(),
                is_final,
            });
        }
    }
}

// ── Harness ─────────────────────────────────────────────────────────────────

pub(crate) struct Harness {
    pub(crate) controller: SessionController,
    pub(crate) connector: Arc<FakeConnector>,
    pub(crate) credentials: Arc<FakeCredentials>,
    pub(crate) recognizers: Arc<FakeRecognizers>,
    pub(crate) events: broadcast::Receiver<WidgetEvent>,
}

pub(crate) fn harness(connector: FakeConnector) -> Harness {
    harness_with(
        FakeCredentials::ok("wss://agent.test/conversation?token=t"),
        connector,
        None,
        test_config(),
    )
}

pub(crate) fn harness_with(
    credentials: FakeCredentials,
    connector: FakeConnector,
    fallback: Option<Arc<dyn InteractionFallback>>,
    config: WidgetConfig,
) -> Harness {
    let connector = Arc::new(connector);
    let credentials = Arc::new(credentials);
    let recognizers = Arc::new(FakeRecognizers::default());
    let deps = SessionDeps {
        credentials: Arc::clone(&credentials) as Arc<dyn CredentialProvider>,
        connector: Arc::clone(&connector) as Arc<dyn SessionConnector>,
        fallback,
        recognizers: Arc::clone(&recognizers) as Arc<dyn RecognizerFactory>,
        playback: None,
    };
    let controller = SessionController::new(config, deps);
    let events = controller.subscribe();
    Harness {
        controller,
        connector,
        credentials,
        recognizers,
        events,
    }
}

/// Drain all pending events from the broadcast receiver into a Vec.
pub(crate) fn drain_events(rx: &mut broadcast::Receiver<WidgetEvent>) -> Vec<WidgetEvent> {
    let mut events = Vec::new();
    while let Ok(evt) = rx.try_recv() {
        events.push(evt);
    }
    events
}

/// State transitions in `events`, in order.
pub(crate) fn state_changes(events: &[WidgetEvent]) -> Vec<voice_widget::ConnectionState> {
    events
        .iter()
        .filter_map(|e| match e {
            WidgetEvent::StateChanged(s) => Some(*s),
            _ => None,
        })
        .collect()
}

pub(crate) fn alerts(events: &[WidgetEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            WidgetEvent::Alert(m) => Some(m.clone()),
            _ => None,
        })
        .collect()
}

/// Poll `condition` until it holds or `timeout` passes.
pub(crate) async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
