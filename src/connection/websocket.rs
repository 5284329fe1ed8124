//! Realtime session over the agent's conversation WebSocket.
//!
//! [`WebSocketConnector::open`] connects to the signed URL, performs the
//! initiation handshake and then hands the socket to a background task that
//! translates server frames into [`SessionListener`] calls. Outbound frames go
//! through an unbounded channel so senders never wait on the socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::{ClientMessage, PartKind, ServerMessage, UserAudioChunk, pcm_sample_rate};
use super::{
    AgentAudio, AgentMode, ConnectionStatus, InboundMessage, SessionConnection, SessionConnector,
    SessionListener, probe_conversation_id,
};
use crate::audio::pcm::{decode_base64_pcm16, encode_base64_pcm16, resample_linear};
use crate::config::WidgetConfig;
use crate::credentials::SignedUrl;
use crate::error::{Result, WidgetError};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SocketWriter = SplitSink<Socket, Message>;
type SocketReader = SplitStream<Socket>;

/// What the handshake told us about the session.
#[derive(Debug, Default)]
struct Handshake {
    conversation_id: Option<String>,
    /// Rate of agent audio.
    sample_rate: Option<u32>,
    /// Rate the agent expects microphone audio at.
    input_sample_rate: Option<u32>,
}

/// Opens realtime sessions over WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    handshake_timeout: Duration,
    text_input: bool,
    capture_sample_rate: u32,
    output_sample_rate: u32,
    speaking_tail: Duration,
}

impl WebSocketConnector {
    pub fn new(config: &WidgetConfig) -> Self {
        Self {
            handshake_timeout: Duration::from_secs(config.agent.handshake_timeout_secs.max(1)),
            text_input: config.agent.text_input,
            capture_sample_rate: config.audio.input_sample_rate,
            output_sample_rate: config.audio.output_sample_rate,
            speaking_tail: Duration::from_millis(config.audio.speaking_tail_ms),
        }
    }
}

#[async_trait]
impl SessionConnector for WebSocketConnector {
    async fn open(
        &self,
        credential: &SignedUrl,
        listener: Arc<dyn SessionListener>,
    ) -> Result<Arc<dyn SessionConnection>> {
        listener.on_status(ConnectionStatus::Connecting);

        let (write, read, handshake) =
            tokio::time::timeout(self.handshake_timeout, establish(credential))
                .await
                .map_err(|_| WidgetError::Connection("handshake timed out".into()))??;

        let sample_rate = handshake.sample_rate.unwrap_or(self.output_sample_rate);
        let agent_input_rate = handshake
            .input_sample_rate
            .unwrap_or(self.capture_sample_rate);
        info!(
            conversation = handshake.conversation_id.as_deref().unwrap_or("<none>"),
            sample_rate,
            capture_rate = self.capture_sample_rate,
            agent_input_rate,
            "realtime session established"
        );

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let connection = Arc::new(WebSocketConnection {
            conversation_id: handshake.conversation_id,
            text_input: self.text_input,
            capture_rate: self.capture_sample_rate,
            agent_input_rate,
            outbound: outbound_tx,
            muted: AtomicBool::new(false),
            cancel: cancel.clone(),
        });

        listener.on_status(ConnectionStatus::Connected);
        tokio::spawn(socket_loop(
            write,
            read,
            outbound_rx,
            listener,
            cancel,
            sample_rate.max(1),
            self.speaking_tail,
        ));

        Ok(connection)
    }
}

/// Handle to an open realtime session.
pub struct WebSocketConnection {
    conversation_id: Option<String>,
    text_input: bool,
    capture_rate: u32,
    agent_input_rate: u32,
    outbound: mpsc::UnboundedSender<String>,
    muted: AtomicBool,
    cancel: CancellationToken,
}

impl WebSocketConnection {
    fn enqueue(&self, json: String) -> Result<()> {
        self.outbound
            .send(json)
            .map_err(|_| WidgetError::Connection("session socket is closed".into()))
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SessionConnection for WebSocketConnection {
    fn conversation_id(&self) -> Option<String> {
        self.conversation_id.clone()
    }

    fn supports_text_input(&self) -> bool {
        self.text_input
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        if !self.text_input {
            return Err(WidgetError::Send("text input is disabled for this agent".into()));
        }
        let json = serde_json::to_string(&ClientMessage::UserMessage {
            text: text.to_owned(),
        })?;
        self.enqueue(json)
    }

    fn send_audio(&self, samples: &[f32]) -> Result<()> {
        if self.is_muted() || samples.is_empty() {
            return Ok(());
        }
        let encoded = if self.capture_rate == self.agent_input_rate {
            encode_base64_pcm16(samples)
        } else {
            encode_base64_pcm16(&resample_linear(
                samples,
                self.capture_rate,
                self.agent_input_rate,
            ))
        };
        let json = serde_json::to_string(&UserAudioChunk {
            user_audio_chunk: &encoded,
        })?;
        self.enqueue(json)
    }

    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        Ok(())
    }
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Connect, send the initiation frame and wait for the agent's metadata.
async fn establish(credential: &SignedUrl) -> Result<(SocketWriter, SocketReader, Handshake)> {
    let (socket, _) = connect_async(credential.as_str())
        .await
        .map_err(|e| WidgetError::Connection(format!("connect: {e}")))?;
    let (mut write, mut read) = socket.split();

    let init = serde_json::to_string(&ClientMessage::ConversationInitiationClientData)?;
    write
        .send(Message::Text(init))
        .await
        .map_err(|e| WidgetError::Connection(format!("send initiation: {e}")))?;

    let handshake = await_handshake(&mut write, &mut read).await?;
    Ok((write, read, handshake))
}

/// Read frames until the initiation metadata arrives, answering pings.
async fn await_handshake(write: &mut SocketWriter, read: &mut SocketReader) -> Result<Handshake> {
    while let Some(frame) = read.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => return Err(WidgetError::Connection(format!("handshake read: {e}"))),
        };
        let raw: serde_json::Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                debug!("ignoring unparseable handshake frame: {e}");
                continue;
            }
        };
        match serde_json::from_value::<ServerMessage>(raw.clone()) {
            Ok(ServerMessage::ConversationInitiationMetadata) => {
                let format_rate = |field: &str| {
                    raw.pointer(&format!("/conversation_initiation_metadata_event/{field}"))
                        .and_then(|v| v.as_str())
                        .and_then(pcm_sample_rate)
                };
                return Ok(Handshake {
                    conversation_id: probe_conversation_id(&raw),
                    sample_rate: format_rate("agent_output_audio_format"),
                    input_sample_rate: format_rate("user_input_audio_format"),
                });
            }
            Ok(ServerMessage::Ping { ping_event }) => {
                let pong = serde_json::to_string(&ClientMessage::Pong {
                    event_id: ping_event.event_id,
                })?;
                write
                    .send(Message::Text(pong))
                    .await
                    .map_err(|e| WidgetError::Connection(format!("handshake pong: {e}")))?;
            }
            Ok(msg @ ServerMessage::Error { .. }) => {
                let detail = msg.error_text().unwrap_or_default();
                return Err(WidgetError::Connection(format!("rejected: {detail}")));
            }
            Ok(_) | Err(_) => debug!("ignoring frame before handshake"),
        }
    }
    Err(WidgetError::Connection(
        "socket closed during handshake".into(),
    ))
}

/// Tracks whether agent audio is still playing.
///
/// Chunks arrive faster than real time, so playback end is pushed out by each
/// chunk's duration. Speaking ends `tail` after the queued audio runs out.
struct PlaybackClock {
    sample_rate: u32,
    tail: Duration,
    playback_end: Option<Instant>,
}

impl PlaybackClock {
    /// Account for a chunk. Returns `true` if this starts a speaking turn.
    fn push(&mut self, samples: usize, now: Instant) -> bool {
        let duration = Duration::from_secs_f64(samples as f64 / f64::from(self.sample_rate));
        let started = self.playback_end.is_none();
        let from = self.playback_end.map_or(now, |end| end.max(now));
        self.playback_end = Some(from + duration);
        started
    }

    fn idle_at(&self) -> Option<Instant> {
        self.playback_end.map(|end| end + self.tail)
    }

    /// Returns `true` if the agent was speaking.
    fn stop(&mut self) -> bool {
        self.playback_end.take().is_some()
    }
}

/// The agent reply currently being streamed as text parts.
#[derive(Debug, Default)]
struct ReplyStream {
    text: String,
    /// A reply closed by its `stop` part whose `agent_response` may follow.
    closed: Option<String>,
}

impl ReplyStream {
    /// Close the open reply. Returns its text if anything was streamed.
    fn finish(&mut self) -> Option<String> {
        if self.text.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.text);
        self.closed = Some(text.clone());
        Some(text)
    }

    /// Whether a complete reply repeats one already closed by `stop`.
    fn is_echo(&mut self, text: &str) -> bool {
        if self.text.is_empty() && self.closed.as_deref() == Some(text) {
            self.closed = None;
            return true;
        }
        self.text.clear();
        self.closed = None;
        false
    }
}

/// What the socket task remembers between frames.
struct FrameState {
    clock: PlaybackClock,
    reply: ReplyStream,
}

impl FrameState {
    fn new(sample_rate: u32, speaking_tail: Duration) -> Self {
        Self {
            clock: PlaybackClock {
                sample_rate,
                tail: speaking_tail,
                playback_end: None,
            },
            reply: ReplyStream::default(),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn socket_loop(
    mut write: SocketWriter,
    mut read: SocketReader,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    listener: Arc<dyn SessionListener>,
    cancel: CancellationToken,
    sample_rate: u32,
    speaking_tail: Duration,
) {
    let mut state = FrameState::new(sample_rate, speaking_tail);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                debug!("realtime session closed locally");
                return;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_server_frame(&text, listener.as_ref(), &mut state)
                            && let Err(e) = write.send(Message::Text(reply)).await
                        {
                            listener.on_error(format!("connection lost: {e}"));
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("realtime session closed by the agent");
                        if state.clock.stop() {
                            listener.on_mode(AgentMode::Listening);
                        }
                        listener.on_status(ConnectionStatus::Disconnected);
                        return;
                    }
                    Some(Err(e)) => {
                        warn!("realtime socket read failed: {e}");
                        listener.on_error(format!("connection lost: {e}"));
                        return;
                    }
                    Some(Ok(_)) => {}
                }
            }
            Some(json) = outbound_rx.recv() => {
                if let Err(e) = write.send(Message::Text(json)).await {
                    warn!("realtime socket write failed: {e}");
                    listener.on_error(format!("connection lost: {e}"));
                    return;
                }
            }
            () = sleep_until(state.clock.idle_at()) => {
                state.clock.stop();
                listener.on_mode(AgentMode::Listening);
            }
        }
    }
}

/// Dispatch one server frame. Returns a frame to send back, if any.
fn handle_server_frame(
    text: &str,
    listener: &dyn SessionListener,
    state: &mut FrameState,
) -> Option<String> {
    let msg: ServerMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            debug!("ignoring unparseable server frame: {e}");
            return None;
        }
    };

    match msg {
        ServerMessage::Ping { ping_event } => {
            return serde_json::to_string(&ClientMessage::Pong {
                event_id: ping_event.event_id,
            })
            .ok();
        }
        ServerMessage::AgentResponse {
            agent_response_event,
        } => {
            let text = agent_response_event.agent_response;
            if state.reply.is_echo(&text) {
                debug!("dropping agent response already closed by its stop part");
            } else {
                listener.on_message(InboundMessage::agent(text));
            }
        }
        ServerMessage::AgentChatResponsePart { text_response_part } => {
            match text_response_part.kind {
                PartKind::Start | PartKind::Stop => {
                    // A start with text still open means the previous stop was lost.
                    if let Some(text) = state.reply.finish() {
                        listener.on_message(InboundMessage::agent(text));
                    }
                }
                PartKind::Delta if !text_response_part.text.is_empty() => {
                    state.reply.text.push_str(&text_response_part.text);
                    listener.on_message(InboundMessage::agent_fragment(text_response_part.text));
                }
                PartKind::Delta => {}
            }
        }
        ServerMessage::UserTranscript {
            user_transcription_event,
        } => {
            let transcript = user_transcription_event.user_transcript;
            if !transcript.trim().is_empty() {
                listener.on_message(InboundMessage::user(transcript));
            }
        }
        ServerMessage::Audio { audio_event } => match decode_base64_pcm16(&audio_event.audio_base_64) {
            Ok(samples) if !samples.is_empty() => {
                if state.clock.push(samples.len(), Instant::now()) {
                    listener.on_mode(AgentMode::Speaking);
                }
                listener.on_audio(AgentAudio {
                    samples,
                    sample_rate: state.clock.sample_rate,
                });
            }
            Ok(_) => {}
            Err(e) => debug!("dropping audio chunk {}: {e}", audio_event.event_id),
        },
        ServerMessage::Interruption { .. } => {
            if let Some(text) = state.reply.finish() {
                listener.on_message(InboundMessage::agent(text));
            }
            if state.clock.stop() {
                listener.on_mode(AgentMode::Listening);
            }
        }
        msg @ ServerMessage::Error { .. } => {
            listener.on_error(msg.error_text().unwrap_or_default());
        }
        ServerMessage::AgentResponseCorrection { .. } => {
            debug!("ignoring agent response correction");
        }
        ServerMessage::ConversationInitiationMetadata | ServerMessage::Unknown => {}
    }
    None
}
