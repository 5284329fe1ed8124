//! Voice widget: client-side session controller for a remote conversational agent.
//!
//! The widget lets a visitor talk or type to a remote agent and shows a live
//! transcript. This crate is the part with real concurrency:
//! Credential → Session connection → Transcript → UI events
//!
//! # Architecture
//!
//! - **Credentials**: a signed URL per session, from the REST API
//! - **Connection**: the realtime WebSocket session behind a listener contract
//! - **Transcript**: ordered messages rebuilt from streamed fragments
//! - **Recognition**: the local microphone adapter (advisory hints only)
//! - **Audio**: PCM codec and the playback loudness analyzer
//! - **Fallback**: one-shot HTTP interaction for text-only agents
//! - **Session**: the lifecycle state machine tying it all together

pub mod audio;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod fallback;
pub mod recognition;
pub mod runtime;
pub mod session;
pub mod transcript;

pub use config::WidgetConfig;
pub use error::{Result, WidgetError};
pub use runtime::WidgetEvent;
pub use session::{ConnectionState, SendOutcome, SessionController, SessionDeps, StartOutcome};
pub use transcript::{Message, MessageSource};
