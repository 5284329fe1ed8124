//! Audio helpers: the realtime PCM codec and the playback level analyzer.
//!
//! Device capture and playback belong to the host. The widget only sees
//! sample buffers handed in through the session controller.

pub mod analyzer;
pub mod pcm;

pub use analyzer::{LevelMeter, PlaybackAnalyzer};

use crate::connection::AgentAudio;

/// Host-side output device for agent speech.
pub trait PlaybackSink: Send + Sync {
    /// Queue a decoded chunk for playback.
    fn play(&self, audio: &AgentAudio);

    /// Drop anything still queued.
    fn stop(&self) {}
}
