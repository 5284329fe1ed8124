//! Local microphone capture and advisory speech recognition.
//!
//! The platform recognizer is a collaborator behind [`Recognizer`]. Its output
//! is a UX hint only and never reaches the transcript. The
//! [`MicrophoneAdapter`] owns the recognizer and the capture track for the
//! length of one conversation; start and stop are best effort.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{MuteStrategy, RecognitionConfig};
use crate::error::{Result, WidgetError};

/// A recognizer hypothesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionHint {
    pub text: String,
    pub is_final: bool,
}

/// Where a recognizer publishes its hints.
pub type HintSink = Arc<dyn Fn(RecognitionHint) + Send + Sync>;

/// A platform speech recognizer.
pub trait Recognizer: Send {
    /// Begin listening.
    ///
    /// # Errors
    ///
    /// [`WidgetError::PermissionDenied`] when microphone access is refused;
    /// [`WidgetError::Microphone`] for any other failure.
    fn start(&mut self) -> Result<()>;

    /// Stop listening.
    ///
    /// # Errors
    ///
    /// Returns [`WidgetError::Microphone`] if the recognizer cannot stop.
    fn stop(&mut self) -> Result<()>;
}

/// Creates recognizers bound to a language and listening mode.
pub trait RecognizerFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the platform has no recognizer available.
    fn create(&self, config: &RecognitionConfig, hints: HintSink) -> Result<Box<dyn Recognizer>>;
}

/// Factory for hosts without speech recognition.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecognizerFactory;

struct NoopRecognizer;

impl Recognizer for NoopRecognizer {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

impl RecognizerFactory for NoopRecognizerFactory {
    fn create(&self, _config: &RecognitionConfig, _hints: HintSink) -> Result<Box<dyn Recognizer>> {
        Ok(Box::new(NoopRecognizer))
    }
}

/// Enable flag of the microphone capture track.
#[derive(Debug, Default)]
struct CaptureTrack {
    enabled: bool,
}

impl CaptureTrack {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

/// Owns the recognizer and capture track for one conversation.
pub struct MicrophoneAdapter {
    recognizer: Option<Box<dyn Recognizer>>,
    track: CaptureTrack,
    strategy: MuteStrategy,
    listening: bool,
    muted: bool,
}

impl MicrophoneAdapter {
    /// Create the adapter. A recognizer that cannot be created is logged and
    /// the adapter works without one.
    pub fn create(
        factory: &dyn RecognizerFactory,
        config: &RecognitionConfig,
        hints: HintSink,
    ) -> Self {
        let recognizer = match factory.create(config, hints) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!("speech recognizer unavailable: {e}");
                None
            }
        };
        debug!(language = %config.language, "microphone adapter created");
        Self {
            recognizer,
            track: CaptureTrack::default(),
            strategy: config.mute_strategy,
            listening: false,
            muted: false,
        }
    }

    /// Start capture. Failures are logged and swallowed.
    pub fn start(&mut self) {
        self.track.set_enabled(!self.muted);
        if !self.muted || self.strategy == MuteStrategy::TrackOnly {
            let _ = self.start_recognizer();
        }
    }

    /// Stop capture. Failures are logged and swallowed.
    pub fn stop(&mut self) {
        self.track.set_enabled(false);
        self.stop_recognizer();
    }

    /// Mute or unmute capture without recreating anything.
    ///
    /// Unmuting restarts a paused recognizer, which doubles as a permission
    /// recheck.
    ///
    /// # Errors
    ///
    /// Returns [`WidgetError::PermissionDenied`] if unmuting was refused; the
    /// adapter then stays muted.
    pub fn set_muted(&mut self, muted: bool) -> Result<()> {
        if muted {
            self.muted = true;
            self.track.set_enabled(false);
            if self.strategy == MuteStrategy::TrackAndRecognizer {
                self.stop_recognizer();
            }
            return Ok(());
        }

        if let Err(WidgetError::PermissionDenied) = self.start_recognizer() {
            return Err(WidgetError::PermissionDenied);
        }
        self.muted = false;
        self.track.set_enabled(true);
        Ok(())
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn has_recognizer(&self) -> bool {
        self.recognizer.is_some()
    }

    /// Whether captured audio may be forwarded.
    pub fn capture_enabled(&self) -> bool {
        self.track.is_enabled()
    }

    fn start_recognizer(&mut self) -> Result<()> {
        let Some(recognizer) = self.recognizer.as_mut() else {
            return Ok(());
        };
        if self.listening {
            return Ok(());
        }
        match recognizer.start() {
            Ok(()) => {
                self.listening = true;
                Ok(())
            }
            Err(e) => {
                warn!("speech recognizer failed to start: {e}");
                Err(e)
            }
        }
    }

    fn stop_recognizer(&mut self) {
        let Some(recognizer) = self.recognizer.as_mut() else {
            return;
        };
        if !self.listening {
            return;
        }
        self.listening = false;
        if let Err(e) = recognizer.stop() {
            warn!("speech recognizer failed to stop: {e}");
        }
    }
}

impl Drop for MicrophoneAdapter {
    fn drop(&mut self) {
        self.stop();
    }
}
