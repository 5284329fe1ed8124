//! Error types for the conversation widget.

/// Top-level error type for the conversation session controller.
#[derive(Debug, thiserror::Error)]
pub enum WidgetError {
    /// No session credential could be obtained for the agent.
    #[error("credential error: {0}")]
    Credential(String),

    /// The realtime session connection failed or was lost.
    #[error("connection error: {0}")]
    Connection(String),

    /// The remote peer sent something we could not make sense of.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Sending text over the realtime connection failed.
    #[error("send error: {0}")]
    Send(String),

    /// The HTTP interaction fallback failed.
    #[error("fallback error: {0}")]
    Fallback(String),

    /// Microphone or speech recognizer failure.
    #[error("microphone error: {0}")]
    Microphone(String),

    /// The platform refused microphone access.
    #[error("microphone permission denied")]
    PermissionDenied,

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Transcript export error.
    #[error("export error: {0}")]
    Export(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WidgetError {
    /// Whether the current session can continue after this error.
    ///
    /// Connection and protocol failures end the session; everything else is
    /// reported in-band and the user may simply try again.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Connection(_) | Self::Protocol(_))
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, WidgetError>;
