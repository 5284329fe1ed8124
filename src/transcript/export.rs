//! Transcript export as a downloadable artifact.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;

use super::{Message, MessageSource};
use crate::config::Labels;
use crate::error::{Result, WidgetError};

/// Output format for an exported transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    /// One `Label: text` line per message.
    #[default]
    Text,
    /// Pretty-printed JSON array.
    Json,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Json => "json",
        }
    }
}

#[derive(Serialize)]
struct ExportedMessage<'a> {
    index: usize,
    source: MessageSource,
    label: &'a str,
    text: &'a str,
}

fn label_for<'a>(source: MessageSource, labels: &'a Labels) -> &'a str {
    match source {
        MessageSource::User => &labels.user_label,
        MessageSource::Agent => &labels.agent_label,
    }
}

/// Render messages in their recorded order with explicit source labels.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render(messages: &[Message], format: ExportFormat, labels: &Labels) -> Result<String> {
    match format {
        ExportFormat::Text => {
            let mut out = String::new();
            for msg in messages {
                out.push_str(label_for(msg.source, labels));
                out.push_str(": ");
                out.push_str(&msg.text);
                out.push('\n');
            }
            Ok(out)
        }
        ExportFormat::Json => {
            let entries: Vec<ExportedMessage<'_>> = messages
                .iter()
                .enumerate()
                .map(|(index, msg)| ExportedMessage {
                    index,
                    source: msg.source,
                    label: label_for(msg.source, labels),
                    text: &msg.text,
                })
                .collect();
            Ok(serde_json::to_string_pretty(&entries)?)
        }
    }
}

/// File name like `transcript-20261017-142233.txt`.
pub fn default_file_name(format: ExportFormat, at: DateTime<Local>) -> String {
    format!(
        "transcript-{}.{}",
        at.format("%Y%m%d-%H%M%S"),
        format.extension()
    )
}

/// Write the rendered transcript into `dir` and return the file path.
///
/// # Errors
///
/// Returns an error if the transcript is empty or the file cannot be written.
pub fn write_to_dir(
    messages: &[Message],
    format: ExportFormat,
    labels: &Labels,
    dir: &Path,
) -> Result<PathBuf> {
    if messages.is_empty() {
        return Err(WidgetError::Export("transcript is empty".into()));
    }
    let rendered = render(messages, format, labels)?;
    std::fs::create_dir_all(dir)?;
    let path = dir.join(default_file_name(format, Local::now()));
    std::fs::write(&path, rendered)?;
    tracing::info!(path = %path.display(), count = messages.len(), "transcript exported");
    Ok(path)
}
