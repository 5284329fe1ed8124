//! Terminal client for the voice widget.
//!
//! Reads commands from stdin, one per line:
//!
//! - `/start` opens a conversation, `/end` closes it
//! - `/mute` toggles microphone capture
//! - `/export [dir] [json]` writes the transcript to a file
//! - `/quit` ends the conversation and exits
//! - any other `/word` is reported as an unknown command
//! - anything else is sent to the agent as typed text
//!
//! Transcript updates and alerts go to stdout; tracing goes to stderr.
//!
//! Usage: `voice-widget [config.toml]`

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use voice_widget::transcript::export::ExportFormat;
use voice_widget::{SessionController, WidgetConfig, WidgetEvent};

fn load_config() -> anyhow::Result<WidgetConfig> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(WidgetConfig::default_config_path);
    if path.exists() {
        tracing::info!(path = %path.display(), "loading config");
        Ok(WidgetConfig::from_file(&path)?)
    } else {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        Ok(WidgetConfig::default())
    }
}

fn print_new_messages(controller: &SessionController, printed: &mut usize) {
    let labels = &controller.config().labels;
    let messages = controller.transcript();
    // The last entry may have grown since it was printed.
    let from = printed.saturating_sub(1).min(messages.len());
    for (index, message) in messages.iter().enumerate().skip(from) {
        let label = match message.source {
            voice_widget::MessageSource::User => &labels.user_label,
            voice_widget::MessageSource::Agent => &labels.agent_label,
        };
        let marker = if index < *printed { "~" } else { " " };
        println!("{marker}{label}: {}", message.text);
    }
    *printed = messages.len();
}

/// One line of user input.
#[derive(Debug, PartialEq)]
enum Command<'a> {
    Start,
    End,
    Mute,
    Export { dir: PathBuf, format: ExportFormat },
    Quit,
    Unknown(&'a str),
    Text(&'a str),
}

fn parse_command(line: &str) -> Command<'_> {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("/start") => Command::Start,
        Some("/end") => Command::End,
        Some("/mute") => Command::Mute,
        Some("/export") => {
            let dir = parts.next().map_or_else(|| PathBuf::from("."), PathBuf::from);
            let format = match parts.next() {
                Some("json") => ExportFormat::Json,
                _ => ExportFormat::Text,
            };
            Command::Export { dir, format }
        }
        Some("/quit") => Command::Quit,
        Some(word) if word.starts_with('/') => Command::Unknown(word),
        _ => Command::Text(line),
    }
}

async fn handle_command(controller: &SessionController, line: &str) -> bool {
    match parse_command(line) {
        Command::Start => {
            let controller = controller.clone();
            tokio::spawn(async move {
                let outcome = controller.start().await;
                tracing::debug!(?outcome, "start finished");
            });
        }
        Command::End => controller.end().await,
        Command::Mute => match controller.toggle_mute() {
            Some(true) => println!("* muted"),
            Some(false) => println!("* unmuted"),
            None => println!("* not connected"),
        },
        Command::Export { dir, format } => match controller.export_transcript(format, &dir) {
            Ok(path) => println!("* transcript written to {}", path.display()),
            Err(e) => println!("* export failed: {e}"),
        },
        Command::Quit => {
            controller.end().await;
            return false;
        }
        Command::Unknown(name) => println!("* unknown command: {name}"),
        Command::Text(text) => {
            let controller = controller.clone();
            let text = text.to_owned();
            tokio::spawn(async move {
                let outcome = controller.send(&text).await;
                tracing::debug!(?outcome, "send finished");
            });
        }
    }
    true
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    let controller = SessionController::from_config(config)
        .map_err(|e| anyhow::anyhow!("cannot create session controller: {e}"))?;

    let mut events = controller.subscribe();
    let printer = controller.clone();
    let event_handle = tokio::spawn(async move {
        let mut printed = 0;
        loop {
            match events.recv().await {
                Ok(WidgetEvent::TranscriptUpdated { .. }) => {
                    print_new_messages(&printer, &mut printed);
                }
                Ok(WidgetEvent::StateChanged(state)) => println!("* {state}"),
                Ok(WidgetEvent::PendingChanged { pending: true }) => println!("* ..."),
                Ok(WidgetEvent::Alert(message)) => println!("! {message}"),
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "event printer lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut reader = BufReader::new(tokio::io::stdin());
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            tracing::info!("stdin closed, shutting down");
            controller.end().await;
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !handle_command(&controller, trimmed).await {
            break;
        }
    }

    event_handle.abort();
    let _ = event_handle.await;
    Ok(())
}
