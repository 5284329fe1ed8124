//! Lifecycle, transcript and mute behaviour of the session controller,
//! driven through scripted collaborators.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::Notify;
use voice_widget::config::Labels;
use voice_widget::connection::{AgentMode, ConnectionStatus, InboundMessage};
use voice_widget::transcript::export::ExportFormat;
use voice_widget::{
    ConnectionState, Message, SendOutcome, StartOutcome, WidgetEvent,
};

use crate::helpers::{
    FakeConnector, FakeCredentials, alerts, drain_events, harness, harness_with, state_changes,
    test_config, wait_until,
};

#[tokio::test]
async fn start_connects_and_end_disconnects() {
    let mut h = harness(FakeConnector::new());

    assert_eq!(h.controller.start().await, StartOutcome::Started);
    assert_eq!(h.controller.state(), ConnectionState::Connected);
    assert!(h.controller.has_microphone());
    assert_eq!(h.recognizers.listening(), 1);
    assert_eq!(h.controller.conversation_id().as_deref(), Some("abc"));

    h.controller.end().await;
    assert_eq!(h.controller.state(), ConnectionState::Disconnected);
    assert!(!h.controller.has_microphone());
    assert_eq!(h.recognizers.listening(), 0);
    assert!(h.connector.last_connection().is_closed());
    assert_eq!(h.controller.conversation_id(), None);

    let events = drain_events(&mut h.events);
    assert_eq!(
        state_changes(&events),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected
        ]
    );
}

#[tokio::test]
async fn repeated_start_and_end_are_idempotent() {
    let mut h = harness(FakeConnector::new());

    assert_eq!(h.controller.start().await, StartOutcome::Started);
    assert_eq!(h.controller.start().await, StartOutcome::AlreadyActive);
    assert_eq!(h.credentials.calls(), 1);
    assert_eq!(h.connector.open_count(), 1);

    h.controller.end().await;
    h.controller.end().await;

    let events = drain_events(&mut h.events);
    assert_eq!(state_changes(&events).len(), 3);
    assert_eq!(h.recognizers.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn connected_waits_for_first_connected_status() {
    let h = harness(FakeConnector::new().silent());

    assert_eq!(h.controller.start().await, StartOutcome::Started);
    assert_eq!(h.controller.state(), ConnectionState::Connecting);
    assert!(h.controller.has_microphone());
    assert_eq!(h.recognizers.listening(), 0);

    assert_eq!(h.controller.start().await, StartOutcome::AlreadyActive);

    let listener = h.connector.last_listener();
    listener.on_status(ConnectionStatus::Connected);
    assert_eq!(h.controller.state(), ConnectionState::Connected);
    assert_eq!(h.recognizers.listening(), 1);

    // Later connected statuses change nothing.
    listener.on_status(ConnectionStatus::Connected);
    assert_eq!(h.recognizers.listening(), 1);
}

#[tokio::test]
async fn credential_failure_alerts_and_returns_to_disconnected() {
    let mut h = harness_with(
        FakeCredentials::failing(),
        FakeConnector::new(),
        None,
        test_config(),
    );

    assert_eq!(h.controller.start().await, StartOutcome::CredentialFailed);
    assert_eq!(h.controller.state(), ConnectionState::Disconnected);
    assert!(!h.controller.has_microphone());
    assert_eq!(h.connector.open_count(), 0);

    let events = drain_events(&mut h.events);
    assert_eq!(
        state_changes(&events),
        vec![ConnectionState::Connecting, ConnectionState::Disconnected]
    );
    assert_eq!(alerts(&events), vec![Labels::default().credential_error]);

    // The user may simply try again.
    assert_eq!(h.controller.start().await, StartOutcome::CredentialFailed);
    assert_eq!(h.credentials.calls(), 2);
}

#[tokio::test]
async fn connection_failure_alerts_and_releases_microphone() {
    let mut h = harness(FakeConnector::new().failing());

    assert_eq!(h.controller.start().await, StartOutcome::ConnectionFailed);
    assert_eq!(h.controller.state(), ConnectionState::Disconnected);
    assert!(!h.controller.has_microphone());
    assert_eq!(
        alerts(&drain_events(&mut h.events)),
        vec![Labels::default().connection_error]
    );
}

#[tokio::test]
async fn remote_error_ends_the_session() {
    let mut h = harness(FakeConnector::new());
    h.controller.start().await;
    drain_events(&mut h.events);

    h.connector
        .last_listener()
        .on_error("quota exceeded".to_owned());

    assert_eq!(h.controller.state(), ConnectionState::Disconnected);
    assert!(!h.controller.has_microphone());
    assert_eq!(h.recognizers.listening(), 0);
    let events = drain_events(&mut h.events);
    assert_eq!(alerts(&events), vec!["Agentenfehler: quota exceeded".to_owned()]);
    assert_eq!(state_changes(&events), vec![ConnectionState::Disconnected]);

    let connection = h.connector.last_connection();
    assert!(wait_until(Duration::from_secs(1), || connection.is_closed()).await);
}

#[tokio::test]
async fn remote_disconnect_ends_the_session() {
    let h = harness(FakeConnector::new());
    h.controller.start().await;

    h.connector
        .last_listener()
        .on_status(ConnectionStatus::Disconnected);

    assert_eq!(h.controller.state(), ConnectionState::Disconnected);
    assert!(!h.controller.has_microphone());
}

#[tokio::test]
async fn end_while_fetching_credential_supersedes_start() {
    let gate = Arc::new(Notify::new());
    let h = harness_with(
        FakeCredentials::gated("wss://agent.test/c", Arc::clone(&gate)),
        FakeConnector::new(),
        None,
        test_config(),
    );

    let controller = h.controller.clone();
    let start = tokio::spawn(async move { controller.start().await });
    let credentials = Arc::clone(&h.credentials);
    assert!(wait_until(Duration::from_secs(1), || credentials.calls() == 1).await);
    assert_eq!(h.controller.state(), ConnectionState::Connecting);

    h.controller.end().await;
    assert_eq!(h.controller.state(), ConnectionState::Disconnected);
    gate.notify_one();

    assert_eq!(start.await.unwrap(), StartOutcome::Superseded);
    assert_eq!(h.connector.open_count(), 0);
    assert_eq!(h.controller.state(), ConnectionState::Disconnected);
    assert!(!h.controller.has_microphone());
}

#[tokio::test]
async fn events_from_an_ended_session_are_ignored() {
    let h = harness(FakeConnector::new());
    h.controller.start().await;
    let old = h.connector.listener(0);
    h.controller.end().await;

    h.controller.start().await;
    assert_eq!(h.connector.open_count(), 2);

    old.on_message(InboundMessage::agent("late reply"));
    old.on_mode(AgentMode::Speaking);
    old.on_error("old failure".to_owned());
    old.on_status(ConnectionStatus::Disconnected);

    assert!(h.controller.transcript().is_empty());
    assert!(!h.controller.is_speaking());
    assert_eq!(h.controller.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn typed_question_and_streamed_answer() {
    let h = harness(FakeConnector::new());
    h.controller.start().await;
    assert_eq!(h.controller.state(), ConnectionState::Connected);

    let outcome = h.controller.send("What training programs exist?").await;
    assert_eq!(outcome, SendOutcome::Sent);
    assert_eq!(
        h.connector.last_connection().sent(),
        vec!["What training programs exist?".to_owned()]
    );
    assert_eq!(
        h.controller.transcript(),
        vec![Message::user("What training programs exist?")]
    );

    let listener = h.connector.last_listener();
    listener.on_message(InboundMessage::agent_fragment("We offer"));
    assert!(h.controller.is_pending());
    listener.on_message(InboundMessage::agent_fragment(" several apprenticeships."));
    assert_eq!(
        h.controller.transcript(),
        vec![
            Message::user("What training programs exist?"),
            Message::agent("We offer several apprenticeships."),
        ]
    );

    listener.on_message(InboundMessage::agent("We offer several apprenticeships."));
    assert_eq!(h.controller.transcript().len(), 2);
    assert!(!h.controller.is_pending());

    h.controller.end().await;
    assert_eq!(h.controller.state(), ConnectionState::Disconnected);
    assert!(!h.controller.has_microphone());
    // The transcript survives the end of the conversation.
    assert_eq!(h.controller.transcript().len(), 2);
}

#[tokio::test]
async fn messages_after_a_completed_reply_start_new_entries() {
    let h = harness(FakeConnector::new());
    h.controller.start().await;
    let listener = h.connector.last_listener();

    listener.on_message(InboundMessage::agent("Willkommen!"));
    listener.on_message(InboundMessage::agent_fragment("Hi"));

    assert_eq!(
        h.controller.transcript(),
        vec![Message::agent("Willkommen!"), Message::agent("Hi")]
    );
}

#[tokio::test]
async fn voice_turns_are_recorded_in_order() {
    let h = harness(FakeConnector::new());
    h.controller.start().await;
    let listener = h.connector.last_listener();

    listener.on_message(InboundMessage::user("Hallo Anna"));
    listener.on_message(InboundMessage::agent("Hallo! Wie kann ich helfen?"));
    listener.on_message(InboundMessage::user("Welche Ausbildungen gibt es?"));

    let sources: Vec<_> = h
        .controller
        .transcript()
        .into_iter()
        .map(|m| m.source)
        .collect();
    assert_eq!(
        sources,
        vec![
            voice_widget::MessageSource::User,
            voice_widget::MessageSource::Agent,
            voice_widget::MessageSource::User
        ]
    );
}

#[tokio::test]
async fn speaking_mode_drives_pending_and_analyzer() {
    let mut h = harness(FakeConnector::new());
    h.controller.start().await;
    let listener = h.connector.last_listener();
    listener.on_message(InboundMessage::user("Frage"));
    drain_events(&mut h.events);

    listener.on_mode(AgentMode::Speaking);
    assert!(h.controller.is_speaking());
    assert!(h.controller.is_pending());
    assert!(h.controller.is_analyzing());

    listener.on_mode(AgentMode::Listening);
    assert!(!h.controller.is_speaking());
    assert!(!h.controller.is_analyzing());
    assert!(h.controller.audio_level().abs() < f32::EPSILON);

    let events = drain_events(&mut h.events);
    assert!(events.contains(&WidgetEvent::SpeakingChanged { speaking: true }));
    assert!(events.contains(&WidgetEvent::PendingChanged { pending: true }));
    assert!(events.contains(&WidgetEvent::SpeakingChanged { speaking: false }));
}

#[tokio::test]
async fn speaking_after_the_reply_landed_is_not_pending() {
    let h = harness(FakeConnector::new());
    h.controller.start().await;
    let listener = h.connector.last_listener();
    listener.on_message(InboundMessage::agent("Schon da."));

    listener.on_mode(AgentMode::Speaking);
    assert!(h.controller.is_speaking());
    assert!(!h.controller.is_pending());
}

#[tokio::test]
async fn end_detaches_analyzer_while_speaking() {
    let h = harness(FakeConnector::new());
    h.controller.start().await;
    h.connector.last_listener().on_mode(AgentMode::Speaking);
    assert!(h.controller.is_analyzing());

    h.controller.end().await;
    assert!(!h.controller.is_speaking());
    assert!(!h.controller.is_analyzing());
    assert!(!h.controller.is_pending());
}

#[tokio::test]
async fn mute_toggles_capture_without_recreating_anything() {
    let mut h = harness(FakeConnector::new());
    h.controller.start().await;
    drain_events(&mut h.events);
    let connection = h.connector.last_connection();

    assert_eq!(h.controller.toggle_mute(), Some(true));
    assert!(h.controller.is_muted());
    assert!(connection.muted.load(Ordering::SeqCst));
    assert_eq!(h.recognizers.listening(), 0);
    assert_eq!(h.controller.state(), ConnectionState::Connected);

    assert_eq!(h.controller.toggle_mute(), Some(false));
    assert!(!h.controller.is_muted());
    assert!(!connection.muted.load(Ordering::SeqCst));
    assert_eq!(h.recognizers.listening(), 1);

    assert_eq!(h.connector.open_count(), 1);
    assert_eq!(h.recognizers.created.load(Ordering::SeqCst), 1);
    let events = drain_events(&mut h.events);
    assert_eq!(
        events,
        vec![
            WidgetEvent::MuteChanged { muted: true },
            WidgetEvent::MuteChanged { muted: false }
        ]
    );
}

#[tokio::test]
async fn mute_is_ignored_when_not_connected() {
    let h = harness(FakeConnector::new().silent());
    assert_eq!(h.controller.toggle_mute(), None);
    h.controller.start().await;
    assert_eq!(h.controller.state(), ConnectionState::Connecting);
    assert_eq!(h.controller.toggle_mute(), None);
    assert!(!h.controller.is_muted());
}

#[tokio::test]
async fn refused_unmute_stays_muted_and_alerts() {
    let mut h = harness(FakeConnector::new());
    h.controller.start().await;
    assert_eq!(h.controller.toggle_mute(), Some(true));
    drain_events(&mut h.events);

    h.recognizers.deny_start.store(true, Ordering::SeqCst);
    assert_eq!(h.controller.toggle_mute(), Some(true));
    assert!(h.controller.is_muted());
    assert_eq!(
        alerts(&drain_events(&mut h.events)),
        vec![Labels::default().microphone_permission_denied]
    );
}

#[tokio::test]
async fn microphone_audio_flows_only_while_capturing() {
    let h = harness(FakeConnector::new());
    assert!(!h.controller.push_microphone_audio(&[0.1; 160]));

    h.controller.start().await;
    let connection = h.connector.last_connection();
    assert!(h.controller.push_microphone_audio(&[0.1; 160]));
    assert_eq!(connection.audio_chunks.load(Ordering::SeqCst), 1);

    h.controller.toggle_mute();
    assert!(!h.controller.push_microphone_audio(&[0.1; 160]));
    assert_eq!(connection.audio_chunks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn recognition_hints_never_touch_the_transcript() {
    let mut h = harness(FakeConnector::new());
    h.controller.start().await;
    drain_events(&mut h.events);

    h.recognizers.emit_hint("welche ausbildung", false);

    assert!(h.controller.transcript().is_empty());
    assert_eq!(
        drain_events(&mut h.events),
        vec![WidgetEvent::RecognitionHint {
            text: "welche ausbildung".to_owned(),
            is_final: false
        }]
    );
}

#[tokio::test]
async fn blank_or_early_text_is_dropped() {
    let h = harness(FakeConnector::new().silent());

    assert_eq!(h.controller.send("").await, SendOutcome::Ignored);
    assert_eq!(h.controller.send("   ").await, SendOutcome::Ignored);
    assert_eq!(h.controller.send("Hello").await, SendOutcome::Ignored);

    h.controller.start().await;
    assert_eq!(h.controller.state(), ConnectionState::Connecting);
    assert_eq!(h.controller.send("Hello").await, SendOutcome::Ignored);

    h.connector
        .last_listener()
        .on_status(ConnectionStatus::Connected);
    assert_eq!(h.controller.send("  ").await, SendOutcome::Ignored);
    assert!(h.controller.transcript().is_empty());
}

#[tokio::test]
async fn failed_realtime_send_keeps_the_user_message() {
    let mut h = harness(FakeConnector::new().failing_send());
    h.controller.start().await;
    drain_events(&mut h.events);

    assert_eq!(h.controller.send("Hallo").await, SendOutcome::SendFailed);
    assert_eq!(h.controller.transcript(), vec![Message::user("Hallo")]);
    assert_eq!(h.controller.state(), ConnectionState::Connected);
    assert_eq!(
        alerts(&drain_events(&mut h.events)),
        vec![Labels::default().send_failed]
    );
}

#[tokio::test]
async fn send_on_a_lost_connection_ends_the_session() {
    let mut h = harness(FakeConnector::new().losing_connection());
    h.controller.start().await;
    drain_events(&mut h.events);

    assert_eq!(h.controller.send("Hallo").await, SendOutcome::SendFailed);
    assert_eq!(h.controller.transcript(), vec![Message::user("Hallo")]);
    assert_eq!(h.controller.state(), ConnectionState::Disconnected);
    assert!(!h.controller.has_microphone());
    assert_eq!(
        alerts(&drain_events(&mut h.events)),
        vec![Labels::default().send_failed]
    );
    let connection = h.connector.last_connection();
    assert!(wait_until(Duration::from_secs(1), || connection.is_closed()).await);
}

#[tokio::test]
async fn text_without_any_path_records_an_error_reply() {
    let h = harness(FakeConnector::new().text_only(None));
    h.controller.start().await;

    assert_eq!(h.controller.send("Hi").await, SendOutcome::Unavailable);
    assert_eq!(
        h.controller.transcript(),
        vec![
            Message::user("Hi"),
            Message::agent(Labels::default().fallback_unavailable)
        ]
    );
    assert!(!h.controller.is_pending());
}

#[tokio::test]
async fn transcript_export_keeps_order_and_labels() {
    let h = harness(FakeConnector::new());
    h.controller.start().await;
    h.controller.send("Was kostet das?").await;
    h.connector
        .last_listener()
        .on_message(InboundMessage::agent("Die Ausbildung ist kostenlos."));
    h.controller.end().await;

    let dir = tempfile::tempdir().unwrap();
    let path = h
        .controller
        .export_transcript(ExportFormat::Text, dir.path())
        .unwrap();
    let content = std::fs::read_to_string(path).unwrap();
    assert_eq!(
        content.lines().collect::<Vec<_>>(),
        vec!["Du: Was kostet das?", "Anna: Die Ausbildung ist kostenlos."]
    );

    let json: serde_json::Value =
        serde_json::from_str(&h.controller.render_transcript(ExportFormat::Json).unwrap())
            .unwrap();
    assert_eq!(json[0]["label"], "Du");
    assert_eq!(json[1]["source"], "agent");
    assert_eq!(json[1]["text"], "Die Ausbildung ist kostenlos.");
}
