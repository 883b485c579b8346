// tests/test_stream_consumer.rs


use std::time::Duration;

use kgchat::session::log::TurnLog;
use kgchat::session::types::Role;
use kgchat::stream::{StreamConsumer, StreamPhase, TIMEOUT_MESSAGE};

use test_helpers::{AnswerScript, MockBackend, RecordingSurface};

fn log_with_question(question: &str) -> TurnLog {
    let mut log = TurnLog::new();
    log.append(Role::User, question).unwrap();
    log
}

#[tokio::test]
async fn test_normal_exchange() {
    let backend = MockBackend::new();
    backend.script_answer(AnswerScript::Chunks(vec![
        "Defect X".into(),
        " is caused by".into(),
        " moisture.".into(),
    ]));
    let surface = RecordingSurface::new();
    let mut log = log_with_question("What causes defect X?");

    let outcome = StreamConsumer::new()
        .run(&*backend, "What causes defect X?", &mut log, &*surface)
        .await
        .unwrap();

    assert_eq!(outcome.phase, StreamPhase::Finalized);
    assert_eq!(outcome.turn_index, Some(1));
    assert_eq!(log.len(), 2);
    assert_eq!(log.get(0).unwrap().role, Role::User);
    assert_eq!(log.get(1).unwrap().role, Role::Assistant);
    assert_eq!(log.get(1).unwrap().content, "Defect X is caused by moisture.");
    assert!(!log.get(1).unwrap().is_streaming());

    // the request carried the full history (the user turn)
    let history = backend.last_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "What causes defect X?");

    // chunks were rendered as they arrived
    assert!(surface.has_event("chunk:Defect X"));
    assert!(surface.has_event("stream_end"));
}

#[tokio::test]
async fn test_empty_stream_discards_turn() {
    let backend = MockBackend::new();
    backend.script_answer(AnswerScript::Chunks(vec![]));
    let surface = RecordingSurface::new();
    let mut log = log_with_question("anything?");

    let outcome = StreamConsumer::new()
        .run(&*backend, "anything?", &mut log, &*surface)
        .await
        .unwrap();

    assert_eq!(outcome.phase, StreamPhase::Finalized);
    assert_eq!(outcome.turn_index, None);
    // no assistant turn survives
    assert_eq!(log.len(), 1);
    assert!(log.streaming_index().is_none());
}

#[tokio::test]
async fn test_timeout_keeps_partial_content() {
    let backend = MockBackend::new();
    backend.script_answer(AnswerScript::ChunksThenStall(vec!["Partial ans".into()]));
    let surface = RecordingSurface::new();
    let mut log = log_with_question("slow?");

    let consumer =
        StreamConsumer::with_windows(Duration::from_millis(50), Duration::from_millis(250));
    let outcome = consumer.run(&*backend, "slow?", &mut log, &*surface).await.unwrap();

    assert_eq!(outcome.phase, StreamPhase::TimedOut);
    assert_eq!(outcome.turn_index, Some(1));
    // partial content is kept, not discarded, not replaced
    assert_eq!(log.get(1).unwrap().content, "Partial ans");
    assert!(!log.get(1).unwrap().is_streaming());
    // the idle window passed before the ceiling, so a warning was shown
    assert!(surface.has_event("muted:still waiting"));
}

#[tokio::test]
async fn test_timeout_with_no_data_writes_timeout_message() {
    let backend = MockBackend::new();
    backend.script_answer(AnswerScript::ChunksThenStall(vec![]));
    let surface = RecordingSurface::new();
    let mut log = log_with_question("dead?");

    let consumer =
        StreamConsumer::with_windows(Duration::from_millis(50), Duration::from_millis(150));
    let outcome = consumer.run(&*backend, "dead?", &mut log, &*surface).await.unwrap();

    assert_eq!(outcome.phase, StreamPhase::TimedOut);
    assert_eq!(log.get(1).unwrap().content, TIMEOUT_MESSAGE);
}

#[tokio::test]
async fn test_mid_stream_drop_keeps_partial() {
    let backend = MockBackend::new();
    backend.script_answer(AnswerScript::ChunksThenError(
        vec!["Partial".into()],
        "connection reset".into(),
    ));
    let surface = RecordingSurface::new();
    let mut log = log_with_question("drop?");

    let outcome = StreamConsumer::new()
        .run(&*backend, "drop?", &mut log, &*surface)
        .await
        .unwrap();

    assert_eq!(outcome.phase, StreamPhase::Finalized);
    assert_eq!(log.get(1).unwrap().content, "Partial");
    assert_eq!(outcome.error.as_deref(), Some("connection reset"));
}

#[tokio::test]
async fn test_mid_stream_drop_with_no_data_fails() {
    let backend = MockBackend::new();
    backend.script_answer(AnswerScript::ChunksThenError(vec![], "reset".into()));
    let surface = RecordingSurface::new();
    let mut log = log_with_question("drop?");

    let outcome = StreamConsumer::new()
        .run(&*backend, "drop?", &mut log, &*surface)
        .await
        .unwrap();

    assert_eq!(outcome.phase, StreamPhase::Failed);
    assert_eq!(outcome.turn_index, None);
    assert_eq!(log.len(), 1);
}

#[tokio::test]
async fn test_rejected_request_fails_with_message() {
    let backend = MockBackend::new();
    backend.script_answer(AnswerScript::Fail(503, "graph backend down".into()));
    let surface = RecordingSurface::new();
    let mut log = log_with_question("up?");

    let outcome = StreamConsumer::new()
        .run(&*backend, "up?", &mut log, &*surface)
        .await
        .unwrap();

    assert_eq!(outcome.phase, StreamPhase::Failed);
    assert_eq!(outcome.turn_index, None);
    assert!(outcome.error.unwrap().contains("graph backend down"));
    // nothing was opened in the log
    assert_eq!(log.len(), 1);
}

#[tokio::test]
async fn test_side_payloads_are_handed_off_once() {
    let backend = MockBackend::new();
    backend.script_answer(AnswerScript::Chunks(vec!["ok".into()]));
    backend.set_side_payloads(
        Some("defect X relates to moisture"),
        Some("MATCH (d:Defect)-[:CAUSED_BY]->(c) RETURN d, c"),
    );
    let surface = RecordingSurface::new();
    let mut log = log_with_question("q");

    StreamConsumer::new()
        .run(&*backend, "q", &mut log, &*surface)
        .await
        .unwrap();

    let events = surface.events();
    assert_eq!(
        events
            .iter()
            .filter(|e| e.starts_with("graph:MATCH"))
            .count(),
        1
    );
    assert_eq!(
        events
            .iter()
            .filter(|e| e.starts_with("context:defect X"))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_missing_side_payloads_are_fine() {
    let backend = MockBackend::new();
    backend.script_answer(AnswerScript::Chunks(vec!["ok".into()]));
    let surface = RecordingSurface::new();
    let mut log = log_with_question("q");

    let outcome = StreamConsumer::new()
        .run(&*backend, "q", &mut log, &*surface)
        .await
        .unwrap();

    assert_eq!(outcome.phase, StreamPhase::Finalized);
    assert!(!surface.has_event("graph:"));
    assert!(!surface.has_event("context:"));
}
