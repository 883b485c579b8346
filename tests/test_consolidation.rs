// tests/test_consolidation.rs


use kgchat::memory::{ConsolidationState, ConsolidationWorkflow, Relationship};
use kgchat::session::log::TurnLog;
use kgchat::session::types::Role;

use test_helpers::MockBackend;

fn four_turn_log() -> TurnLog {
    let mut log = TurnLog::new();
    log.append(Role::User, "What causes defect X?").unwrap();
    log.append(Role::Assistant, "Moisture ingress.").unwrap();
    log.append(Role::User, "How do we fix it?").unwrap();
    log.append(Role::Assistant, "Bake the panels first.").unwrap();
    log
}

#[tokio::test]
async fn test_happy_path_to_extension() {
    let backend = MockBackend::new();
    let mut wf = ConsolidationWorkflow::new(backend.clone());
    let log = four_turn_log();

    wf.begin(&log).unwrap();
    assert_eq!(wf.state(), ConsolidationState::Selecting);

    wf.toggle(0, &log).unwrap();
    wf.toggle(2, &log).unwrap();
    assert_eq!(wf.selected_count(), 2);

    let candidate = wf.submit(&log).await.unwrap();
    assert_eq!(candidate.memory_id, "mem-1");
    assert_eq!(candidate.summary, "summary of 2 turns");
    // selection order is the log order
    assert_eq!(candidate.selected_turns[0].content, "What causes defect X?");
    assert_eq!(candidate.selected_turns[1].content, "How do we fix it?");
    assert_eq!(wf.state(), ConsolidationState::Reviewing);

    let (relationship, message) = wf.commit().await.unwrap();
    assert_eq!(relationship, Relationship::Extension);
    assert!(message.contains("mem-1"));
    assert_eq!(wf.state(), ConsolidationState::Done);
    assert_eq!(
        wf.candidate().unwrap().relationship,
        Some(Relationship::Extension)
    );
}

#[tokio::test]
async fn test_confirm_with_nothing_selected_is_rejected() {
    let backend = MockBackend::new();
    let mut wf = ConsolidationWorkflow::new(backend.clone());
    let log = four_turn_log();

    wf.begin(&log).unwrap();
    let err = wf.submit(&log).await.unwrap_err();
    assert!(err.to_string().contains("empty selection"));
    // still selecting; the user can keep going
    assert_eq!(wf.state(), ConsolidationState::Selecting);
    wf.toggle(1, &log).unwrap();
    assert!(wf.submit(&log).await.is_ok());
}

#[tokio::test]
async fn test_summarize_failure_discards_selection() {
    let backend = MockBackend::new();
    backend.fail_summarize(true);
    let mut wf = ConsolidationWorkflow::new(backend.clone());
    let log = four_turn_log();

    wf.begin(&log).unwrap();
    wf.toggle(0, &log).unwrap();
    assert!(wf.submit(&log).await.is_err());

    // no partial retry state is retained
    assert_eq!(wf.state(), ConsolidationState::Inactive);
    assert_eq!(wf.selected_count(), 0);
    assert!(wf.candidate().is_none());
}

#[tokio::test]
async fn test_commit_failure_returns_to_review() {
    let backend = MockBackend::new();
    let mut wf = ConsolidationWorkflow::new(backend.clone());
    let log = four_turn_log();

    wf.begin(&log).unwrap();
    wf.toggle(0, &log).unwrap();
    wf.submit(&log).await.unwrap();

    backend.fail_commit(true);
    assert!(wf.commit().await.is_err());
    assert_eq!(wf.state(), ConsolidationState::Reviewing);
    assert!(wf.candidate().is_some());

    // the commit can be retried once the store recovers
    backend.fail_commit(false);
    let (relationship, _) = wf.commit().await.unwrap();
    assert_eq!(relationship, Relationship::Extension);
}

#[tokio::test]
async fn test_commit_requires_memory_id() {
    let backend = MockBackend::new();
    backend.summarize_empty_id(true);
    let mut wf = ConsolidationWorkflow::new(backend.clone());
    let log = four_turn_log();

    wf.begin(&log).unwrap();
    wf.toggle(0, &log).unwrap();
    wf.submit(&log).await.unwrap();
    assert_eq!(wf.state(), ConsolidationState::Reviewing);

    let err = wf.commit().await.unwrap_err();
    assert!(err.to_string().contains("missing memory id"));
}

#[tokio::test]
async fn test_cancel_from_review_discards_candidate() {
    let backend = MockBackend::new();
    let mut wf = ConsolidationWorkflow::new(backend.clone());
    let log = four_turn_log();

    wf.begin(&log).unwrap();
    wf.toggle(0, &log).unwrap();
    wf.submit(&log).await.unwrap();

    wf.cancel().unwrap();
    assert_eq!(wf.state(), ConsolidationState::Cancelled);
    assert!(wf.candidate().is_none());

    // toggling no longer mutates workflow state
    assert!(wf.toggle(0, &log).is_err());
    assert_eq!(wf.selected_count(), 0);
}

#[tokio::test]
async fn test_second_candidate_rejected_while_one_in_flight() {
    let backend = MockBackend::new();
    let mut wf = ConsolidationWorkflow::new(backend.clone());
    let log = four_turn_log();

    wf.begin(&log).unwrap();
    wf.toggle(0, &log).unwrap();
    wf.submit(&log).await.unwrap();

    let err = wf.begin(&log).unwrap_err();
    assert!(err.to_string().contains("already in flight"));

    // but a fresh candidate is allowed after the old one completes
    wf.commit().await.unwrap();
    wf.begin(&log).unwrap();
    assert_eq!(wf.state(), ConsolidationState::Selecting);
}
