mod support;

use serde_json::json;
use skein_domain::{ApprovalDecision, ConversationItem, MessageRole, WorkspaceId};
use skein_engine::{Engine, EngineConfig, EngineHandle, EngineServices};
use std::sync::Arc;
use support::{FakeBackend, envelope, eventually, key, thread_started, turn_started, workspace};

fn ws() -> WorkspaceId {
    WorkspaceId::new("ws")
}

async fn engine_with_thread(backend: Arc<FakeBackend>, thread_id: &str) -> EngineHandle {
    let (engine, _) = Engine::start(EngineConfig::default(), EngineServices::new(backend));
    engine.add_workspace(workspace("ws", "/repo")).await.unwrap();
    engine
        .send_event(thread_started("ws", thread_id))
        .await
        .unwrap();
    engine
}

fn turn_error(thread_id: &str, message: &str, will_retry: bool) -> skein_api::EventEnvelope {
    envelope(
        "turn/error",
        json!({
            "workspaceId": "ws",
            "threadId": thread_id,
            "error": { "message": message },
            "willRetry": will_retry
        }),
    )
}

#[tokio::test]
async fn stop_before_turn_start_fires_on_the_reported_turn() {
    let backend = Arc::new(FakeBackend::default());
    let engine = engine_with_thread(backend.clone(), "t1").await;

    engine.interrupt(ws(), key("t1")).await.unwrap();
    let snapshot = engine.snapshot().await.unwrap();
    assert_eq!(snapshot.workspaces[0].pending_interrupts, vec![key("codex:t1")]);
    assert!(backend.interrupts.lock().unwrap().is_empty());

    engine
        .send_event(turn_started("ws", "t1", "turn-9"))
        .await
        .unwrap();

    let snapshot = engine.snapshot().await.unwrap();
    assert!(snapshot.workspaces[0].pending_interrupts.is_empty());
    let thread = engine.thread(key("t1")).await.unwrap().unwrap();
    assert!(!thread.processing);

    eventually(|| !backend.interrupts.lock().unwrap().is_empty()).await;
    assert_eq!(
        backend.interrupts.lock().unwrap().as_slice(),
        [("codex:t1".to_owned(), "turn-9".to_owned())]
    );
}

#[tokio::test]
async fn stop_survives_a_late_completion_of_the_previous_turn() {
    let backend = Arc::new(FakeBackend::default());
    let engine = engine_with_thread(backend.clone(), "t1").await;

    engine.interrupt(ws(), key("t1")).await.unwrap();
    engine
        .send_event(envelope(
            "turn/completed",
            json!({ "workspaceId": "ws", "threadId": "t1", "turn": { "id": "turn-8" } }),
        ))
        .await
        .unwrap();
    let snapshot = engine.snapshot().await.unwrap();
    assert_eq!(snapshot.workspaces[0].pending_interrupts, vec![key("codex:t1")]);

    engine
        .send_event(turn_started("ws", "t1", "turn-9"))
        .await
        .unwrap();

    let thread = engine.thread(key("t1")).await.unwrap().unwrap();
    assert!(!thread.processing);
    assert_eq!(thread.active_turn_id, None);
    eventually(|| !backend.interrupts.lock().unwrap().is_empty()).await;
    assert_eq!(
        backend.interrupts.lock().unwrap().as_slice(),
        [("codex:t1".to_owned(), "turn-9".to_owned())]
    );
}

#[tokio::test]
async fn stop_during_a_turn_interrupts_it_and_silences_the_abort_error() {
    let backend = Arc::new(FakeBackend::default());
    let engine = engine_with_thread(backend.clone(), "t1").await;
    engine
        .send_event(turn_started("ws", "t1", "turn-3"))
        .await
        .unwrap();
    assert!(engine.thread(key("t1")).await.unwrap().unwrap().processing);

    engine.interrupt(ws(), key("t1")).await.unwrap();
    eventually(|| !backend.interrupts.lock().unwrap().is_empty()).await;
    assert_eq!(backend.interrupts.lock().unwrap()[0].1, "turn-3");

    engine
        .send_event(turn_error("t1", "aborted", false))
        .await
        .unwrap();
    let thread = engine.thread(key("t1")).await.unwrap().unwrap();
    assert!(!thread.processing);
    assert_eq!(thread.active_turn_id, None);
    assert!(thread.items.is_empty());
}

#[tokio::test]
async fn interrupt_of_unknown_thread_fails() {
    let backend = Arc::new(FakeBackend::default());
    let (engine, _) = Engine::start(EngineConfig::default(), EngineServices::new(backend));
    engine.add_workspace(workspace("ws", "/repo")).await.unwrap();

    let err = engine.interrupt(ws(), key("nope")).await.unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn retried_turn_errors_change_nothing() {
    let backend = Arc::new(FakeBackend::default());
    let engine = engine_with_thread(backend, "t1").await;
    engine
        .send_event(turn_started("ws", "t1", "turn-1"))
        .await
        .unwrap();
    let before = engine.snapshot().await.unwrap();

    engine
        .send_event(turn_error("t1", "rate limited", true))
        .await
        .unwrap();

    let after = engine.snapshot().await.unwrap();
    assert_eq!(after.rev, before.rev);
    let thread = engine.thread(key("t1")).await.unwrap().unwrap();
    assert!(thread.processing);
    assert_eq!(thread.active_turn_id.as_deref(), Some("turn-1"));
}

#[tokio::test]
async fn terminal_turn_error_ends_the_turn_with_a_message() {
    let backend = Arc::new(FakeBackend::default());
    let engine = engine_with_thread(backend, "t1").await;
    engine
        .send_event(turn_started("ws", "t1", "turn-1"))
        .await
        .unwrap();
    engine
        .send_event(envelope(
            "item/started",
            json!({
                "workspaceId": "ws",
                "threadId": "t1",
                "item": { "type": "commandExecution", "id": "c1", "command": "cargo test" }
            }),
        ))
        .await
        .unwrap();

    engine
        .send_event(turn_error("t1", "boom", false))
        .await
        .unwrap();

    let thread = engine.thread(key("t1")).await.unwrap().unwrap();
    assert!(!thread.processing);
    assert!(thread.items.iter().all(|item| !item.is_in_flight_tool()));
    let Some(ConversationItem::Message { role, text, .. }) = thread.items.last() else {
        panic!("expected error message, got {:?}", thread.items.last());
    };
    assert_eq!(*role, MessageRole::Assistant);
    assert_eq!(text, "Turn failed: boom");
}

#[tokio::test]
async fn remembered_approval_answers_matching_requests() {
    let backend = Arc::new(FakeBackend::default());
    let engine = engine_with_thread(backend.clone(), "t1").await;
    let approval = |id: u64, command: &str| {
        envelope(
            "item/commandExecution/requestApproval",
            json!({
                "workspaceId": "ws",
                "id": id,
                "params": { "threadId": "t1", "command": command }
            }),
        )
    };

    engine.send_event(approval(1, "cargo test")).await.unwrap();
    let snapshot = engine.snapshot().await.unwrap();
    let pending = &snapshot.workspaces[0].approvals;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].command, ["cargo", "test"]);
    assert_eq!(pending[0].thread_key, Some(key("codex:t1")));

    engine
        .resolve_approval(ws(), "1".to_owned(), ApprovalDecision::Accept, true)
        .await
        .unwrap();
    engine
        .send_event(approval(2, "cargo test -p skein_domain"))
        .await
        .unwrap();

    let snapshot = engine.snapshot().await.unwrap();
    assert!(snapshot.workspaces[0].approvals.is_empty());
    eventually(|| backend.approvals.lock().unwrap().len() == 2).await;
    let mut answered = backend.approvals.lock().unwrap().clone();
    answered.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        answered,
        vec![
            ("1".to_owned(), ApprovalDecision::Accept),
            ("2".to_owned(), ApprovalDecision::Accept),
        ]
    );
}

#[tokio::test]
async fn user_input_answers_reach_the_backend() {
    let backend = Arc::new(FakeBackend::default());
    let engine = engine_with_thread(backend.clone(), "t1").await;
    engine
        .send_event(envelope(
            "item/tool/requestUserInput",
            json!({
                "workspaceId": "ws",
                "id": "q-1",
                "params": {
                    "threadId": "t1",
                    "questions": [{ "id": "env", "question": "Which env?", "options": [{ "label": "prod" }] }]
                }
            }),
        ))
        .await
        .unwrap();
    let snapshot = engine.snapshot().await.unwrap();
    assert_eq!(snapshot.workspaces[0].user_inputs.len(), 1);
    assert_eq!(snapshot.workspaces[0].user_inputs[0].questions[0].options[0].label, "prod");

    let answers = json!({ "env": ["prod"] });
    engine
        .resolve_user_input(ws(), "q-1".to_owned(), answers.clone())
        .await
        .unwrap();

    eventually(|| !backend.user_inputs.lock().unwrap().is_empty()).await;
    assert_eq!(
        backend.user_inputs.lock().unwrap().as_slice(),
        [("q-1".to_owned(), answers)]
    );
    let snapshot = engine.snapshot().await.unwrap();
    assert!(snapshot.workspaces[0].user_inputs.is_empty());
}
