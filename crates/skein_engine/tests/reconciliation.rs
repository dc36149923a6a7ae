mod support;

use serde_json::json;
use skein_domain::{ConversationItem, EngineKind, WorkspaceId};
use skein_engine::{
    Engine, EngineConfig, EngineServices, MemoryDebugSink, MemoryTitleStore, RequestOutcome,
    ResumeOptions, TitleStore as _,
};
use std::sync::Arc;
use support::{
    FakeBackend, ScriptedResume, agent_message, envelope, eventually, key, resume_response,
    thread_started, turn_started, workspace,
};
use tokio::sync::Notify;

fn ids(items: &[ConversationItem]) -> Vec<&str> {
    items.iter().map(ConversationItem::id).collect()
}

fn ws() -> WorkspaceId {
    WorkspaceId::new("ws")
}

#[tokio::test]
async fn resume_merges_server_history_with_streamed_items() {
    let backend = Arc::new(FakeBackend::default());
    backend.push_resume(
        "codex:abc",
        ScriptedResume {
            response: Ok(resume_response(
                "abc",
                json!([
                    { "type": "agentMessage", "id": "m1", "text": "one" },
                    { "type": "agentMessage", "id": "m2", "text": "two" }
                ]),
            )),
            gate: None,
        },
    );
    let (engine, _) = Engine::start(EngineConfig::default(), EngineServices::new(backend.clone()));
    engine.add_workspace(workspace("ws", "/repo")).await.unwrap();
    engine
        .send_event(agent_message("ws", "abc", "m1", "one"))
        .await
        .unwrap();

    let outcome = engine
        .resume_thread(ws(), key("codex:abc"), ResumeOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome, RequestOutcome::Applied(key("codex:abc")));

    let thread = engine.thread(key("abc")).await.unwrap().unwrap();
    assert_eq!(ids(&thread.items), ["m1", "m2"]);

    // Already loaded in this session.
    let again = engine
        .resume_thread(ws(), key("codex:abc"), ResumeOptions::default())
        .await
        .unwrap();
    assert_eq!(again, RequestOutcome::Skipped);
    assert_eq!(backend.resume_call_count(), 1);
}

#[tokio::test]
async fn placeholder_threads_are_never_resumed() {
    let backend = Arc::new(FakeBackend::default());
    backend.push_start_id("claude-pending-17");
    let (engine, _) = Engine::start(EngineConfig::default(), EngineServices::new(backend.clone()));
    engine.add_workspace(workspace("ws", "/repo")).await.unwrap();

    let started = engine.start_thread(ws(), EngineKind::Claude).await.unwrap();
    let outcome = engine
        .resume_thread(
            ws(),
            started,
            ResumeOptions {
                force: true,
                replace_local: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome, RequestOutcome::Skipped);
    assert_eq!(backend.resume_call_count(), 0);
}

#[tokio::test]
async fn session_id_update_promotes_placeholder_and_drops_stale_events() {
    let backend = Arc::new(FakeBackend::default());
    backend.push_start_id("claude-pending-17");
    let titles = Arc::new(MemoryTitleStore::default());
    let services = EngineServices::new(backend.clone()).with_title_store(titles.clone());
    let (engine, _) = Engine::start(EngineConfig::default(), services);
    engine.add_workspace(workspace("ws", "/repo")).await.unwrap();

    let started = engine.start_thread(ws(), EngineKind::Claude).await.unwrap();
    assert_eq!(started.as_str(), "claude-pending-17");

    engine
        .set_custom_name(ws(), started.clone(), Some("Fix CI".to_owned()))
        .await
        .unwrap();
    engine
        .send_event(agent_message("ws", "claude-pending-17", "m1", "working on it"))
        .await
        .unwrap();
    engine
        .send_event(envelope(
            "thread/sessionIdUpdated",
            json!({ "workspaceId": "ws", "threadId": "claude-pending-17", "sessionId": "42" }),
        ))
        .await
        .unwrap();
    engine
        .send_event(turn_started("ws", "claude-pending-17", "turn-1"))
        .await
        .unwrap();

    let thread = engine.thread(key("claude:42")).await.unwrap().unwrap();
    assert_eq!(thread.key.as_str(), "claude:42");
    assert_eq!(ids(&thread.items), ["m1"]);
    assert!(!thread.processing);
    assert_eq!(thread.active_turn_id, None);

    // The old key still finds the thread through the rename record.
    let via_alias = engine.thread(started).await.unwrap().unwrap();
    assert_eq!(via_alias.key.as_str(), "claude:42");

    let snapshot = engine.snapshot().await.unwrap();
    let workspace = &snapshot.workspaces[0];
    assert_eq!(
        workspace.active_thread.as_ref().map(|key| key.as_str()),
        Some("claude:42")
    );
    assert!(workspace.threads.iter().all(|row| !row.key.is_placeholder()));
    let row = workspace
        .threads
        .iter()
        .find(|row| row.key.as_str() == "claude:42")
        .unwrap();
    assert_eq!(row.name, "Fix CI");

    let stored = titles.load(&ws()).unwrap();
    assert_eq!(stored.get(&key("claude:42")).map(String::as_str), Some("Fix CI"));
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn background_hide_follows_a_promoted_placeholder() {
    let backend = Arc::new(FakeBackend::default());
    backend.push_start_id("claude-pending-17");
    let (engine, _) = Engine::start(EngineConfig::default(), EngineServices::new(backend));
    engine.add_workspace(workspace("ws", "/repo")).await.unwrap();
    engine.start_thread(ws(), EngineKind::Claude).await.unwrap();
    engine
        .send_event(envelope(
            "thread/sessionIdUpdated",
            json!({ "workspaceId": "ws", "threadId": "claude-pending-17", "sessionId": "42" }),
        ))
        .await
        .unwrap();
    let snapshot = engine.snapshot().await.unwrap();
    assert!(
        snapshot.workspaces[0]
            .threads
            .iter()
            .any(|row| row.key.as_str() == "claude:42")
    );

    engine
        .send_event(envelope(
            "thread/backgroundAction",
            json!({ "workspaceId": "ws", "threadId": "claude-pending-17", "action": "hide" }),
        ))
        .await
        .unwrap();

    let snapshot = engine.snapshot().await.unwrap();
    assert!(
        snapshot.workspaces[0]
            .threads
            .iter()
            .all(|row| row.key.as_str() != "claude:42")
    );
}

#[tokio::test]
async fn failed_start_hides_the_placeholder() {
    let backend = Arc::new(FakeBackend::default());
    let (engine, _) = Engine::start(EngineConfig::default(), EngineServices::new(backend));
    engine.add_workspace(workspace("ws", "/repo")).await.unwrap();

    let err = engine
        .start_thread(ws(), EngineKind::Gemini)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("failed to start thread"));

    let snapshot = engine.snapshot().await.unwrap();
    assert!(snapshot.workspaces[0].threads.is_empty());
}

#[tokio::test]
async fn newer_resume_supersedes_the_one_in_flight() {
    let backend = Arc::new(FakeBackend::default());
    let gate = Arc::new(Notify::new());
    backend.push_resume(
        "codex:abc",
        ScriptedResume {
            response: Ok(resume_response(
                "abc",
                json!([{ "type": "agentMessage", "id": "old", "text": "stale" }]),
            )),
            gate: Some(gate.clone()),
        },
    );
    backend.push_resume(
        "codex:abc",
        ScriptedResume {
            response: Ok(resume_response(
                "abc",
                json!([{ "type": "agentMessage", "id": "new", "text": "fresh" }]),
            )),
            gate: None,
        },
    );
    let (engine, _) = Engine::start(EngineConfig::default(), EngineServices::new(backend.clone()));
    engine.add_workspace(workspace("ws", "/repo")).await.unwrap();
    engine.send_event(thread_started("ws", "abc")).await.unwrap();

    let options = ResumeOptions {
        force: true,
        replace_local: true,
    };
    let first = tokio::spawn({
        let engine = engine.clone();
        async move { engine.resume_thread(ws(), key("abc"), options).await }
    });
    eventually(|| backend.resume_call_count() == 1).await;

    let second = engine.resume_thread(ws(), key("abc"), options).await.unwrap();
    assert_eq!(second, RequestOutcome::Applied(key("codex:abc")));

    gate.notify_one();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first, RequestOutcome::Superseded);

    let thread = engine.thread(key("abc")).await.unwrap().unwrap();
    assert_eq!(ids(&thread.items), ["new"]);
}

#[tokio::test]
async fn items_streamed_during_a_resume_follow_the_server_history() {
    let backend = Arc::new(FakeBackend::default());
    let gate = Arc::new(Notify::new());
    backend.push_resume(
        "codex:abc",
        ScriptedResume {
            response: Ok(resume_response(
                "abc",
                json!([
                    { "type": "agentMessage", "id": "m1", "text": "one" },
                    { "type": "agentMessage", "id": "m2", "text": "two" }
                ]),
            )),
            gate: Some(gate.clone()),
        },
    );
    let (engine, _) = Engine::start(EngineConfig::default(), EngineServices::new(backend.clone()));
    engine.add_workspace(workspace("ws", "/repo")).await.unwrap();
    engine
        .send_event(agent_message("ws", "abc", "m1", "one"))
        .await
        .unwrap();

    let resume = tokio::spawn({
        let engine = engine.clone();
        async move {
            engine
                .resume_thread(ws(), key("codex:abc"), ResumeOptions::default())
                .await
        }
    });
    eventually(|| backend.resume_call_count() == 1).await;

    engine
        .send_event(agent_message("ws", "abc", "live", "streamed meanwhile"))
        .await
        .unwrap();
    gate.notify_one();

    let outcome = resume.await.unwrap().unwrap();
    assert_eq!(outcome, RequestOutcome::Applied(key("codex:abc")));
    let thread = engine.thread(key("abc")).await.unwrap().unwrap();
    assert_eq!(ids(&thread.items), ["m1", "m2", "live"]);
}

#[tokio::test]
async fn fork_activates_and_loads_the_new_thread() {
    let backend = Arc::new(FakeBackend::default());
    backend.push_fork_id("fork-1");
    backend.push_resume(
        "codex:fork-1",
        ScriptedResume {
            response: Ok(resume_response(
                "fork-1",
                json!([{ "type": "agentMessage", "id": "m1", "text": "copied" }]),
            )),
            gate: None,
        },
    );
    let (engine, _) = Engine::start(EngineConfig::default(), EngineServices::new(backend.clone()));
    engine.add_workspace(workspace("ws", "/repo")).await.unwrap();
    engine.send_event(thread_started("ws", "abc")).await.unwrap();

    let forked = engine.fork_thread(ws(), key("abc")).await.unwrap();
    assert_eq!(forked.as_str(), "codex:fork-1");

    eventually(|| backend.resume_call_count() == 1).await;
    let mut items = Vec::new();
    for _ in 0..200 {
        let thread = engine.thread(forked.clone()).await.unwrap().unwrap();
        if !thread.items.is_empty() {
            items = thread.items;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(ids(&items), ["m1"]);

    let snapshot = engine.snapshot().await.unwrap();
    assert_eq!(snapshot.workspaces[0].active_thread, Some(forked));
}

#[tokio::test]
async fn archived_threads_leave_the_list() {
    let backend = Arc::new(FakeBackend::default());
    let (engine, _) = Engine::start(EngineConfig::default(), EngineServices::new(backend.clone()));
    engine.add_workspace(workspace("ws", "/repo")).await.unwrap();
    engine.send_event(thread_started("ws", "abc")).await.unwrap();
    engine.send_event(thread_started("ws", "def")).await.unwrap();

    engine.archive_thread(ws(), key("abc")).await.unwrap();

    assert_eq!(backend.archived.lock().unwrap().as_slice(), ["codex:abc"]);
    let snapshot = engine.snapshot().await.unwrap();
    let rows: Vec<&str> = snapshot.workspaces[0]
        .threads
        .iter()
        .map(|row| row.key.as_str())
        .collect();
    assert_eq!(rows, ["codex:def"]);
}

#[tokio::test]
async fn every_envelope_reaches_the_debug_sink() {
    let backend = Arc::new(FakeBackend::default());
    let debug = Arc::new(MemoryDebugSink::default());
    let services = EngineServices::new(backend).with_debug_sink(debug.clone());
    let (engine, _) = Engine::start(EngineConfig::default(), services);
    engine.add_workspace(workspace("ws", "/repo")).await.unwrap();

    engine.send_event(thread_started("ws", "abc")).await.unwrap();
    engine
        .send_event(envelope("thread/unheardOf", json!({ "workspaceId": "ws" })))
        .await
        .unwrap();
    engine
        .send_event(envelope("turn/started", json!({ "workspaceId": 7 })))
        .await
        .unwrap();

    let kinds: Vec<String> = debug.entries().into_iter().map(|entry| entry.kind).collect();
    assert_eq!(kinds, ["thread_started", "thread/unheardOf", "turn_started"]);
}
