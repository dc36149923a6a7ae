#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use skein_api::{EventEnvelope, SessionRecord, ThreadListPage, ThreadRecord, ThreadResumeResponse};
use skein_domain::{ApprovalDecision, EngineKind, ThreadKey, Workspace, WorkspaceId};
use skein_engine::{BackendError, BackendResult, SessionIndex, ThreadBackend};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub struct ScriptedResume {
    pub response: BackendResult<ThreadResumeResponse>,
    pub gate: Option<Arc<Notify>>,
}

pub enum ScriptedTitle {
    Title(String),
    Hang(Duration),
    Fail(String),
}

/// Backend double answering from scripted responses and recording every call.
#[derive(Default)]
pub struct FakeBackend {
    start_ids: Mutex<VecDeque<String>>,
    fork_ids: Mutex<VecDeque<String>>,
    resumes: Mutex<HashMap<String, VecDeque<ScriptedResume>>>,
    pages: Mutex<HashMap<Option<String>, ThreadListPage>>,
    list_error: Mutex<Option<String>>,
    list_gate: Mutex<Option<Arc<Notify>>>,
    title: Mutex<Option<ScriptedTitle>>,
    pub list_calls: Mutex<Vec<Option<String>>>,
    pub resume_calls: Mutex<Vec<String>>,
    pub interrupts: Mutex<Vec<(String, String)>>,
    pub approvals: Mutex<Vec<(String, ApprovalDecision)>>,
    pub user_inputs: Mutex<Vec<(String, Value)>>,
    pub title_calls: Mutex<Vec<String>>,
    pub archived: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn push_start_id(&self, id: &str) {
        self.start_ids.lock().unwrap().push_back(id.to_owned());
    }

    pub fn push_fork_id(&self, id: &str) {
        self.fork_ids.lock().unwrap().push_back(id.to_owned());
    }

    pub fn push_resume(&self, thread_key: &str, resume: ScriptedResume) {
        self.resumes
            .lock()
            .unwrap()
            .entry(thread_key.to_owned())
            .or_default()
            .push_back(resume);
    }

    pub fn set_page(&self, cursor: Option<&str>, page: ThreadListPage) {
        self.pages
            .lock()
            .unwrap()
            .insert(cursor.map(ToOwned::to_owned), page);
    }

    pub fn fail_listing(&self, message: &str) {
        *self.list_error.lock().unwrap() = Some(message.to_owned());
    }

    /// The next page request waits until `gate` is notified.
    pub fn hold_next_list(&self, gate: Arc<Notify>) {
        *self.list_gate.lock().unwrap() = Some(gate);
    }

    pub fn set_title(&self, title: ScriptedTitle) {
        *self.title.lock().unwrap() = Some(title);
    }

    pub fn list_call_count(&self) -> usize {
        self.list_calls.lock().unwrap().len()
    }

    pub fn resume_call_count(&self) -> usize {
        self.resume_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ThreadBackend for FakeBackend {
    async fn start_thread(&self, _: &WorkspaceId, engine: EngineKind) -> BackendResult<String> {
        self.start_ids
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| BackendError::Rejected(format!("no session for {engine}")))
    }

    async fn resume_thread(
        &self,
        _: &WorkspaceId,
        thread_key: &ThreadKey,
    ) -> BackendResult<ThreadResumeResponse> {
        self.resume_calls
            .lock()
            .unwrap()
            .push(thread_key.as_str().to_owned());
        let scripted = self
            .resumes
            .lock()
            .unwrap()
            .get_mut(thread_key.as_str())
            .and_then(VecDeque::pop_front);
        let Some(scripted) = scripted else {
            return Err(BackendError::Rejected(format!("unknown thread {thread_key}")));
        };
        if let Some(gate) = scripted.gate {
            gate.notified().await;
        }
        scripted.response
    }

    async fn list_threads(
        &self,
        _: &WorkspaceId,
        cursor: Option<&str>,
        _: usize,
    ) -> BackendResult<ThreadListPage> {
        self.list_calls
            .lock()
            .unwrap()
            .push(cursor.map(ToOwned::to_owned));
        let gate = self.list_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let error = self.list_error.lock().unwrap().clone();
        if let Some(message) = error {
            return Err(BackendError::Transport(message));
        }
        Ok(self
            .pages
            .lock()
            .unwrap()
            .get(&cursor.map(ToOwned::to_owned))
            .cloned()
            .unwrap_or_default())
    }

    async fn fork_thread(&self, _: &WorkspaceId, _: &ThreadKey) -> BackendResult<String> {
        self.fork_ids
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| BackendError::Rejected("fork refused".to_owned()))
    }

    async fn archive_thread(&self, _: &WorkspaceId, thread_key: &ThreadKey) -> BackendResult<()> {
        self.archived
            .lock()
            .unwrap()
            .push(thread_key.as_str().to_owned());
        Ok(())
    }

    async fn interrupt_turn(
        &self,
        _: &WorkspaceId,
        thread_key: &ThreadKey,
        turn_id: &str,
    ) -> BackendResult<()> {
        self.interrupts
            .lock()
            .unwrap()
            .push((thread_key.as_str().to_owned(), turn_id.to_owned()));
        Ok(())
    }

    async fn generate_thread_title(
        &self,
        _: &WorkspaceId,
        _: &ThreadKey,
        description: &str,
        _: Option<&str>,
    ) -> BackendResult<String> {
        self.title_calls.lock().unwrap().push(description.to_owned());
        let scripted = self.title.lock().unwrap().take();
        match scripted {
            Some(ScriptedTitle::Title(title)) => Ok(title),
            Some(ScriptedTitle::Hang(duration)) => {
                tokio::time::sleep(duration).await;
                Ok("too late".to_owned())
            }
            Some(ScriptedTitle::Fail(message)) => Err(BackendError::Rejected(message)),
            None => Err(BackendError::Unavailable("no title scripted".to_owned())),
        }
    }

    async fn respond_to_approval(
        &self,
        _: &WorkspaceId,
        request_id: &str,
        decision: ApprovalDecision,
    ) -> BackendResult<()> {
        self.approvals
            .lock()
            .unwrap()
            .push((request_id.to_owned(), decision));
        Ok(())
    }

    async fn respond_to_user_input(
        &self,
        _: &WorkspaceId,
        request_id: &str,
        answers: &Value,
    ) -> BackendResult<()> {
        self.user_inputs
            .lock()
            .unwrap()
            .push((request_id.to_owned(), answers.clone()));
        Ok(())
    }
}

pub struct FakeSessionIndex {
    pub engine: EngineKind,
    pub sessions: BackendResult<Vec<SessionRecord>>,
}

#[async_trait]
impl SessionIndex for FakeSessionIndex {
    fn engine(&self) -> EngineKind {
        self.engine
    }

    async fn list_sessions(&self, _: &Path) -> BackendResult<Vec<SessionRecord>> {
        match &self.sessions {
            Ok(sessions) => Ok(sessions.clone()),
            Err(err) => Err(BackendError::Unavailable(err.to_string())),
        }
    }
}

pub fn workspace(id: &str, path: &str) -> Workspace {
    Workspace {
        id: WorkspaceId::new(id),
        name: id.to_owned(),
        path: PathBuf::from(path),
        connected: true,
    }
}

pub fn key(raw: &str) -> ThreadKey {
    ThreadKey::parse(raw).unwrap()
}

pub fn envelope(method: &str, payload: Value) -> EventEnvelope {
    EventEnvelope::new(method, payload)
}

pub fn thread_started(workspace_id: &str, thread_id: &str) -> EventEnvelope {
    envelope(
        "thread/started",
        json!({ "workspaceId": workspace_id, "threadId": thread_id }),
    )
}

pub fn turn_started(workspace_id: &str, thread_id: &str, turn_id: &str) -> EventEnvelope {
    envelope(
        "turn/started",
        json!({ "workspaceId": workspace_id, "threadId": thread_id, "turn": { "id": turn_id } }),
    )
}

pub fn agent_message(workspace_id: &str, thread_id: &str, item_id: &str, text: &str) -> EventEnvelope {
    envelope(
        "item/completed",
        json!({
            "workspaceId": workspace_id,
            "threadId": thread_id,
            "item": { "type": "agentMessage", "id": item_id, "text": text }
        }),
    )
}

pub fn user_message(workspace_id: &str, thread_id: &str, item_id: &str, text: &str) -> EventEnvelope {
    envelope(
        "item/completed",
        json!({
            "workspaceId": workspace_id,
            "threadId": thread_id,
            "item": {
                "type": "userMessage",
                "id": item_id,
                "content": [{ "type": "text", "text": text }]
            }
        }),
    )
}

pub fn thread_record(id: &str, cwd: &str, created_at: u64) -> ThreadRecord {
    ThreadRecord {
        id: id.to_owned(),
        preview: Some(format!("Preview of {id}")),
        name: None,
        cwd: Some(cwd.to_owned()),
        created_at,
        updated_at: created_at,
    }
}

pub fn resume_response(id: &str, items: Value) -> ThreadResumeResponse {
    ThreadResumeResponse {
        thread: ThreadRecord {
            id: id.to_owned(),
            preview: None,
            name: None,
            cwd: Some("/repo".to_owned()),
            created_at: 0,
            updated_at: 0,
        },
        items: serde_json::from_value(items).unwrap(),
        active_turn_id: None,
    }
}

/// Spawned backend calls land back on the engine queue; poll until `check` holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
