use crate::{ConversationItem, EngineKind, ThreadKey, WorkspaceId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;

pub const DEFAULT_THREAD_NAME: &str = "New thread";

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub path: PathBuf,
    pub connected: bool,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub cached_input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_output_tokens: u64,
    pub total_tokens: u64,
    pub context_window: Option<u64>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStepStatus {
    Pending,
    InProgress,
    Completed,
}

impl PlanStepStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "completed" | "done" => Self::Completed,
            "inprogress" | "active" | "running" => Self::InProgress,
            _ => Self::Pending,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct PlanStep {
    pub step: String,
    pub status: PlanStepStatus,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize)]
pub struct TurnPlan {
    pub turn_id: Option<String>,
    pub explanation: Option<String>,
    pub steps: Vec<PlanStep>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct RateLimitWindow {
    pub used_percent: f64,
    pub window_minutes: Option<u64>,
    pub resets_at: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct RateLimitSnapshot {
    pub primary: Option<RateLimitWindow>,
    pub secondary: Option<RateLimitWindow>,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct ThreadState {
    pub key: ThreadKey,
    pub workspace_id: WorkspaceId,
    pub engine: EngineKind,
    /// Backend-provided name. Custom names live in `AppState::custom_names`.
    pub name: Option<String>,
    pub items: Vec<ConversationItem>,
    pub updated_at_ms: u64,
    pub processing: bool,
    pub processing_started_at_ms: Option<u64>,
    pub reviewing: bool,
    pub active_turn_id: Option<String>,
    pub token_usage: Option<TokenUsage>,
    pub plan: Option<TurnPlan>,
    pub agent_segment: u32,
}

impl ThreadState {
    pub(crate) fn new(workspace_id: WorkspaceId, key: ThreadKey, engine: EngineKind) -> Self {
        Self {
            key,
            workspace_id,
            engine,
            name: None,
            items: Vec::new(),
            updated_at_ms: 0,
            processing: false,
            processing_started_at_ms: None,
            reviewing: false,
            active_turn_id: None,
            token_usage: None,
            plan: None,
            agent_segment: 0,
        }
    }

    pub fn item(&self, id: &str) -> Option<&ConversationItem> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub(crate) fn item_mut(&mut self, id: &str) -> Option<&mut ConversationItem> {
        self.items.iter_mut().find(|item| item.id() == id)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct ThreadSummary {
    pub key: ThreadKey,
    pub name: String,
    pub engine: EngineKind,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WorkspaceThreads {
    pub threads: Vec<ThreadSummary>,
    pub active_thread: Option<ThreadKey>,
    pub hidden: HashSet<ThreadKey>,
    pub cursor: Option<String>,
    pub loading: bool,
    pub paging: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Accept,
    Decline,
}

impl ApprovalDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Decline => "decline",
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct ApprovalRequest {
    pub workspace_id: WorkspaceId,
    pub request_id: String,
    pub method: String,
    pub thread_key: Option<ThreadKey>,
    pub command: Vec<String>,
    pub params: serde_json::Value,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct UserInputOption {
    pub label: String,
    pub description: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct UserInputQuestion {
    pub id: String,
    pub header: Option<String>,
    pub question: String,
    pub options: Vec<UserInputOption>,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct UserInputRequest {
    pub workspace_id: WorkspaceId,
    pub request_id: String,
    pub thread_key: Option<ThreadKey>,
    pub item_id: Option<String>,
    pub questions: Vec<UserInputQuestion>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AppState {
    pub workspaces: Vec<Workspace>,
    pub threads: HashMap<ThreadKey, ThreadState>,
    pub workspace_threads: HashMap<WorkspaceId, WorkspaceThreads>,
    pub custom_names: HashMap<(WorkspaceId, ThreadKey), String>,
    pub auto_title_pending: HashSet<(WorkspaceId, ThreadKey)>,
    /// Placeholder keys that were promoted, mapped to their durable key.
    pub renamed_threads: HashMap<ThreadKey, ThreadKey>,
    pub rate_limits: HashMap<WorkspaceId, RateLimitSnapshot>,
    pub approvals: HashMap<WorkspaceId, VecDeque<ApprovalRequest>>,
    pub user_inputs: HashMap<WorkspaceId, VecDeque<UserInputRequest>>,
    pub approval_allowlist: HashMap<WorkspaceId, Vec<Vec<String>>>,
}
