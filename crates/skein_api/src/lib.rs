use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One inbound notification from an engine connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub method: String,
    #[serde(default, alias = "params")]
    pub payload: Value,
}

impl EventEnvelope {
    pub fn new(method: impl Into<String>, payload: Value) -> Self {
        Self {
            method: method.into(),
            payload,
        }
    }

    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_method(&self.method)
    }

    pub fn workspace_id(&self) -> Option<&str> {
        self.payload.get("workspaceId").and_then(Value::as_str)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ThreadStarted,
    TurnStarted,
    TurnCompleted,
    TurnError,
    PlanUpdated,
    TokenUsageUpdated,
    RateLimitsUpdated,
    ItemStarted,
    ItemCompleted,
    MessageDelta,
    ReasoningDelta,
    CommandOutputDelta,
    ContextCompacted,
    ApprovalRequest,
    UserInputRequest,
    ThreadSessionIdUpdated,
    BackgroundThreadAction,
}

pub const REASONING_SUMMARY_DELTA_METHOD: &str = "item/reasoning/summaryTextDelta";
pub const REASONING_TEXT_DELTA_METHOD: &str = "item/reasoning/textDelta";

impl EventKind {
    pub fn from_method(method: &str) -> Option<Self> {
        let kind = match method {
            "thread/started" => Self::ThreadStarted,
            "turn/started" => Self::TurnStarted,
            "turn/completed" => Self::TurnCompleted,
            "turn/error" | "error" => Self::TurnError,
            "turn/plan/updated" => Self::PlanUpdated,
            "thread/tokenUsage/updated" => Self::TokenUsageUpdated,
            "account/rateLimits/updated" => Self::RateLimitsUpdated,
            "item/started" => Self::ItemStarted,
            "item/completed" => Self::ItemCompleted,
            "item/agentMessage/delta" => Self::MessageDelta,
            REASONING_SUMMARY_DELTA_METHOD | REASONING_TEXT_DELTA_METHOD => Self::ReasoningDelta,
            "item/commandExecution/outputDelta" | "item/fileChange/outputDelta" => {
                Self::CommandOutputDelta
            }
            "thread/compacted" => Self::ContextCompacted,
            "item/tool/requestUserInput" => Self::UserInputRequest,
            "thread/sessionIdUpdated" => Self::ThreadSessionIdUpdated,
            "thread/backgroundAction" => Self::BackgroundThreadAction,
            other if other.ends_with("requestApproval") => Self::ApprovalRequest,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ThreadStarted => "thread_started",
            Self::TurnStarted => "turn_started",
            Self::TurnCompleted => "turn_completed",
            Self::TurnError => "turn_error",
            Self::PlanUpdated => "plan_updated",
            Self::TokenUsageUpdated => "token_usage_updated",
            Self::RateLimitsUpdated => "rate_limits_updated",
            Self::ItemStarted => "item_started",
            Self::ItemCompleted => "item_completed",
            Self::MessageDelta => "message_delta",
            Self::ReasoningDelta => "reasoning_delta",
            Self::CommandOutputDelta => "command_output_delta",
            Self::ContextCompacted => "context_compacted",
            Self::ApprovalRequest => "approval_request",
            Self::UserInputRequest => "user_input_request",
            Self::ThreadSessionIdUpdated => "thread_session_id_updated",
            Self::BackgroundThreadAction => "background_thread_action",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadStartedPayload {
    pub workspace_id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub thread: Option<ThreadRecord>,
}

impl ThreadStartedPayload {
    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id
            .as_deref()
            .or_else(|| self.thread.as_ref().map(|thread| thread.id.as_str()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRef {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnPayload {
    pub workspace_id: String,
    pub thread_id: String,
    #[serde(default)]
    pub turn: Option<TurnRef>,
    #[serde(default)]
    pub turn_id: Option<String>,
}

impl TurnPayload {
    pub fn turn_id(&self) -> Option<&str> {
        self.turn
            .as_ref()
            .map(|turn| turn.id.as_str())
            .or(self.turn_id.as_deref())
            .filter(|id| !id.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub additional_details: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnErrorPayload {
    pub workspace_id: String,
    pub thread_id: String,
    #[serde(default)]
    pub turn_id: Option<String>,
    #[serde(default)]
    pub error: Option<ErrorBody>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub will_retry: bool,
}

impl TurnErrorPayload {
    pub fn message(&self) -> &str {
        self.error
            .as_ref()
            .map(|error| error.message.as_str())
            .filter(|message| !message.trim().is_empty())
            .or(self.message.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStepRecord {
    #[serde(default)]
    pub step: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanUpdatedPayload {
    pub workspace_id: String,
    pub thread_id: String,
    #[serde(default)]
    pub turn_id: Option<String>,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub plan: Vec<PlanStepRecord>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBreakdown {
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub cached_input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub reasoning_output_tokens: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsageRecord {
    #[serde(default)]
    pub total: TokenBreakdown,
    #[serde(default)]
    pub last: Option<TokenBreakdown>,
    #[serde(default)]
    pub model_context_window: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsagePayload {
    pub workspace_id: String,
    pub thread_id: String,
    pub token_usage: TokenUsageRecord,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitWindowRecord {
    #[serde(default)]
    pub used_percent: f64,
    #[serde(default)]
    pub window_duration_mins: Option<u64>,
    #[serde(default)]
    pub resets_at: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitsRecord {
    #[serde(default)]
    pub primary: Option<RateLimitWindowRecord>,
    #[serde(default)]
    pub secondary: Option<RateLimitWindowRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitsPayload {
    pub workspace_id: String,
    #[serde(default)]
    pub rate_limits: RateLimitsRecord,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPayload {
    pub workspace_id: String,
    pub thread_id: String,
    #[serde(default)]
    pub turn_id: Option<String>,
    pub item: ThreadItemRecord,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaPayload {
    pub workspace_id: String,
    pub thread_id: String,
    pub item_id: String,
    #[serde(default)]
    pub delta: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextCompactedPayload {
    pub workspace_id: String,
    pub thread_id: String,
    #[serde(default)]
    pub turn_id: Option<String>,
    #[serde(default)]
    pub item_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequestPayload {
    pub workspace_id: String,
    #[serde(alias = "id")]
    pub request_id: Value,
    #[serde(default)]
    pub params: Value,
}

impl ApprovalRequestPayload {
    pub fn request_id(&self) -> Option<String> {
        request_id_string(&self.request_id)
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.params
            .get("threadId")
            .or_else(|| self.params.get("thread_id"))
            .and_then(Value::as_str)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputOptionRecord {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputQuestionRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub options: Vec<UserInputOptionRecord>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputParams {
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub turn_id: Option<String>,
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub questions: Vec<UserInputQuestionRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputRequestPayload {
    pub workspace_id: String,
    #[serde(alias = "id")]
    pub request_id: Value,
    #[serde(default)]
    pub params: UserInputParams,
}

impl UserInputRequestPayload {
    pub fn request_id(&self) -> Option<String> {
        request_id_string(&self.request_id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdUpdatedPayload {
    pub workspace_id: String,
    pub thread_id: String,
    pub session_id: String,
    #[serde(default)]
    pub engine: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundThreadActionPayload {
    pub workspace_id: String,
    pub thread_id: String,
    pub action: String,
}

/// Request ids arrive as JSON numbers or strings.
pub fn request_id_string(raw: &Value) -> Option<String> {
    match raw {
        Value::String(id) if !id.trim().is_empty() => Some(id.trim().to_owned()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UserContentRecord {
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChangeRecord {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub kind: Option<Value>,
    #[serde(default)]
    pub diff: Option<String>,
}

impl FileChangeRecord {
    /// `kind` is either a bare string or `{ "type": "..." }`.
    pub fn kind_label(&self) -> Option<String> {
        match self.kind.as_ref()? {
            Value::String(kind) => Some(kind.clone()),
            Value::Object(map) => map.get("type").and_then(Value::as_str).map(ToOwned::to_owned),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ThreadItemRecord {
    UserMessage {
        id: String,
        #[serde(default)]
        content: Vec<UserContentRecord>,
    },
    AgentMessage {
        id: String,
        #[serde(default)]
        text: String,
    },
    Reasoning {
        id: String,
        #[serde(default)]
        summary: Vec<String>,
        #[serde(default)]
        content: Vec<String>,
    },
    CommandExecution {
        id: String,
        #[serde(default)]
        command: String,
        #[serde(default)]
        cwd: Option<String>,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        aggregated_output: Option<String>,
        #[serde(default)]
        exit_code: Option<i64>,
    },
    FileChange {
        id: String,
        #[serde(default)]
        changes: Vec<FileChangeRecord>,
        #[serde(default)]
        status: Option<String>,
    },
    McpToolCall {
        id: String,
        #[serde(default)]
        server: String,
        #[serde(default)]
        tool: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        arguments: Value,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<Value>,
    },
    WebSearch {
        id: String,
        #[serde(default)]
        query: String,
    },
    ImageView {
        id: String,
        #[serde(default)]
        path: String,
    },
    EnteredReviewMode {
        id: String,
        #[serde(default)]
        review: String,
    },
    ExitedReviewMode {
        id: String,
        #[serde(default)]
        review: String,
    },
    ContextCompaction {
        id: String,
    },
    #[serde(other)]
    Unknown,
}

impl ThreadItemRecord {
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::UserMessage { id, .. }
            | Self::AgentMessage { id, .. }
            | Self::Reasoning { id, .. }
            | Self::CommandExecution { id, .. }
            | Self::FileChange { id, .. }
            | Self::McpToolCall { id, .. }
            | Self::WebSearch { id, .. }
            | Self::ImageView { id, .. }
            | Self::EnteredReviewMode { id, .. }
            | Self::ExitedReviewMode { id, .. }
            | Self::ContextCompaction { id } => Some(id),
            Self::Unknown => None,
        }
    }
}

/// A thread as the backend's global index reports it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadRecord {
    pub id: String,
    #[serde(default)]
    pub preview: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadListPage {
    #[serde(default)]
    pub data: Vec<ThreadRecord>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadResumeResponse {
    pub thread: ThreadRecord,
    #[serde(default)]
    pub items: Vec<ThreadItemRecord>,
    #[serde(default)]
    pub active_turn_id: Option<String>,
}

/// An entry of an engine's own session list, used as a secondary index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}
