use crate::{
    ApprovalDecision, ApprovalRequest, ConversationItem, EngineKind, RateLimitSnapshot,
    ReasoningPart, ThreadKey, ThreadSummary, TokenUsage, ToolStatus, TurnPlan, UserInputRequest,
    Workspace, WorkspaceId,
};
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    AddWorkspace {
        workspace: Workspace,
    },
    RemoveWorkspace {
        workspace_id: WorkspaceId,
    },
    SetWorkspaceConnected {
        workspace_id: WorkspaceId,
        connected: bool,
    },

    EnsureThread {
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
        engine: EngineKind,
    },
    SetActiveThread {
        workspace_id: WorkspaceId,
        thread_key: Option<ThreadKey>,
    },
    RenameThreadId {
        workspace_id: WorkspaceId,
        from: ThreadKey,
        to: ThreadKey,
    },
    HideThread {
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
    },

    SetThreadItems {
        thread_key: ThreadKey,
        items: Vec<ConversationItem>,
    },
    AppendItem {
        thread_key: ThreadKey,
        item: ConversationItem,
    },
    UpsertItem {
        thread_key: ThreadKey,
        item: ConversationItem,
    },
    ApplyMessageDelta {
        thread_key: ThreadKey,
        item_id: String,
        delta: String,
    },
    ApplyReasoningDelta {
        thread_key: ThreadKey,
        item_id: String,
        part: ReasoningPart,
        delta: String,
    },
    ApplyToolOutputDelta {
        thread_key: ThreadKey,
        item_id: String,
        delta: String,
    },
    AppendContextCompacted {
        thread_key: ThreadKey,
        item_id: String,
    },
    AppendErrorMessage {
        thread_key: ThreadKey,
        message: String,
    },
    FinalizePendingToolStatuses {
        thread_key: ThreadKey,
        status: ToolStatus,
    },

    SetActiveTurnId {
        thread_key: ThreadKey,
        turn_id: Option<String>,
    },
    MarkProcessing {
        thread_key: ThreadKey,
        processing: bool,
        at_ms: u64,
    },
    MarkReviewing {
        thread_key: ThreadKey,
        reviewing: bool,
    },
    ResetAgentSegment {
        thread_key: ThreadKey,
    },
    BumpAgentSegment {
        thread_key: ThreadKey,
    },

    SetThreadName {
        thread_key: ThreadKey,
        name: String,
    },
    SetCustomName {
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
        name: Option<String>,
    },
    CustomNamesRestored {
        workspace_id: WorkspaceId,
        names: HashMap<ThreadKey, String>,
    },
    MarkAutoTitlePending {
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
    },
    ClearAutoTitlePending {
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
    },
    SetThreadTimestamp {
        thread_key: ThreadKey,
        at_ms: u64,
    },
    SetThreadPlan {
        thread_key: ThreadKey,
        plan: Option<TurnPlan>,
    },
    SetThreadTokenUsage {
        thread_key: ThreadKey,
        usage: TokenUsage,
    },
    SetRateLimits {
        workspace_id: WorkspaceId,
        rate_limits: RateLimitSnapshot,
    },

    SetThreads {
        workspace_id: WorkspaceId,
        threads: Vec<ThreadSummary>,
    },
    AppendThreads {
        workspace_id: WorkspaceId,
        threads: Vec<ThreadSummary>,
    },
    SetThreadListCursor {
        workspace_id: WorkspaceId,
        cursor: Option<String>,
    },
    SetThreadListLoading {
        workspace_id: WorkspaceId,
        loading: bool,
    },
    SetThreadListPaging {
        workspace_id: WorkspaceId,
        paging: bool,
    },

    AddApproval {
        request: ApprovalRequest,
    },
    ResolveApproval {
        workspace_id: WorkspaceId,
        request_id: String,
        decision: ApprovalDecision,
        remember: bool,
    },
    AddUserInputRequest {
        request: UserInputRequest,
    },
    ResolveUserInput {
        workspace_id: WorkspaceId,
        request_id: String,
        answers: serde_json::Value,
    },
}
