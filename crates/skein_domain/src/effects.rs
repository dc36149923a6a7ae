use crate::{ApprovalDecision, ThreadKey, WorkspaceId};

#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    RespondToApproval {
        workspace_id: WorkspaceId,
        request_id: String,
        decision: ApprovalDecision,
    },
    RespondToUserInput {
        workspace_id: WorkspaceId,
        request_id: String,
        answers: serde_json::Value,
    },
    StoreCustomName {
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
        name: Option<String>,
    },
    RenameTitleMapping {
        workspace_id: WorkspaceId,
        from: ThreadKey,
        to: ThreadKey,
    },
}
