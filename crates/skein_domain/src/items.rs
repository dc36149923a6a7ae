#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    InProgress,
    Completed,
    Failed,
}

impl ToolStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }

    /// Engines disagree on spelling; anything unrecognised is still running.
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase().replace(['_', '-', ' '], "");
        match normalized.as_str() {
            "completed" | "complete" | "success" | "succeeded" | "done" => Self::Completed,
            "failed" | "failure" | "error" | "errored" | "declined" | "rejected" | "cancelled"
            | "canceled" => Self::Failed,
            _ => Self::InProgress,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FileChange {
    pub path: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub diff: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReasoningPart {
    Summary,
    Content,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationItem {
    Message {
        id: String,
        role: MessageRole,
        text: String,
    },
    Reasoning {
        id: String,
        summary: String,
        content: String,
    },
    Tool {
        id: String,
        tool_type: String,
        title: String,
        detail: String,
        status: ToolStatus,
        #[serde(default)]
        output: Option<String>,
        #[serde(default)]
        changes: Vec<FileChange>,
    },
    ContextCompacted {
        id: String,
    },
}

impl ConversationItem {
    pub fn id(&self) -> &str {
        match self {
            Self::Message { id, .. } => id,
            Self::Reasoning { id, .. } => id,
            Self::Tool { id, .. } => id,
            Self::ContextCompacted { id } => id,
        }
    }

    pub fn is_in_flight_tool(&self) -> bool {
        matches!(
            self,
            Self::Tool {
                status: ToolStatus::InProgress,
                ..
            }
        )
    }

    pub fn is_tool(&self) -> bool {
        matches!(self, Self::Tool { .. })
    }

    pub fn is_assistant_message(&self) -> bool {
        matches!(
            self,
            Self::Message {
                role: MessageRole::Assistant,
                ..
            }
        )
    }

    pub fn is_message(&self) -> bool {
        matches!(self, Self::Message { .. })
    }
}

/// Id of the assistant message receiving deltas for `item_id` in the given
/// agent segment. Segment 0 keeps the engine's id.
pub fn segment_item_id(item_id: &str, segment: u32) -> String {
    if segment == 0 {
        return item_id.to_owned();
    }
    format!("{item_id}-s{segment}")
}

pub(crate) fn is_segment_of(candidate: &str, item_id: &str) -> bool {
    candidate
        .strip_prefix(item_id)
        .and_then(|rest| rest.strip_prefix("-s"))
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Folds a re-sent item onto the one already held. Completion payloads often omit
/// text or output that was streamed as deltas, so non-empty local content wins over
/// an empty incoming field.
pub(crate) fn merge_item_update(existing: &ConversationItem, incoming: ConversationItem) -> ConversationItem {
    match (existing, incoming) {
        (
            ConversationItem::Message { text: old_text, .. },
            ConversationItem::Message { id, role, text },
        ) => ConversationItem::Message {
            id,
            role,
            text: if text.is_empty() { old_text.clone() } else { text },
        },
        (
            ConversationItem::Reasoning {
                summary: old_summary,
                content: old_content,
                ..
            },
            ConversationItem::Reasoning {
                id,
                summary,
                content,
            },
        ) => ConversationItem::Reasoning {
            id,
            summary: if summary.is_empty() {
                old_summary.clone()
            } else {
                summary
            },
            content: if content.is_empty() {
                old_content.clone()
            } else {
                content
            },
        },
        (
            ConversationItem::Tool {
                output: old_output,
                changes: old_changes,
                detail: old_detail,
                ..
            },
            ConversationItem::Tool {
                id,
                tool_type,
                title,
                detail,
                status,
                output,
                changes,
            },
        ) => ConversationItem::Tool {
            id,
            tool_type,
            title,
            detail: if detail.is_empty() {
                old_detail.clone()
            } else {
                detail
            },
            status,
            output: match output {
                Some(output) if !output.is_empty() => Some(output),
                _ => old_output.clone(),
            },
            changes: if changes.is_empty() {
                old_changes.clone()
            } else {
                changes
            },
        },
        (_, incoming) => incoming,
    }
}
