use serde::de::DeserializeOwned;
use serde_json::Value;
use skein_api::{
    ApprovalRequestPayload, BackgroundThreadActionPayload, ContextCompactedPayload, DeltaPayload,
    EventEnvelope, EventKind, ItemPayload, PlanUpdatedPayload, RateLimitsPayload,
    REASONING_SUMMARY_DELTA_METHOD, SessionIdUpdatedPayload, ThreadItemRecord,
    ThreadStartedPayload, TokenUsagePayload, TurnErrorPayload, TurnPayload,
    UserContentRecord, UserInputRequestPayload,
};
use skein_domain::{
    ConversationItem, FileChange, MessageRole, ReasoningPart, ToolStatus, normalize_command_tokens,
    split_command_tokens,
};
use thiserror::Error;

/// A classified envelope with its payload decoded.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundEvent {
    ThreadStarted(ThreadStartedPayload),
    TurnStarted(TurnPayload),
    TurnCompleted(TurnPayload),
    TurnError(TurnErrorPayload),
    PlanUpdated(PlanUpdatedPayload),
    TokenUsageUpdated(TokenUsagePayload),
    RateLimitsUpdated(RateLimitsPayload),
    ItemStarted(ItemPayload),
    ItemCompleted(ItemPayload),
    MessageDelta(DeltaPayload),
    ReasoningDelta {
        payload: DeltaPayload,
        part: ReasoningPart,
    },
    CommandOutputDelta(DeltaPayload),
    ContextCompacted(ContextCompactedPayload),
    ApprovalRequest {
        method: String,
        payload: ApprovalRequestPayload,
    },
    UserInputRequest(UserInputRequestPayload),
    ThreadSessionIdUpdated(SessionIdUpdatedPayload),
    BackgroundThreadAction(BackgroundThreadActionPayload),
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("unknown event method: {0}")]
    UnknownMethod(String),
    #[error("malformed {kind} payload: {source}")]
    Malformed {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

pub fn classify(envelope: &EventEnvelope) -> Result<InboundEvent, RouteError> {
    let Some(kind) = envelope.kind() else {
        return Err(RouteError::UnknownMethod(envelope.method.clone()));
    };
    let payload = &envelope.payload;

    let event = match kind {
        EventKind::ThreadStarted => InboundEvent::ThreadStarted(decode(kind, payload)?),
        EventKind::TurnStarted => InboundEvent::TurnStarted(decode(kind, payload)?),
        EventKind::TurnCompleted => InboundEvent::TurnCompleted(decode(kind, payload)?),
        EventKind::TurnError => InboundEvent::TurnError(decode(kind, payload)?),
        EventKind::PlanUpdated => InboundEvent::PlanUpdated(decode(kind, payload)?),
        EventKind::TokenUsageUpdated => InboundEvent::TokenUsageUpdated(decode(kind, payload)?),
        EventKind::RateLimitsUpdated => InboundEvent::RateLimitsUpdated(decode(kind, payload)?),
        EventKind::ItemStarted => InboundEvent::ItemStarted(decode(kind, payload)?),
        EventKind::ItemCompleted => InboundEvent::ItemCompleted(decode(kind, payload)?),
        EventKind::MessageDelta => InboundEvent::MessageDelta(decode(kind, payload)?),
        EventKind::ReasoningDelta => InboundEvent::ReasoningDelta {
            payload: decode(kind, payload)?,
            part: if envelope.method == REASONING_SUMMARY_DELTA_METHOD {
                ReasoningPart::Summary
            } else {
                ReasoningPart::Content
            },
        },
        EventKind::CommandOutputDelta => InboundEvent::CommandOutputDelta(decode(kind, payload)?),
        EventKind::ContextCompacted => InboundEvent::ContextCompacted(decode(kind, payload)?),
        EventKind::ApprovalRequest => InboundEvent::ApprovalRequest {
            method: envelope.method.clone(),
            payload: decode(kind, payload)?,
        },
        EventKind::UserInputRequest => InboundEvent::UserInputRequest(decode(kind, payload)?),
        EventKind::ThreadSessionIdUpdated => {
            InboundEvent::ThreadSessionIdUpdated(decode(kind, payload)?)
        }
        EventKind::BackgroundThreadAction => {
            InboundEvent::BackgroundThreadAction(decode(kind, payload)?)
        }
    };
    Ok(event)
}

fn decode<T: DeserializeOwned>(kind: EventKind, payload: &Value) -> Result<T, RouteError> {
    T::deserialize(payload).map_err(|source| RouteError::Malformed {
        kind: kind.as_str(),
        source,
    })
}

/// Maps a backend item onto the conversation model. Review-mode markers and
/// unknown item types have no conversation counterpart.
pub fn normalize_item(record: ThreadItemRecord) -> Option<ConversationItem> {
    let item = match record {
        ThreadItemRecord::UserMessage { id, content } => ConversationItem::Message {
            id,
            role: MessageRole::User,
            text: content
                .into_iter()
                .filter_map(|part| match part {
                    UserContentRecord::Text { text } => Some(text),
                    UserContentRecord::Other => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        },
        ThreadItemRecord::AgentMessage { id, text } => ConversationItem::Message {
            id,
            role: MessageRole::Assistant,
            text,
        },
        ThreadItemRecord::Reasoning {
            id,
            summary,
            content,
        } => ConversationItem::Reasoning {
            id,
            summary: summary.join("\n"),
            content: content.join("\n"),
        },
        ThreadItemRecord::CommandExecution {
            id,
            command,
            cwd,
            status,
            aggregated_output,
            ..
        } => ConversationItem::Tool {
            id,
            tool_type: "commandExecution".to_owned(),
            title: command,
            detail: cwd.unwrap_or_default(),
            status: tool_status(status.as_deref()),
            output: aggregated_output,
            changes: Vec::new(),
        },
        ThreadItemRecord::FileChange {
            id,
            changes,
            status,
        } => {
            let changes: Vec<FileChange> = changes
                .into_iter()
                .map(|change| FileChange {
                    kind: change.kind_label(),
                    path: change.path,
                    diff: change.diff,
                })
                .collect();
            ConversationItem::Tool {
                id,
                tool_type: "fileChange".to_owned(),
                title: "File changes".to_owned(),
                detail: changes
                    .iter()
                    .map(|change| change.path.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                status: tool_status(status.as_deref()),
                output: None,
                changes,
            }
        }
        ThreadItemRecord::McpToolCall {
            id,
            server,
            tool,
            title,
            arguments,
            status,
            result,
            error,
        } => {
            let output = error
                .or(result)
                .filter(|value| !value.is_null())
                .map(|value| match value {
                    Value::String(text) => text,
                    other => other.to_string(),
                });
            ConversationItem::Tool {
                id,
                tool_type: "mcpToolCall".to_owned(),
                title: title
                    .filter(|title| !title.trim().is_empty())
                    .unwrap_or_else(|| format!("{server}/{tool}")),
                detail: match arguments {
                    Value::Null => String::new(),
                    other => other.to_string(),
                },
                status: tool_status(status.as_deref()),
                output,
                changes: Vec::new(),
            }
        }
        ThreadItemRecord::WebSearch { id, query } => ConversationItem::Tool {
            id,
            tool_type: "webSearch".to_owned(),
            title: "Web search".to_owned(),
            detail: query,
            status: ToolStatus::Completed,
            output: None,
            changes: Vec::new(),
        },
        ThreadItemRecord::ImageView { id, path } => ConversationItem::Tool {
            id,
            tool_type: "imageView".to_owned(),
            title: "Image".to_owned(),
            detail: path,
            status: ToolStatus::Completed,
            output: None,
            changes: Vec::new(),
        },
        ThreadItemRecord::ContextCompaction { id } => ConversationItem::ContextCompacted { id },
        ThreadItemRecord::EnteredReviewMode { .. }
        | ThreadItemRecord::ExitedReviewMode { .. }
        | ThreadItemRecord::Unknown => return None,
    };
    Some(item)
}

fn tool_status(raw: Option<&str>) -> ToolStatus {
    raw.map(ToolStatus::parse).unwrap_or(ToolStatus::InProgress)
}

/// Command tokens an approval is about, looked up under the names engines use.
pub fn approval_command_tokens(params: &Value) -> Vec<String> {
    let tool_call = params.get("toolCall");
    let candidates = [
        tool_call.and_then(|call| call.get("command")),
        tool_call.and_then(|call| call.get("argv")),
        tool_call.and_then(|call| call.get("args")),
        params.get("command"),
        params.get("argv"),
        params.get("args"),
    ];
    for candidate in candidates {
        let tokens = command_tokens(candidate);
        if !tokens.is_empty() {
            return tokens;
        }
    }

    tool_call
        .and_then(|call| call.get("title"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|title| !title.is_empty() && *title != "{}" && *title != "[]")
        .filter(|title| !title.eq_ignore_ascii_case("null"))
        .map(|title| vec![title.to_owned()])
        .unwrap_or_default()
}

fn command_tokens(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(raw)) => split_command_tokens(raw),
        Some(Value::Array(items)) => normalize_command_tokens(items.iter().filter_map(Value::as_str)),
        _ => Vec::new(),
    }
}
