mod ids;
pub use ids::{EngineKind, ThreadKey, ThreadKeyKind, WorkspaceId};

mod items;
pub use items::{ConversationItem, FileChange, MessageRole, ReasoningPart, ToolStatus, segment_item_id};

mod merge;
pub use merge::merge_items;

mod approvals;
pub use approvals::{command_matches_allowlist, normalize_command_tokens, split_command_tokens};

pub mod listing;
pub use listing::{
    ListAccumulator, ListOutcome, ListProgress, ListedThread, ListingLimits, ThreadActivityMap,
    normalize_timestamp_ms, normalize_workspace_path, thread_display_name,
};

mod turns;
pub use turns::{TurnCommand, TurnLifecycle};

mod actions;
pub use actions::Action;
mod effects;
pub use effects::Effect;

mod state;
pub use state::*;

mod reducer;
