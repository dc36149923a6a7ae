use crate::ConversationItem;
use std::collections::HashSet;

/// Combines a freshly fetched history with what the thread already holds locally.
///
/// With `replace`, an empty local side, or at least one shared id, the server
/// sequence is the base and local-only items are appended in local order. A
/// non-empty local sequence sharing no id with the server is kept as is: the
/// snapshot predates local activity.
///
/// Ids are assigned once at creation, so equal ids never carry diverging content
/// and this stays a union keyed by id rather than a diff.
pub fn merge_items(
    server: &[ConversationItem],
    local: &[ConversationItem],
    replace: bool,
) -> Vec<ConversationItem> {
    let server_ids: HashSet<&str> = server.iter().map(ConversationItem::id).collect();
    let overlap = local.iter().any(|item| server_ids.contains(item.id()));

    if !replace && !local.is_empty() && !overlap {
        return local.to_vec();
    }

    let mut merged = server.to_vec();
    merged.extend(
        local
            .iter()
            .filter(|item| !server_ids.contains(item.id()))
            .cloned(),
    );
    merged
}
