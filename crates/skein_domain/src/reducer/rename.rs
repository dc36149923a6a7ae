use crate::merge::merge_items;
use crate::{AppState, Effect, ThreadKey, ThreadState, WorkspaceId};

impl AppState {
    /// Promotes a placeholder key to its durable key across every keyed store.
    /// Durable or unknown sources are left alone: the rename already happened.
    pub(super) fn rename_thread_id(
        &mut self,
        workspace_id: &WorkspaceId,
        from: &ThreadKey,
        to: &ThreadKey,
    ) -> Vec<Effect> {
        if !from.is_placeholder() || from == to {
            return Vec::new();
        }
        let Some(mut placeholder) = self.threads.remove(from) else {
            return Vec::new();
        };
        placeholder.key = to.clone();
        placeholder.engine = to.engine();

        let thread = match self.threads.remove(to) {
            Some(durable) => fold_into_durable(placeholder, durable),
            None => placeholder,
        };
        self.threads.insert(to.clone(), thread);

        if let Some(list) = self.workspace_threads.get_mut(workspace_id) {
            if list.threads.iter().any(|row| &row.key == to) {
                list.threads.retain(|row| &row.key != from);
            } else if let Some(row) = list.threads.iter_mut().find(|row| &row.key == from) {
                row.key = to.clone();
                row.engine = to.engine();
            }
            if list.hidden.remove(from) {
                list.hidden.insert(to.clone());
            }
            if list.active_thread.as_ref() == Some(from) {
                list.active_thread = Some(to.clone());
            }
        }

        let from_slot = (workspace_id.clone(), from.clone());
        let to_slot = (workspace_id.clone(), to.clone());
        if let Some(name) = self.custom_names.remove(&from_slot) {
            self.custom_names.entry(to_slot.clone()).or_insert(name);
        }
        if self.auto_title_pending.remove(&from_slot) {
            self.auto_title_pending.insert(to_slot);
        }

        for request in self.approvals.values_mut().flatten() {
            if request.thread_key.as_ref() == Some(from) {
                request.thread_key = Some(to.clone());
            }
        }
        for request in self.user_inputs.values_mut().flatten() {
            if request.thread_key.as_ref() == Some(from) {
                request.thread_key = Some(to.clone());
            }
        }

        for durable in self.renamed_threads.values_mut() {
            if durable == from {
                *durable = to.clone();
            }
        }
        self.renamed_threads.insert(from.clone(), to.clone());

        self.refresh_row_name(workspace_id, to);

        vec![Effect::RenameTitleMapping {
            workspace_id: workspace_id.clone(),
            from: from.clone(),
            to: to.clone(),
        }]
    }
}

/// A durable thread that already exists (an event raced the rename) keeps its own
/// turn state; the placeholder contributes what it accumulated locally.
fn fold_into_durable(placeholder: ThreadState, durable: ThreadState) -> ThreadState {
    let items = merge_items(&placeholder.items, &durable.items, true);
    let processing_started_at_ms = match (
        placeholder.processing_started_at_ms,
        durable.processing_started_at_ms,
    ) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    ThreadState {
        key: durable.key,
        workspace_id: durable.workspace_id,
        engine: durable.engine,
        name: durable.name.or(placeholder.name),
        items,
        updated_at_ms: durable.updated_at_ms.max(placeholder.updated_at_ms),
        processing: durable.processing || placeholder.processing,
        processing_started_at_ms,
        reviewing: durable.reviewing || placeholder.reviewing,
        active_turn_id: durable.active_turn_id.or(placeholder.active_turn_id),
        token_usage: durable.token_usage.or(placeholder.token_usage),
        plan: durable.plan.or(placeholder.plan),
        agent_segment: durable.agent_segment.max(placeholder.agent_segment),
    }
}
