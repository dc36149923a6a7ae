use crate::items::{is_segment_of, merge_item_update, segment_item_id};
use crate::listing::thread_display_name;
use crate::{
    Action, AppState, ApprovalDecision, ApprovalRequest, ConversationItem, Effect, EngineKind,
    MessageRole, RateLimitSnapshot, ReasoningPart, ThreadKey, ThreadState, ThreadSummary,
    ToolStatus, UserInputRequest, Workspace, WorkspaceId, WorkspaceThreads,
    command_matches_allowlist,
};

mod rename;

const MAX_ALIAS_HOPS: usize = 8;

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, action: Action) -> Vec<Effect> {
        match action {
            Action::AddWorkspace { workspace } => {
                self.workspace_threads
                    .entry(workspace.id.clone())
                    .or_default();
                match self.workspaces.iter_mut().find(|w| w.id == workspace.id) {
                    Some(existing) => *existing = workspace,
                    None => self.workspaces.push(workspace),
                }
                Vec::new()
            }
            Action::RemoveWorkspace { workspace_id } => {
                self.remove_workspace(&workspace_id);
                Vec::new()
            }
            Action::SetWorkspaceConnected {
                workspace_id,
                connected,
            } => {
                if let Some(workspace) = self.workspaces.iter_mut().find(|w| w.id == workspace_id)
                {
                    workspace.connected = connected;
                }
                Vec::new()
            }

            Action::EnsureThread {
                workspace_id,
                thread_key,
                engine,
            } => {
                self.ensure_thread(&workspace_id, &thread_key, engine);
                Vec::new()
            }
            Action::SetActiveThread {
                workspace_id,
                thread_key,
            } => {
                self.workspace_threads
                    .entry(workspace_id)
                    .or_default()
                    .active_thread = thread_key;
                Vec::new()
            }
            Action::RenameThreadId {
                workspace_id,
                from,
                to,
            } => self.rename_thread_id(&workspace_id, &from, &to),
            Action::HideThread {
                workspace_id,
                thread_key,
            } => {
                let list = self.workspace_threads.entry(workspace_id).or_default();
                list.threads.retain(|row| row.key != thread_key);
                if list.active_thread.as_ref() == Some(&thread_key) {
                    list.active_thread = None;
                }
                list.hidden.insert(thread_key);
                Vec::new()
            }

            Action::SetThreadItems { thread_key, items } => {
                if let Some(thread) = self.threads.get_mut(&thread_key) {
                    thread.items = items;
                }
                Vec::new()
            }
            Action::AppendItem { thread_key, item } => {
                if let Some(thread) = self.threads.get_mut(&thread_key)
                    && thread.item(item.id()).is_none()
                {
                    thread.items.push(item);
                }
                Vec::new()
            }
            Action::UpsertItem { thread_key, item } => {
                if let Some(thread) = self.threads.get_mut(&thread_key) {
                    upsert_item(thread, item);
                }
                Vec::new()
            }
            Action::ApplyMessageDelta {
                thread_key,
                item_id,
                delta,
            } => {
                if let Some(thread) = self.threads.get_mut(&thread_key) {
                    apply_message_delta(thread, &item_id, &delta);
                }
                Vec::new()
            }
            Action::ApplyReasoningDelta {
                thread_key,
                item_id,
                part,
                delta,
            } => {
                if let Some(thread) = self.threads.get_mut(&thread_key) {
                    apply_reasoning_delta(thread, &item_id, part, &delta);
                }
                Vec::new()
            }
            Action::ApplyToolOutputDelta {
                thread_key,
                item_id,
                delta,
            } => {
                if let Some(thread) = self.threads.get_mut(&thread_key) {
                    apply_tool_output_delta(thread, &item_id, &delta);
                }
                Vec::new()
            }
            Action::AppendContextCompacted {
                thread_key,
                item_id,
            } => {
                if let Some(thread) = self.threads.get_mut(&thread_key)
                    && thread.item(&item_id).is_none()
                {
                    thread
                        .items
                        .push(ConversationItem::ContextCompacted { id: item_id });
                }
                Vec::new()
            }
            Action::AppendErrorMessage {
                thread_key,
                message,
            } => {
                if let Some(thread) = self.threads.get_mut(&thread_key) {
                    let id = next_error_item_id(thread);
                    thread.items.push(ConversationItem::Message {
                        id,
                        role: MessageRole::Assistant,
                        text: message,
                    });
                }
                Vec::new()
            }
            Action::FinalizePendingToolStatuses { thread_key, status } => {
                if let Some(thread) = self.threads.get_mut(&thread_key) {
                    finalize_pending_tools(thread, status);
                }
                Vec::new()
            }

            Action::SetActiveTurnId {
                thread_key,
                turn_id,
            } => {
                if let Some(thread) = self.threads.get_mut(&thread_key) {
                    thread.active_turn_id = turn_id;
                }
                Vec::new()
            }
            Action::MarkProcessing {
                thread_key,
                processing,
                at_ms,
            } => {
                if let Some(thread) = self.threads.get_mut(&thread_key) {
                    if processing {
                        if !thread.processing || thread.processing_started_at_ms.is_none() {
                            thread.processing_started_at_ms = Some(at_ms);
                        }
                    } else {
                        thread.processing_started_at_ms = None;
                    }
                    thread.processing = processing;
                }
                Vec::new()
            }
            Action::MarkReviewing {
                thread_key,
                reviewing,
            } => {
                if let Some(thread) = self.threads.get_mut(&thread_key) {
                    thread.reviewing = reviewing;
                }
                Vec::new()
            }
            Action::ResetAgentSegment { thread_key } => {
                if let Some(thread) = self.threads.get_mut(&thread_key) {
                    thread.agent_segment = 0;
                }
                Vec::new()
            }
            Action::BumpAgentSegment { thread_key } => {
                if let Some(thread) = self.threads.get_mut(&thread_key) {
                    thread.agent_segment = thread.agent_segment.saturating_add(1);
                }
                Vec::new()
            }

            Action::SetThreadName { thread_key, name } => {
                let Some(thread) = self.threads.get_mut(&thread_key) else {
                    return Vec::new();
                };
                let name = name.trim();
                thread.name = (!name.is_empty()).then(|| name.to_owned());
                let workspace_id = thread.workspace_id.clone();
                self.refresh_row_name(&workspace_id, &thread_key);
                Vec::new()
            }
            Action::SetCustomName {
                workspace_id,
                thread_key,
                name,
            } => {
                let name = name
                    .map(|name| name.trim().to_owned())
                    .filter(|name| !name.is_empty());
                let slot = (workspace_id.clone(), thread_key.clone());
                match &name {
                    Some(name) => {
                        self.custom_names.insert(slot.clone(), name.clone());
                        self.auto_title_pending.remove(&slot);
                    }
                    None => {
                        self.custom_names.remove(&slot);
                    }
                }
                self.refresh_row_name(&workspace_id, &thread_key);
                vec![Effect::StoreCustomName {
                    workspace_id,
                    thread_key,
                    name,
                }]
            }
            Action::CustomNamesRestored {
                workspace_id,
                names,
            } => {
                for (thread_key, name) in names {
                    let name = name.trim();
                    if name.is_empty() {
                        continue;
                    }
                    self.custom_names
                        .entry((workspace_id.clone(), thread_key.clone()))
                        .or_insert_with(|| name.to_owned());
                    self.refresh_row_name(&workspace_id, &thread_key);
                }
                Vec::new()
            }
            Action::MarkAutoTitlePending {
                workspace_id,
                thread_key,
            } => {
                self.auto_title_pending.insert((workspace_id, thread_key));
                Vec::new()
            }
            Action::ClearAutoTitlePending {
                workspace_id,
                thread_key,
            } => {
                self.auto_title_pending.remove(&(workspace_id, thread_key));
                Vec::new()
            }
            Action::SetThreadTimestamp { thread_key, at_ms } => {
                let Some(thread) = self.threads.get_mut(&thread_key) else {
                    return Vec::new();
                };
                thread.updated_at_ms = thread.updated_at_ms.max(at_ms);
                let workspace_id = thread.workspace_id.clone();
                if let Some(row) = self.row_mut(&workspace_id, &thread_key) {
                    row.updated_at_ms = row.updated_at_ms.max(at_ms);
                }
                Vec::new()
            }
            Action::SetThreadPlan { thread_key, plan } => {
                if let Some(thread) = self.threads.get_mut(&thread_key) {
                    thread.plan = plan;
                }
                Vec::new()
            }
            Action::SetThreadTokenUsage { thread_key, usage } => {
                if let Some(thread) = self.threads.get_mut(&thread_key) {
                    thread.token_usage = Some(usage);
                }
                Vec::new()
            }
            Action::SetRateLimits {
                workspace_id,
                rate_limits,
            } => {
                self.rate_limits.insert(workspace_id, rate_limits);
                Vec::new()
            }

            Action::SetThreads {
                workspace_id,
                threads,
            } => {
                self.set_threads(&workspace_id, threads);
                Vec::new()
            }
            Action::AppendThreads {
                workspace_id,
                threads,
            } => {
                let rows = self.named_rows(&workspace_id, threads);
                let list = self.workspace_threads.entry(workspace_id).or_default();
                for row in rows {
                    if list.hidden.contains(&row.key) || list.threads.iter().any(|r| r.key == row.key)
                    {
                        continue;
                    }
                    list.threads.push(row);
                }
                Vec::new()
            }
            Action::SetThreadListCursor {
                workspace_id,
                cursor,
            } => {
                self.workspace_threads.entry(workspace_id).or_default().cursor = cursor;
                Vec::new()
            }
            Action::SetThreadListLoading {
                workspace_id,
                loading,
            } => {
                self.workspace_threads.entry(workspace_id).or_default().loading = loading;
                Vec::new()
            }
            Action::SetThreadListPaging {
                workspace_id,
                paging,
            } => {
                self.workspace_threads.entry(workspace_id).or_default().paging = paging;
                Vec::new()
            }

            Action::AddApproval { request } => self.add_approval(request),
            Action::ResolveApproval {
                workspace_id,
                request_id,
                decision,
                remember,
            } => self.resolve_approval(&workspace_id, &request_id, decision, remember),
            Action::AddUserInputRequest { request } => {
                let queue = self.user_inputs.entry(request.workspace_id.clone()).or_default();
                if !queue.iter().any(|r| r.request_id == request.request_id) {
                    queue.push_back(request);
                }
                Vec::new()
            }
            Action::ResolveUserInput {
                workspace_id,
                request_id,
                answers,
            } => {
                let Some(queue) = self.user_inputs.get_mut(&workspace_id) else {
                    return Vec::new();
                };
                let Some(index) = queue.iter().position(|r| r.request_id == request_id) else {
                    return Vec::new();
                };
                queue.remove(index);
                vec![Effect::RespondToUserInput {
                    workspace_id,
                    request_id,
                    answers,
                }]
            }
        }
    }

    pub fn workspace(&self, workspace_id: &WorkspaceId) -> Option<&Workspace> {
        self.workspaces.iter().find(|w| &w.id == workspace_id)
    }

    pub fn thread(&self, thread_key: &ThreadKey) -> Option<&ThreadState> {
        self.threads.get(thread_key)
    }

    pub fn workspace_threads(&self, workspace_id: &WorkspaceId) -> Option<&WorkspaceThreads> {
        self.workspace_threads.get(workspace_id)
    }

    pub fn visible_threads(&self, workspace_id: &WorkspaceId) -> &[ThreadSummary] {
        self.workspace_threads
            .get(workspace_id)
            .map(|list| list.threads.as_slice())
            .unwrap_or_default()
    }

    pub fn active_thread_id(&self, workspace_id: &WorkspaceId) -> Option<&ThreadKey> {
        self.workspace_threads.get(workspace_id)?.active_thread.as_ref()
    }

    pub fn active_items(&self, workspace_id: &WorkspaceId) -> &[ConversationItem] {
        self.active_thread_id(workspace_id)
            .and_then(|key| self.threads.get(key))
            .map(|thread| thread.items.as_slice())
            .unwrap_or_default()
    }

    pub fn approvals_for(&self, workspace_id: &WorkspaceId) -> impl Iterator<Item = &ApprovalRequest> {
        self.approvals.get(workspace_id).into_iter().flatten()
    }

    pub fn user_inputs_for(
        &self,
        workspace_id: &WorkspaceId,
    ) -> impl Iterator<Item = &UserInputRequest> {
        self.user_inputs.get(workspace_id).into_iter().flatten()
    }

    pub fn rate_limits(&self, workspace_id: &WorkspaceId) -> Option<&RateLimitSnapshot> {
        self.rate_limits.get(workspace_id)
    }

    pub fn custom_name(&self, workspace_id: &WorkspaceId, thread_key: &ThreadKey) -> Option<&str> {
        self.custom_names
            .get(&(workspace_id.clone(), thread_key.clone()))
            .map(String::as_str)
    }

    pub fn is_auto_title_pending(&self, workspace_id: &WorkspaceId, thread_key: &ThreadKey) -> bool {
        self.auto_title_pending
            .contains(&(workspace_id.clone(), thread_key.clone()))
    }

    /// Custom name, then backend name, then the first user message.
    pub fn display_name(&self, workspace_id: &WorkspaceId, thread_key: &ThreadKey) -> String {
        let thread = self.threads.get(thread_key);
        let preview = thread.and_then(|thread| {
            thread.items.iter().find_map(|item| match item {
                ConversationItem::Message {
                    role: MessageRole::User,
                    text,
                    ..
                } => Some(text.as_str()),
                _ => None,
            })
        });
        thread_display_name(
            self.custom_name(workspace_id, thread_key),
            thread.and_then(|thread| thread.name.as_deref()),
            preview,
        )
    }

    /// Follows placeholder aliases to the key the thread lives under now.
    pub fn resolve_thread_key(&self, thread_key: &ThreadKey) -> ThreadKey {
        let mut current = thread_key;
        for _ in 0..MAX_ALIAS_HOPS {
            match self.renamed_threads.get(current) {
                Some(next) => current = next,
                None => break,
            }
        }
        current.clone()
    }

    fn ensure_thread(&mut self, workspace_id: &WorkspaceId, thread_key: &ThreadKey, engine: EngineKind) {
        if let Some(thread) = self.threads.get_mut(thread_key) {
            if thread.engine != engine {
                thread.engine = engine;
                if let Some(row) = self.row_mut(workspace_id, thread_key) {
                    row.engine = engine;
                }
            }
            return;
        }

        self.threads.insert(
            thread_key.clone(),
            ThreadState::new(workspace_id.clone(), thread_key.clone(), engine),
        );
        let name = self.display_name(workspace_id, thread_key);
        let list = self.workspace_threads.entry(workspace_id.clone()).or_default();
        if list.hidden.contains(thread_key) || list.threads.iter().any(|r| &r.key == thread_key) {
            return;
        }
        list.threads.insert(
            0,
            ThreadSummary {
                key: thread_key.clone(),
                name,
                engine,
                created_at_ms: 0,
                updated_at_ms: 0,
            },
        );
    }

    fn remove_workspace(&mut self, workspace_id: &WorkspaceId) {
        self.workspaces.retain(|w| &w.id != workspace_id);
        self.threads
            .retain(|_, thread| &thread.workspace_id != workspace_id);
        self.workspace_threads.remove(workspace_id);
        self.custom_names.retain(|(ws, _), _| ws != workspace_id);
        self.auto_title_pending.retain(|(ws, _)| ws != workspace_id);
        self.rate_limits.remove(workspace_id);
        self.approvals.remove(workspace_id);
        self.user_inputs.remove(workspace_id);
        self.approval_allowlist.remove(workspace_id);
        let threads = &self.threads;
        self.renamed_threads
            .retain(|_, durable| threads.contains_key(durable));
    }

    fn set_threads(&mut self, workspace_id: &WorkspaceId, threads: Vec<ThreadSummary>) {
        let rows = self.named_rows(workspace_id, threads);
        let local_placeholders: Vec<ThreadSummary> = self
            .visible_threads(workspace_id)
            .iter()
            .filter(|row| row.key.is_placeholder() && self.threads.contains_key(&row.key))
            .filter(|row| !rows.iter().any(|r| r.key == row.key))
            .cloned()
            .collect();

        let list = self.workspace_threads.entry(workspace_id.clone()).or_default();
        let mut next = local_placeholders;
        for row in rows {
            if list.hidden.contains(&row.key) || next.iter().any(|r| r.key == row.key) {
                continue;
            }
            next.push(row);
        }
        list.threads = next;
    }

    fn named_rows(&self, workspace_id: &WorkspaceId, rows: Vec<ThreadSummary>) -> Vec<ThreadSummary> {
        rows.into_iter()
            .map(|mut row| {
                if let Some(custom) = self.custom_name(workspace_id, &row.key) {
                    row.name = custom.to_owned();
                }
                row
            })
            .collect()
    }

    fn row_mut(&mut self, workspace_id: &WorkspaceId, thread_key: &ThreadKey) -> Option<&mut ThreadSummary> {
        self.workspace_threads
            .get_mut(workspace_id)?
            .threads
            .iter_mut()
            .find(|row| &row.key == thread_key)
    }

    fn refresh_row_name(&mut self, workspace_id: &WorkspaceId, thread_key: &ThreadKey) {
        if self.custom_name(workspace_id, thread_key).is_none()
            && !self.threads.contains_key(thread_key)
        {
            return;
        }
        let name = self.display_name(workspace_id, thread_key);
        if let Some(row) = self.row_mut(workspace_id, thread_key) {
            row.name = name;
        }
    }

    fn add_approval(&mut self, request: ApprovalRequest) -> Vec<Effect> {
        let allowlist = self
            .approval_allowlist
            .get(&request.workspace_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        if command_matches_allowlist(&request.command, allowlist) {
            return vec![Effect::RespondToApproval {
                workspace_id: request.workspace_id,
                request_id: request.request_id,
                decision: ApprovalDecision::Accept,
            }];
        }

        let queue = self.approvals.entry(request.workspace_id.clone()).or_default();
        if !queue.iter().any(|r| r.request_id == request.request_id) {
            queue.push_back(request);
        }
        Vec::new()
    }

    fn resolve_approval(
        &mut self,
        workspace_id: &WorkspaceId,
        request_id: &str,
        decision: ApprovalDecision,
        remember: bool,
    ) -> Vec<Effect> {
        let Some(queue) = self.approvals.get_mut(workspace_id) else {
            return Vec::new();
        };
        let Some(index) = queue.iter().position(|r| r.request_id == request_id) else {
            return Vec::new();
        };
        let Some(request) = queue.remove(index) else {
            return Vec::new();
        };

        if remember && decision == ApprovalDecision::Accept && !request.command.is_empty() {
            let allowlist = self
                .approval_allowlist
                .entry(workspace_id.clone())
                .or_default();
            if !allowlist.contains(&request.command) {
                allowlist.push(request.command);
            }
        }

        vec![Effect::RespondToApproval {
            workspace_id: workspace_id.clone(),
            request_id: request.request_id,
            decision,
        }]
    }
}

fn upsert_item(thread: &mut ThreadState, item: ConversationItem) {
    // Streamed text was split into segments; the completion's full text would
    // duplicate it.
    if item.is_assistant_message()
        && thread
            .items
            .iter()
            .any(|existing| is_segment_of(existing.id(), item.id()))
    {
        return;
    }

    match thread.item_mut(item.id()) {
        Some(existing) => {
            let merged = merge_item_update(existing, item);
            *existing = merged;
        }
        None => thread.items.push(item),
    }
}

fn apply_message_delta(thread: &mut ThreadState, item_id: &str, delta: &str) {
    let target = segment_item_id(item_id, thread.agent_segment);
    match thread.item_mut(&target) {
        Some(ConversationItem::Message { text, .. }) => text.push_str(delta),
        Some(_) => {}
        None => thread.items.push(ConversationItem::Message {
            id: target,
            role: MessageRole::Assistant,
            text: delta.to_owned(),
        }),
    }
}

fn apply_reasoning_delta(thread: &mut ThreadState, item_id: &str, part: ReasoningPart, delta: &str) {
    match thread.item_mut(item_id) {
        Some(ConversationItem::Reasoning {
            summary, content, ..
        }) => match part {
            ReasoningPart::Summary => summary.push_str(delta),
            ReasoningPart::Content => content.push_str(delta),
        },
        Some(_) => {}
        None => {
            let (summary, content) = match part {
                ReasoningPart::Summary => (delta.to_owned(), String::new()),
                ReasoningPart::Content => (String::new(), delta.to_owned()),
            };
            thread.items.push(ConversationItem::Reasoning {
                id: item_id.to_owned(),
                summary,
                content,
            });
        }
    }
}

fn apply_tool_output_delta(thread: &mut ThreadState, item_id: &str, delta: &str) {
    match thread.item_mut(item_id) {
        Some(ConversationItem::Tool { output, .. }) => {
            output.get_or_insert_with(String::new).push_str(delta);
        }
        Some(_) => {}
        None => thread.items.push(ConversationItem::Tool {
            id: item_id.to_owned(),
            tool_type: "commandExecution".to_owned(),
            title: String::new(),
            detail: String::new(),
            status: ToolStatus::InProgress,
            output: Some(delta.to_owned()),
            changes: Vec::new(),
        }),
    }
}

fn finalize_pending_tools(thread: &mut ThreadState, terminal: ToolStatus) {
    for item in &mut thread.items {
        if let ConversationItem::Tool { status, .. } = item
            && *status == ToolStatus::InProgress
        {
            *status = terminal;
        }
    }
}

fn next_error_item_id(thread: &ThreadState) -> String {
    let mut n = thread.items.len();
    loop {
        let id = format!("error-{n}");
        if thread.item(&id).is_none() {
            return id;
        }
        n += 1;
    }
}
