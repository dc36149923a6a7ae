use super::Engine;
use crate::debug::DebugEntry;
use crate::router::{InboundEvent, RouteError, approval_command_tokens, classify, normalize_item};
use crate::time::now_unix_ms;
use skein_api::{
    ApprovalRequestPayload, EventEnvelope, ItemPayload, PlanUpdatedPayload,
    RateLimitWindowRecord, RateLimitsPayload, SessionIdUpdatedPayload, ThreadItemRecord,
    ThreadStartedPayload, TokenUsagePayload, UserInputRequestPayload,
};
use skein_domain::{
    Action, ApprovalRequest, ConversationItem, EngineKind, MessageRole, PlanStep, PlanStepStatus,
    RateLimitSnapshot, RateLimitWindow, ThreadKey, TokenUsage, TurnPlan, UserInputOption,
    UserInputQuestion, UserInputRequest, WorkspaceId, normalize_timestamp_ms,
};

impl Engine {
    pub(super) fn handle_event(&mut self, envelope: EventEnvelope) {
        self.services.debug.record(DebugEntry {
            kind: envelope
                .kind()
                .map(|kind| kind.as_str().to_owned())
                .unwrap_or_else(|| envelope.method.clone()),
            workspace_id: envelope.workspace_id().map(ToOwned::to_owned),
            payload: envelope.payload.clone(),
            at_ms: now_unix_ms(),
        });

        let event = match classify(&envelope) {
            Ok(event) => event,
            Err(RouteError::UnknownMethod(method)) => {
                tracing::debug!(method = %method, "dropping unknown event");
                return;
            }
            Err(err) => {
                tracing::warn!(method = %envelope.method, error = %err, "dropping malformed event");
                return;
            }
        };

        match event {
            InboundEvent::ThreadStarted(payload) => self.on_thread_started(payload),
            InboundEvent::TurnStarted(payload) => {
                let workspace_id = WorkspaceId::new(payload.workspace_id.as_str());
                let Some(turn_id) = payload.turn_id().map(ToOwned::to_owned) else {
                    tracing::warn!(thread_id = %payload.thread_id, "turn started without turn id");
                    return;
                };
                let Some(thread_key) = self.event_thread(&workspace_id, &payload.thread_id) else {
                    return;
                };
                let commands =
                    self.turns
                        .turn_started(&workspace_id, &thread_key, &turn_id, now_unix_ms());
                self.run_turn_commands(commands);
            }
            InboundEvent::TurnCompleted(payload) => {
                let workspace_id = WorkspaceId::new(payload.workspace_id.as_str());
                let Some(thread_key) = self.event_thread(&workspace_id, &payload.thread_id) else {
                    return;
                };
                let commands = self.turns.turn_completed(&thread_key, now_unix_ms());
                self.run_turn_commands(commands);
            }
            InboundEvent::TurnError(payload) => {
                // The engine retries on its own; nothing changes meanwhile.
                if payload.will_retry {
                    return;
                }
                let workspace_id = WorkspaceId::new(payload.workspace_id.as_str());
                let Some(thread_key) = self.event_thread(&workspace_id, &payload.thread_id) else {
                    return;
                };
                let commands =
                    self.turns
                        .turn_error(&thread_key, payload.message(), false, now_unix_ms());
                self.run_turn_commands(commands);
            }
            InboundEvent::PlanUpdated(payload) => self.on_plan_updated(payload),
            InboundEvent::TokenUsageUpdated(payload) => self.on_token_usage(payload),
            InboundEvent::RateLimitsUpdated(payload) => self.on_rate_limits(payload),
            InboundEvent::ItemStarted(payload) => self.on_item(payload, false),
            InboundEvent::ItemCompleted(payload) => self.on_item(payload, true),
            InboundEvent::MessageDelta(payload) => {
                let workspace_id = WorkspaceId::new(payload.workspace_id.as_str());
                let Some(thread_key) = self.event_thread(&workspace_id, &payload.thread_id) else {
                    return;
                };
                self.dispatch(Action::ApplyMessageDelta {
                    thread_key,
                    item_id: payload.item_id,
                    delta: payload.delta,
                });
            }
            InboundEvent::ReasoningDelta { payload, part } => {
                let workspace_id = WorkspaceId::new(payload.workspace_id.as_str());
                let Some(thread_key) = self.event_thread(&workspace_id, &payload.thread_id) else {
                    return;
                };
                self.dispatch(Action::ApplyReasoningDelta {
                    thread_key,
                    item_id: payload.item_id,
                    part,
                    delta: payload.delta,
                });
            }
            InboundEvent::CommandOutputDelta(payload) => {
                let workspace_id = WorkspaceId::new(payload.workspace_id.as_str());
                let Some(thread_key) = self.event_thread(&workspace_id, &payload.thread_id) else {
                    return;
                };
                self.dispatch(Action::ApplyToolOutputDelta {
                    thread_key,
                    item_id: payload.item_id,
                    delta: payload.delta,
                });
            }
            InboundEvent::ContextCompacted(payload) => {
                let workspace_id = WorkspaceId::new(payload.workspace_id.as_str());
                let Some(thread_key) = self.event_thread(&workspace_id, &payload.thread_id) else {
                    return;
                };
                let item_id = payload
                    .item_id
                    .filter(|id| !id.is_empty())
                    .or_else(|| payload.turn_id.map(|turn_id| format!("compacted-{turn_id}")))
                    .unwrap_or_else(|| {
                        let count = self
                            .state
                            .thread(&thread_key)
                            .map(|thread| thread.items.len())
                            .unwrap_or_default();
                        format!("compacted-{count}")
                    });
                self.dispatch(Action::AppendContextCompacted {
                    thread_key,
                    item_id,
                });
            }
            InboundEvent::ApprovalRequest { method, payload } => {
                self.on_approval_request(method, payload);
            }
            InboundEvent::UserInputRequest(payload) => self.on_user_input_request(payload),
            InboundEvent::ThreadSessionIdUpdated(payload) => self.on_session_id_updated(payload),
            InboundEvent::BackgroundThreadAction(payload) => {
                let workspace_id = WorkspaceId::new(payload.workspace_id.as_str());
                if !payload.action.trim().eq_ignore_ascii_case("hide") {
                    tracing::debug!(action = %payload.action, "ignoring background thread action");
                    return;
                }
                let Some(thread_key) = ThreadKey::parse(&payload.thread_id) else {
                    return;
                };
                let thread_key = self.state.resolve_thread_key(&thread_key);
                self.dispatch(Action::HideThread {
                    workspace_id,
                    thread_key,
                });
            }
        }
    }

    /// Key for a thread named by an event. Unseen durable ids create the thread;
    /// placeholders are only ever minted locally, so an unknown one is stale.
    fn event_thread(&mut self, workspace_id: &WorkspaceId, thread_id: &str) -> Option<ThreadKey> {
        if self.state.workspace(workspace_id).is_none() {
            tracing::debug!(workspace_id = %workspace_id, "event for unknown workspace");
            return None;
        }
        let thread_key = ThreadKey::parse(thread_id)?;
        if self.state.thread(&thread_key).is_some() {
            return Some(thread_key);
        }
        if thread_key.is_placeholder() {
            tracing::debug!(thread_key = %thread_key, "dropping event for unknown placeholder");
            return None;
        }
        self.dispatch(Action::EnsureThread {
            workspace_id: workspace_id.clone(),
            thread_key: thread_key.clone(),
            engine: thread_key.engine(),
        });
        Some(thread_key)
    }

    fn on_thread_started(&mut self, payload: ThreadStartedPayload) {
        let workspace_id = WorkspaceId::new(payload.workspace_id.as_str());
        let Some(thread_id) = payload.thread_id() else {
            tracing::warn!(workspace_id = %workspace_id, "thread started without id");
            return;
        };
        let Some(thread_key) = self.event_thread(&workspace_id, thread_id) else {
            return;
        };

        let mut actions = Vec::new();
        let mut at_ms = now_unix_ms();
        if let Some(thread) = payload.thread {
            if let Some(name) = thread.name.filter(|name| !name.trim().is_empty()) {
                actions.push(Action::SetThreadName {
                    thread_key: thread_key.clone(),
                    name,
                });
            }
            let reported = normalize_timestamp_ms(thread.updated_at.max(thread.created_at));
            if reported > 0 {
                at_ms = reported;
            }
        }
        actions.push(Action::SetThreadTimestamp {
            thread_key: thread_key.clone(),
            at_ms,
        });
        self.process_action_queue(actions);
        self.record_activity(&workspace_id, &thread_key, at_ms);
    }

    fn on_item(&mut self, payload: ItemPayload, completed: bool) {
        let workspace_id = WorkspaceId::new(payload.workspace_id.as_str());
        let Some(thread_key) = self.event_thread(&workspace_id, &payload.thread_id) else {
            return;
        };

        match &payload.item {
            ThreadItemRecord::EnteredReviewMode { .. } => {
                self.dispatch(Action::MarkReviewing {
                    thread_key,
                    reviewing: true,
                });
                return;
            }
            ThreadItemRecord::ExitedReviewMode { .. } => {
                self.dispatch(Action::MarkReviewing {
                    thread_key,
                    reviewing: false,
                });
                return;
            }
            _ => {}
        }

        let Some(item) = normalize_item(payload.item) else {
            tracing::debug!(thread_key = %thread_key, "dropping item without conversation form");
            return;
        };
        // Assistant text arrives through deltas; the started marker carries none.
        if !completed && item.is_assistant_message() {
            return;
        }

        let thread = self.state.thread(&thread_key);
        let is_new = thread.is_some_and(|thread| thread.item(item.id()).is_none());
        let follows_text = thread
            .and_then(|thread| thread.items.last())
            .is_some_and(ConversationItem::is_assistant_message);

        let mut actions = Vec::new();
        if item.is_tool() && is_new && follows_text {
            actions.push(Action::BumpAgentSegment {
                thread_key: thread_key.clone(),
            });
        }

        let user_text = match &item {
            ConversationItem::Message {
                role: MessageRole::User,
                text,
                ..
            } => Some(text.clone()),
            _ => None,
        };
        let bumps_activity = item.is_message();

        actions.push(Action::UpsertItem {
            thread_key: thread_key.clone(),
            item,
        });
        let now = now_unix_ms();
        if bumps_activity {
            actions.push(Action::SetThreadTimestamp {
                thread_key: thread_key.clone(),
                at_ms: now,
            });
        }
        self.process_action_queue(actions);

        if bumps_activity {
            self.record_activity(&workspace_id, &thread_key, now);
        }
        if let Some(text) = user_text
            && completed
        {
            self.maybe_generate_title(workspace_id, thread_key, text);
        }
    }

    /// The first user message of a thread started here names it.
    fn maybe_generate_title(&mut self, workspace_id: WorkspaceId, thread_key: ThreadKey, text: String) {
        if !self.state.is_auto_title_pending(&workspace_id, &thread_key)
            || self.titles_in_flight.contains(&thread_key)
            || text.trim().is_empty()
        {
            return;
        }
        self.generate_title(workspace_id, thread_key, text, None, None);
    }

    fn on_plan_updated(&mut self, payload: PlanUpdatedPayload) {
        let workspace_id = WorkspaceId::new(payload.workspace_id.as_str());
        let Some(thread_key) = self.event_thread(&workspace_id, &payload.thread_id) else {
            return;
        };
        let plan = TurnPlan {
            turn_id: payload.turn_id,
            explanation: payload.explanation.filter(|text| !text.trim().is_empty()),
            steps: payload
                .plan
                .into_iter()
                .map(|step| PlanStep {
                    status: PlanStepStatus::parse(&step.status),
                    step: step.step,
                })
                .collect(),
        };
        self.dispatch(Action::SetThreadPlan {
            thread_key,
            plan: Some(plan),
        });
    }

    fn on_token_usage(&mut self, payload: TokenUsagePayload) {
        let workspace_id = WorkspaceId::new(payload.workspace_id.as_str());
        let Some(thread_key) = self.event_thread(&workspace_id, &payload.thread_id) else {
            return;
        };
        let total = payload.token_usage.total;
        self.dispatch(Action::SetThreadTokenUsage {
            thread_key,
            usage: TokenUsage {
                input_tokens: total.input_tokens,
                cached_input_tokens: total.cached_input_tokens,
                output_tokens: total.output_tokens,
                reasoning_output_tokens: total.reasoning_output_tokens,
                total_tokens: total.total_tokens,
                context_window: payload.token_usage.model_context_window,
            },
        });
    }

    fn on_rate_limits(&mut self, payload: RateLimitsPayload) {
        let window = |record: RateLimitWindowRecord| RateLimitWindow {
            used_percent: record.used_percent,
            window_minutes: record.window_duration_mins,
            resets_at: record.resets_at,
        };
        self.dispatch(Action::SetRateLimits {
            workspace_id: WorkspaceId::new(payload.workspace_id),
            rate_limits: RateLimitSnapshot {
                primary: payload.rate_limits.primary.map(window),
                secondary: payload.rate_limits.secondary.map(window),
            },
        });
    }

    fn on_approval_request(&mut self, method: String, payload: ApprovalRequestPayload) {
        let Some(request_id) = payload.request_id() else {
            tracing::warn!(method = %method, "approval request without id");
            return;
        };
        let thread_key = payload.thread_id().and_then(ThreadKey::parse);
        let command = approval_command_tokens(&payload.params);
        self.dispatch(Action::AddApproval {
            request: ApprovalRequest {
                workspace_id: WorkspaceId::new(payload.workspace_id),
                request_id,
                method,
                thread_key,
                command,
                params: payload.params,
            },
        });
    }

    fn on_user_input_request(&mut self, payload: UserInputRequestPayload) {
        let Some(request_id) = payload.request_id() else {
            tracing::warn!("user input request without id");
            return;
        };
        let params = payload.params;
        let questions = params
            .questions
            .into_iter()
            .map(|question| UserInputQuestion {
                id: question.id,
                header: question.header,
                question: question.question,
                options: question
                    .options
                    .into_iter()
                    .map(|option| UserInputOption {
                        label: option.label,
                        description: option.description,
                    })
                    .collect(),
            })
            .collect();
        self.dispatch(Action::AddUserInputRequest {
            request: UserInputRequest {
                workspace_id: WorkspaceId::new(payload.workspace_id),
                request_id,
                thread_key: params.thread_id.as_deref().and_then(ThreadKey::parse),
                item_id: params.item_id,
                questions,
            },
        });
    }

    fn on_session_id_updated(&mut self, payload: SessionIdUpdatedPayload) {
        let workspace_id = WorkspaceId::new(payload.workspace_id.as_str());
        let Some(from) = ThreadKey::parse(&payload.thread_id) else {
            return;
        };
        if !from.is_placeholder() {
            tracing::debug!(thread_key = %from, "session id update for durable thread");
            return;
        }
        let session_id = payload.session_id.trim();
        if session_id.is_empty() {
            return;
        }
        let engine = payload
            .engine
            .as_deref()
            .and_then(EngineKind::parse)
            .unwrap_or_else(|| from.engine());
        self.reconcile_thread(&workspace_id, &from, ThreadKey::durable(engine, session_id));
    }
}
