use crate::activity_store::{ActivityStore, JsonFileActivityStore, MemoryActivityStore};
use crate::backend::{BackendError, BackendResult, SessionIndex, ThreadBackend};
use crate::config::EngineConfig;
use crate::debug::{DebugEntry, DebugSink, TracingDebugSink};
use crate::generation::RequestGenerations;
use crate::listing::{collect_secondary_threads, collect_workspace_threads};
use crate::router::normalize_item;
use crate::time::now_unix_ms;
use crate::title_store::{MemoryTitleStore, TitleStore};
use anyhow::Context as _;
use rand::Rng as _;
use rand::distributions::Alphanumeric;
use serde::Serialize;
use skein_api::{EventEnvelope, ThreadResumeResponse};
use skein_domain::listing::{merge_secondary_threads, sort_by_activity, summarize_listed_thread};
use skein_domain::{
    Action, AppState, ApprovalDecision, ApprovalRequest, ConversationItem, Effect, EngineKind,
    ListOutcome, ListedThread, RateLimitSnapshot, ThreadActivityMap, ThreadKey, ThreadState,
    ThreadSummary, TurnCommand, TurnLifecycle, UserInputRequest, Workspace, WorkspaceId,
    merge_items, normalize_timestamp_ms,
};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

mod events;

const PLACEHOLDER_NONCE_LEN: usize = 8;

/// Collaborators the engine calls out to.
#[derive(Clone)]
pub struct EngineServices {
    pub backend: Arc<dyn ThreadBackend>,
    pub secondary_index: Option<Arc<dyn SessionIndex>>,
    pub debug: Arc<dyn DebugSink>,
    pub titles: Arc<dyn TitleStore>,
    pub activity: Arc<dyn ActivityStore>,
}

impl EngineServices {
    pub fn new(backend: Arc<dyn ThreadBackend>) -> Self {
        Self {
            backend,
            secondary_index: None,
            debug: Arc::new(TracingDebugSink),
            titles: Arc::new(MemoryTitleStore::default()),
            activity: Arc::new(MemoryActivityStore::default()),
        }
    }

    /// Persists activity to `config.activity_path` when one is set.
    pub fn from_config(config: &EngineConfig, backend: Arc<dyn ThreadBackend>) -> Self {
        let mut out = Self::new(backend);
        if let Some(path) = &config.activity_path {
            out.activity = Arc::new(JsonFileActivityStore::new(path.clone()));
        }
        out
    }

    pub fn with_secondary_index(mut self, index: Arc<dyn SessionIndex>) -> Self {
        self.secondary_index = Some(index);
        self
    }

    pub fn with_debug_sink(mut self, debug: Arc<dyn DebugSink>) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_title_store(mut self, titles: Arc<dyn TitleStore>) -> Self {
        self.titles = titles;
        self
    }

    pub fn with_activity_store(mut self, activity: Arc<dyn ActivityStore>) -> Self {
        self.activity = activity;
        self
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ResumeOptions {
    /// Re-fetch even when the thread was already loaded in this session.
    pub force: bool,
    /// Take the server history as authoritative instead of merging by overlap.
    pub replace_local: bool,
}

/// Result of a request whose reply can be discarded as stale.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RequestOutcome<T> {
    Applied(T),
    Skipped,
    Superseded,
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineNotice {
    StateChanged {
        rev: u64,
    },
    TitleTimeout {
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
    },
    TitleFailed {
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
        message: String,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub rev: u64,
    pub workspaces: Vec<WorkspaceSnapshot>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WorkspaceSnapshot {
    pub workspace: Workspace,
    pub active_thread: Option<ThreadKey>,
    pub active_items: Vec<ConversationItem>,
    pub threads: Vec<ThreadSummary>,
    pub cursor: Option<String>,
    pub loading: bool,
    pub paging: bool,
    pub approvals: Vec<ApprovalRequest>,
    pub user_inputs: Vec<UserInputRequest>,
    pub rate_limits: Option<RateLimitSnapshot>,
    pub pending_interrupts: Vec<ThreadKey>,
}

type Reply<T> = oneshot::Sender<anyhow::Result<T>>;
type OutcomeReply<T> = oneshot::Sender<RequestOutcome<T>>;

#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
    notices: broadcast::Sender<EngineNotice>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> anyhow::Result<T> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(build(tx)).await.context("engine unavailable")?;
        rx.await.context("engine stopped")
    }

    /// Resolves once the envelope has been routed and applied.
    pub async fn send_event(&self, envelope: EventEnvelope) -> anyhow::Result<()> {
        self.request(|reply| EngineCommand::Event { envelope, reply })
            .await
    }

    pub async fn add_workspace(&self, workspace: Workspace) -> anyhow::Result<()> {
        self.request(|reply| EngineCommand::AddWorkspace { workspace, reply })
            .await
    }

    pub async fn remove_workspace(&self, workspace_id: WorkspaceId) -> anyhow::Result<()> {
        self.request(|reply| EngineCommand::RemoveWorkspace {
            workspace_id,
            reply,
        })
        .await
    }

    /// Returns the key the thread lives under once the backend answered: the
    /// durable key when the backend already knows the session id.
    pub async fn start_thread(
        &self,
        workspace_id: WorkspaceId,
        engine: EngineKind,
    ) -> anyhow::Result<ThreadKey> {
        self.request(|reply| EngineCommand::StartThread {
            workspace_id,
            engine,
            reply,
        })
        .await?
    }

    pub async fn resume_thread(
        &self,
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
        options: ResumeOptions,
    ) -> anyhow::Result<RequestOutcome<ThreadKey>> {
        self.request(|reply| EngineCommand::ResumeThread {
            workspace_id,
            thread_key,
            options,
            reply,
        })
        .await
    }

    /// Replaces the workspace thread list. Applied yields the row count.
    pub async fn list_threads(
        &self,
        workspace_id: WorkspaceId,
    ) -> anyhow::Result<RequestOutcome<usize>> {
        self.request(|reply| EngineCommand::ListThreads {
            workspace_id,
            reply,
        })
        .await
    }

    /// Continues from the stored cursor. Applied yields the number of new rows.
    pub async fn load_older_threads(
        &self,
        workspace_id: WorkspaceId,
    ) -> anyhow::Result<RequestOutcome<usize>> {
        self.request(|reply| EngineCommand::LoadOlderThreads {
            workspace_id,
            reply,
        })
        .await
    }

    pub async fn fork_thread(
        &self,
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
    ) -> anyhow::Result<ThreadKey> {
        self.request(|reply| EngineCommand::ForkThread {
            workspace_id,
            thread_key,
            reply,
        })
        .await?
    }

    pub async fn archive_thread(
        &self,
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
    ) -> anyhow::Result<()> {
        self.request(|reply| EngineCommand::ArchiveThread {
            workspace_id,
            thread_key,
            reply,
        })
        .await?
    }

    pub async fn interrupt(
        &self,
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
    ) -> anyhow::Result<()> {
        self.request(|reply| EngineCommand::Interrupt {
            workspace_id,
            thread_key,
            reply,
        })
        .await?
    }

    pub async fn generate_title(
        &self,
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
        description: String,
        locale: Option<String>,
    ) -> anyhow::Result<Option<String>> {
        self.request(|reply| EngineCommand::GenerateTitle {
            workspace_id,
            thread_key,
            description,
            locale,
            reply,
        })
        .await?
    }

    pub async fn set_active_thread(
        &self,
        workspace_id: WorkspaceId,
        thread_key: Option<ThreadKey>,
    ) -> anyhow::Result<()> {
        self.request(|reply| EngineCommand::SetActiveThread {
            workspace_id,
            thread_key,
            reply,
        })
        .await
    }

    pub async fn set_custom_name(
        &self,
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
        name: Option<String>,
    ) -> anyhow::Result<()> {
        self.request(|reply| EngineCommand::SetCustomName {
            workspace_id,
            thread_key,
            name,
            reply,
        })
        .await
    }

    pub async fn resolve_approval(
        &self,
        workspace_id: WorkspaceId,
        request_id: String,
        decision: ApprovalDecision,
        remember: bool,
    ) -> anyhow::Result<()> {
        self.request(|reply| EngineCommand::ResolveApproval {
            workspace_id,
            request_id,
            decision,
            remember,
            reply,
        })
        .await
    }

    pub async fn resolve_user_input(
        &self,
        workspace_id: WorkspaceId,
        request_id: String,
        answers: serde_json::Value,
    ) -> anyhow::Result<()> {
        self.request(|reply| EngineCommand::ResolveUserInput {
            workspace_id,
            request_id,
            answers,
            reply,
        })
        .await
    }

    pub async fn snapshot(&self) -> anyhow::Result<EngineSnapshot> {
        self.request(|reply| EngineCommand::GetSnapshot { reply }).await
    }

    /// Follows renames, so a placeholder key still finds its thread.
    pub async fn thread(&self, thread_key: ThreadKey) -> anyhow::Result<Option<ThreadState>> {
        self.request(|reply| EngineCommand::GetThread { thread_key, reply })
            .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineNotice> {
        self.notices.subscribe()
    }
}

pub enum EngineCommand {
    Event {
        envelope: EventEnvelope,
        reply: oneshot::Sender<()>,
    },
    AddWorkspace {
        workspace: Workspace,
        reply: oneshot::Sender<()>,
    },
    RemoveWorkspace {
        workspace_id: WorkspaceId,
        reply: oneshot::Sender<()>,
    },
    StartThread {
        workspace_id: WorkspaceId,
        engine: EngineKind,
        reply: Reply<ThreadKey>,
    },
    StartThreadFinished {
        workspace_id: WorkspaceId,
        placeholder: ThreadKey,
        result: BackendResult<String>,
        reply: Reply<ThreadKey>,
    },
    ResumeThread {
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
        options: ResumeOptions,
        reply: OutcomeReply<ThreadKey>,
    },
    ResumeFinished {
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
        generation: u64,
        replace_local: bool,
        result: BackendResult<ThreadResumeResponse>,
        reply: Option<OutcomeReply<ThreadKey>>,
    },
    ListThreads {
        workspace_id: WorkspaceId,
        reply: OutcomeReply<usize>,
    },
    ListFinished {
        workspace_id: WorkspaceId,
        generation: u64,
        primary: BackendResult<ListOutcome>,
        secondary: Vec<ListedThread>,
        reply: OutcomeReply<usize>,
    },
    LoadOlderThreads {
        workspace_id: WorkspaceId,
        reply: OutcomeReply<usize>,
    },
    OlderThreadsFinished {
        workspace_id: WorkspaceId,
        generation: u64,
        result: BackendResult<ListOutcome>,
        reply: OutcomeReply<usize>,
    },
    ForkThread {
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
        reply: Reply<ThreadKey>,
    },
    ForkFinished {
        workspace_id: WorkspaceId,
        source: ThreadKey,
        result: BackendResult<String>,
        reply: Reply<ThreadKey>,
    },
    ArchiveThread {
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
        reply: Reply<()>,
    },
    ArchiveFinished {
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
        result: BackendResult<()>,
        reply: Reply<()>,
    },
    Interrupt {
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
        reply: Reply<()>,
    },
    GenerateTitle {
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
        description: String,
        locale: Option<String>,
        reply: Reply<Option<String>>,
    },
    TitleFinished {
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
        result: BackendResult<String>,
        reply: Option<Reply<Option<String>>>,
    },
    SetActiveThread {
        workspace_id: WorkspaceId,
        thread_key: Option<ThreadKey>,
        reply: oneshot::Sender<()>,
    },
    SetCustomName {
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
        name: Option<String>,
        reply: oneshot::Sender<()>,
    },
    ResolveApproval {
        workspace_id: WorkspaceId,
        request_id: String,
        decision: ApprovalDecision,
        remember: bool,
        reply: oneshot::Sender<()>,
    },
    ResolveUserInput {
        workspace_id: WorkspaceId,
        request_id: String,
        answers: serde_json::Value,
        reply: oneshot::Sender<()>,
    },
    GetSnapshot {
        reply: oneshot::Sender<EngineSnapshot>,
    },
    GetThread {
        thread_key: ThreadKey,
        reply: oneshot::Sender<Option<ThreadState>>,
    },
}

pub struct Engine {
    config: EngineConfig,
    state: AppState,
    rev: u64,
    services: EngineServices,
    notices: broadcast::Sender<EngineNotice>,
    tx: mpsc::Sender<EngineCommand>,
    turns: TurnLifecycle,
    activity: ThreadActivityMap,
    loaded_threads: HashSet<ThreadKey>,
    titles_in_flight: HashSet<ThreadKey>,
    resume_generations: RequestGenerations<ThreadKey>,
    list_generations: RequestGenerations<WorkspaceId>,
    older_generations: RequestGenerations<WorkspaceId>,
}

impl Engine {
    pub fn start(
        config: EngineConfig,
        services: EngineServices,
    ) -> (EngineHandle, broadcast::Sender<EngineNotice>) {
        let (tx, mut rx) = mpsc::channel::<EngineCommand>(256);
        let (notices, _) = broadcast::channel::<EngineNotice>(256);

        let mut engine = Self {
            config,
            state: AppState::new(),
            rev: 0,
            services,
            notices: notices.clone(),
            tx: tx.clone(),
            turns: TurnLifecycle::new(),
            activity: ThreadActivityMap::default(),
            loaded_threads: HashSet::new(),
            titles_in_flight: HashSet::new(),
            resume_generations: RequestGenerations::default(),
            list_generations: RequestGenerations::default(),
            older_generations: RequestGenerations::default(),
        };

        tokio::spawn(async move {
            engine.bootstrap();
            while let Some(cmd) = rx.recv().await {
                engine.handle(cmd);
            }
        });

        (
            EngineHandle {
                tx,
                notices: notices.clone(),
            },
            notices,
        )
    }

    fn bootstrap(&mut self) {
        match self.services.activity.load() {
            Ok(restored) => {
                self.activity.reconcile(restored);
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to load thread activity");
            }
        }
    }

    fn handle(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Event { envelope, reply } => {
                self.handle_event(envelope);
                let _ = reply.send(());
            }
            EngineCommand::AddWorkspace { workspace, reply } => {
                self.add_workspace(workspace);
                let _ = reply.send(());
            }
            EngineCommand::RemoveWorkspace {
                workspace_id,
                reply,
            } => {
                self.remove_workspace(&workspace_id);
                let _ = reply.send(());
            }
            EngineCommand::StartThread {
                workspace_id,
                engine,
                reply,
            } => self.start_thread(workspace_id, engine, reply),
            EngineCommand::StartThreadFinished {
                workspace_id,
                placeholder,
                result,
                reply,
            } => self.finish_start_thread(workspace_id, placeholder, result, reply),
            EngineCommand::ResumeThread {
                workspace_id,
                thread_key,
                options,
                reply,
            } => self.resume_thread(workspace_id, thread_key, options, Some(reply)),
            EngineCommand::ResumeFinished {
                workspace_id,
                thread_key,
                generation,
                replace_local,
                result,
                reply,
            } => {
                let outcome =
                    self.finish_resume(workspace_id, thread_key, generation, replace_local, result);
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            EngineCommand::ListThreads {
                workspace_id,
                reply,
            } => self.list_threads(workspace_id, reply),
            EngineCommand::ListFinished {
                workspace_id,
                generation,
                primary,
                secondary,
                reply,
            } => {
                let outcome = self.finish_list(workspace_id, generation, primary, secondary);
                let _ = reply.send(outcome);
            }
            EngineCommand::LoadOlderThreads {
                workspace_id,
                reply,
            } => self.load_older_threads(workspace_id, reply),
            EngineCommand::OlderThreadsFinished {
                workspace_id,
                generation,
                result,
                reply,
            } => {
                let outcome = self.finish_older_threads(workspace_id, generation, result);
                let _ = reply.send(outcome);
            }
            EngineCommand::ForkThread {
                workspace_id,
                thread_key,
                reply,
            } => self.fork_thread(workspace_id, thread_key, reply),
            EngineCommand::ForkFinished {
                workspace_id,
                source,
                result,
                reply,
            } => {
                let forked = self.finish_fork(workspace_id, source, result);
                let _ = reply.send(forked);
            }
            EngineCommand::ArchiveThread {
                workspace_id,
                thread_key,
                reply,
            } => self.archive_thread(workspace_id, thread_key, reply),
            EngineCommand::ArchiveFinished {
                workspace_id,
                thread_key,
                result,
                reply,
            } => {
                let archived = self.finish_archive(workspace_id, thread_key, result);
                let _ = reply.send(archived);
            }
            EngineCommand::Interrupt {
                workspace_id,
                thread_key,
                reply,
            } => {
                let _ = reply.send(self.interrupt(workspace_id, thread_key));
            }
            EngineCommand::GenerateTitle {
                workspace_id,
                thread_key,
                description,
                locale,
                reply,
            } => self.generate_title(workspace_id, thread_key, description, locale, Some(reply)),
            EngineCommand::TitleFinished {
                workspace_id,
                thread_key,
                result,
                reply,
            } => {
                let explicit = reply.is_some();
                let title = self.finish_title(workspace_id, thread_key, result, explicit);
                if let Some(reply) = reply {
                    let _ = reply.send(title);
                }
            }
            EngineCommand::SetActiveThread {
                workspace_id,
                thread_key,
                reply,
            } => {
                let thread_key = thread_key.map(|key| self.state.resolve_thread_key(&key));
                self.dispatch(Action::SetActiveThread {
                    workspace_id,
                    thread_key,
                });
                let _ = reply.send(());
            }
            EngineCommand::SetCustomName {
                workspace_id,
                thread_key,
                name,
                reply,
            } => {
                let thread_key = self.state.resolve_thread_key(&thread_key);
                self.dispatch(Action::SetCustomName {
                    workspace_id,
                    thread_key,
                    name,
                });
                let _ = reply.send(());
            }
            EngineCommand::ResolveApproval {
                workspace_id,
                request_id,
                decision,
                remember,
                reply,
            } => {
                self.dispatch(Action::ResolveApproval {
                    workspace_id,
                    request_id,
                    decision,
                    remember,
                });
                let _ = reply.send(());
            }
            EngineCommand::ResolveUserInput {
                workspace_id,
                request_id,
                answers,
                reply,
            } => {
                self.dispatch(Action::ResolveUserInput {
                    workspace_id,
                    request_id,
                    answers,
                });
                let _ = reply.send(());
            }
            EngineCommand::GetSnapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            EngineCommand::GetThread { thread_key, reply } => {
                let thread_key = self.state.resolve_thread_key(&thread_key);
                let _ = reply.send(self.state.thread(&thread_key).cloned());
            }
        }
    }

    fn dispatch(&mut self, action: Action) {
        self.process_action_queue([action]);
    }

    fn process_action_queue(&mut self, initial: impl IntoIterator<Item = Action>) {
        let mut actions: VecDeque<Action> = initial.into_iter().collect();
        if actions.is_empty() {
            return;
        }
        let mut effects = VecDeque::<Effect>::new();

        while let Some(action) = actions.pop_front() {
            self.rev = self.rev.saturating_add(1);
            effects.extend(self.state.apply(action));

            while let Some(effect) = effects.pop_front() {
                if let Err(err) = self.run_effect(effect) {
                    tracing::error!(error = %err, "effect failed");
                }
            }
        }

        let _ = self.notices.send(EngineNotice::StateChanged { rev: self.rev });
    }

    fn run_effect(&self, effect: Effect) -> anyhow::Result<()> {
        match effect {
            Effect::RespondToApproval {
                workspace_id,
                request_id,
                decision,
            } => {
                let backend = self.services.backend.clone();
                tokio::spawn(async move {
                    if let Err(err) = backend
                        .respond_to_approval(&workspace_id, &request_id, decision)
                        .await
                    {
                        tracing::warn!(
                            workspace_id = %workspace_id,
                            request_id = %request_id,
                            error = %err,
                            "failed to answer approval"
                        );
                    }
                });
                Ok(())
            }
            Effect::RespondToUserInput {
                workspace_id,
                request_id,
                answers,
            } => {
                let backend = self.services.backend.clone();
                tokio::spawn(async move {
                    if let Err(err) = backend
                        .respond_to_user_input(&workspace_id, &request_id, &answers)
                        .await
                    {
                        tracing::warn!(
                            workspace_id = %workspace_id,
                            request_id = %request_id,
                            error = %err,
                            "failed to answer user input request"
                        );
                    }
                });
                Ok(())
            }
            Effect::StoreCustomName {
                workspace_id,
                thread_key,
                name,
            } => self
                .services
                .titles
                .save_name(&workspace_id, &thread_key, name.as_deref())
                .with_context(|| format!("failed to store title for {thread_key}")),
            Effect::RenameTitleMapping {
                workspace_id,
                from,
                to,
            } => self
                .services
                .titles
                .rename_key(&workspace_id, &from, &to)
                .with_context(|| format!("failed to move title from {from} to {to}")),
        }
    }

    fn run_turn_commands(&mut self, commands: Vec<TurnCommand>) {
        let mut actions = Vec::new();
        for command in commands {
            match command {
                TurnCommand::Dispatch(action) => actions.push(action),
                TurnCommand::Interrupt {
                    workspace_id,
                    thread_key,
                    turn_id,
                } => self.spawn_interrupt(workspace_id, thread_key, turn_id),
            }
        }
        self.process_action_queue(actions);
    }

    fn spawn_interrupt(&self, workspace_id: WorkspaceId, thread_key: ThreadKey, turn_id: String) {
        let backend = self.services.backend.clone();
        tokio::spawn(async move {
            if let Err(err) = backend
                .interrupt_turn(&workspace_id, &thread_key, &turn_id)
                .await
            {
                tracing::warn!(
                    workspace_id = %workspace_id,
                    thread_key = %thread_key,
                    turn_id = %turn_id,
                    error = %err,
                    "failed to interrupt turn"
                );
            }
        });
    }

    fn report_failure(&self, operation: &str, workspace_id: &WorkspaceId, err: &BackendError) {
        tracing::warn!(
            workspace_id = %workspace_id,
            operation,
            error = %err,
            "backend call failed"
        );
        self.services.debug.record(DebugEntry {
            kind: format!("{operation}_failed"),
            workspace_id: Some(workspace_id.to_string()),
            payload: serde_json::json!({ "error": err.to_string() }),
            at_ms: now_unix_ms(),
        });
    }

    fn record_activity(&mut self, workspace_id: &WorkspaceId, thread_key: &ThreadKey, at_ms: u64) {
        if at_ms > 0 && self.activity.record(workspace_id, thread_key, at_ms) {
            self.persist_activity();
        }
    }

    fn persist_activity(&self) {
        if let Err(err) = self.services.activity.save(&self.activity) {
            tracing::warn!(error = %err, "failed to persist thread activity");
        }
    }

    fn add_workspace(&mut self, workspace: Workspace) {
        let workspace_id = workspace.id.clone();
        let mut actions = vec![Action::AddWorkspace { workspace }];
        match self.services.titles.load(&workspace_id) {
            Ok(names) if !names.is_empty() => actions.push(Action::CustomNamesRestored {
                workspace_id,
                names,
            }),
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(workspace_id = %workspace_id, error = %err, "failed to load titles");
            }
        }
        self.process_action_queue(actions);
    }

    fn remove_workspace(&mut self, workspace_id: &WorkspaceId) {
        let keys: Vec<ThreadKey> = self
            .state
            .threads
            .values()
            .filter(|thread| &thread.workspace_id == workspace_id)
            .map(|thread| thread.key.clone())
            .collect();
        for key in &keys {
            self.loaded_threads.remove(key);
            self.titles_in_flight.remove(key);
        }
        self.dispatch(Action::RemoveWorkspace {
            workspace_id: workspace_id.clone(),
        });
        if self.activity.remove_workspace(workspace_id) {
            self.persist_activity();
        }
    }

    /// Moves a placeholder-keyed thread to `to` in the store and in every set the
    /// engine keys by thread. Returns the key the thread lives under afterwards.
    fn reconcile_thread(
        &mut self,
        workspace_id: &WorkspaceId,
        from: &ThreadKey,
        to: ThreadKey,
    ) -> Option<ThreadKey> {
        if !from.is_placeholder() || from == &to {
            return None;
        }
        if self.state.thread(from).is_none() {
            tracing::debug!(from = %from, to = %to, "rename source already gone");
            return None;
        }

        self.dispatch(Action::RenameThreadId {
            workspace_id: workspace_id.clone(),
            from: from.clone(),
            to: to.clone(),
        });

        self.turns.rename_thread(from, &to);
        self.resume_generations.rename(from, &to);
        if self.loaded_threads.remove(from) {
            self.loaded_threads.insert(to.clone());
        }
        if self.titles_in_flight.remove(from) {
            self.titles_in_flight.insert(to.clone());
        }
        if self.activity.rename(workspace_id, from, &to) {
            self.persist_activity();
        }
        tracing::debug!(workspace_id = %workspace_id, from = %from, to = %to, "thread renamed");
        Some(to)
    }

    fn start_thread(&mut self, workspace_id: WorkspaceId, engine: EngineKind, reply: Reply<ThreadKey>) {
        if self.state.workspace(&workspace_id).is_none() {
            let _ = reply.send(Err(anyhow::anyhow!("workspace not found")));
            return;
        }

        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(PLACEHOLDER_NONCE_LEN)
            .map(char::from)
            .collect();
        let placeholder = ThreadKey::placeholder(engine, now_unix_ms(), &nonce.to_ascii_lowercase());

        self.process_action_queue([
            Action::EnsureThread {
                workspace_id: workspace_id.clone(),
                thread_key: placeholder.clone(),
                engine,
            },
            Action::SetActiveThread {
                workspace_id: workspace_id.clone(),
                thread_key: Some(placeholder.clone()),
            },
            Action::MarkAutoTitlePending {
                workspace_id: workspace_id.clone(),
                thread_key: placeholder.clone(),
            },
        ]);

        let backend = self.services.backend.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = backend.start_thread(&workspace_id, engine).await;
            let _ = tx
                .send(EngineCommand::StartThreadFinished {
                    workspace_id,
                    placeholder,
                    result,
                    reply,
                })
                .await;
        });
    }

    fn finish_start_thread(
        &mut self,
        workspace_id: WorkspaceId,
        placeholder: ThreadKey,
        result: BackendResult<String>,
        reply: Reply<ThreadKey>,
    ) {
        // A session id update may have promoted the placeholder already.
        let current = self.state.resolve_thread_key(&placeholder);

        let thread_id = match result {
            Ok(thread_id) => thread_id,
            Err(err) => {
                self.report_failure("start_thread", &workspace_id, &err);
                self.dispatch(Action::HideThread {
                    workspace_id,
                    thread_key: current,
                });
                let _ = reply.send(Err(anyhow::Error::new(err).context("failed to start thread")));
                return;
            }
        };

        let Some(assigned) = backend_thread_key(placeholder.engine(), &thread_id) else {
            let _ = reply.send(Ok(current));
            return;
        };
        if assigned == current || !current.is_placeholder() {
            let _ = reply.send(Ok(current));
            return;
        }

        let key = self
            .reconcile_thread(&workspace_id, &current, assigned)
            .unwrap_or(current);
        let _ = reply.send(Ok(key));
    }

    fn resume_thread(
        &mut self,
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
        options: ResumeOptions,
        reply: Option<OutcomeReply<ThreadKey>>,
    ) {
        let thread_key = self.state.resolve_thread_key(&thread_key);
        let skip = thread_key.is_placeholder()
            || (!options.force && self.loaded_threads.contains(&thread_key));
        if skip {
            if let Some(reply) = reply {
                let _ = reply.send(RequestOutcome::Skipped);
            }
            return;
        }

        let generation = self.resume_generations.begin(&thread_key);
        let backend = self.services.backend.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = backend.resume_thread(&workspace_id, &thread_key).await;
            let _ = tx
                .send(EngineCommand::ResumeFinished {
                    workspace_id,
                    thread_key,
                    generation,
                    replace_local: options.replace_local,
                    result,
                    reply,
                })
                .await;
        });
    }

    fn finish_resume(
        &mut self,
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
        generation: u64,
        replace_local: bool,
        result: BackendResult<ThreadResumeResponse>,
    ) -> RequestOutcome<ThreadKey> {
        let thread_key = self.state.resolve_thread_key(&thread_key);
        if !self.resume_generations.is_current(&thread_key, generation) {
            tracing::debug!(thread_key = %thread_key, generation, "discarding stale resume");
            return RequestOutcome::Superseded;
        }

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                self.report_failure("resume_thread", &workspace_id, &err);
                return RequestOutcome::Failed(err.to_string());
            }
        };

        let server: Vec<ConversationItem> =
            response.items.into_iter().filter_map(normalize_item).collect();
        let local = self
            .state
            .thread(&thread_key)
            .map(|thread| thread.items.clone())
            .unwrap_or_default();
        let items = merge_items(&server, &local, replace_local);

        let mut actions = vec![
            Action::EnsureThread {
                workspace_id: workspace_id.clone(),
                thread_key: thread_key.clone(),
                engine: thread_key.engine(),
            },
            Action::SetThreadItems {
                thread_key: thread_key.clone(),
                items,
            },
        ];
        if let Some(name) = response
            .thread
            .name
            .filter(|name| !name.trim().is_empty())
        {
            actions.push(Action::SetThreadName {
                thread_key: thread_key.clone(),
                name,
            });
        }
        let updated_at_ms = normalize_timestamp_ms(response.thread.updated_at);
        if updated_at_ms > 0 {
            actions.push(Action::SetThreadTimestamp {
                thread_key: thread_key.clone(),
                at_ms: updated_at_ms,
            });
        }
        self.process_action_queue(actions);
        self.record_activity(&workspace_id, &thread_key, updated_at_ms);

        let running = self
            .state
            .thread(&thread_key)
            .is_some_and(|thread| thread.active_turn_id.is_some());
        if let Some(turn_id) = response.active_turn_id.filter(|id| !id.is_empty())
            && !running
        {
            let commands =
                self.turns
                    .turn_started(&workspace_id, &thread_key, &turn_id, now_unix_ms());
            self.run_turn_commands(commands);
        }

        self.loaded_threads.insert(thread_key.clone());
        RequestOutcome::Applied(thread_key)
    }

    fn list_threads(&mut self, workspace_id: WorkspaceId, reply: OutcomeReply<usize>) {
        let Some(workspace) = self.state.workspace(&workspace_id) else {
            let _ = reply.send(RequestOutcome::Failed("workspace not found".to_owned()));
            return;
        };
        let path = workspace.path.clone();

        let generation = self.list_generations.begin(&workspace_id);
        // A refresh replaces the list, so an older-page load in flight is stale.
        self.older_generations.begin(&workspace_id);
        self.process_action_queue([
            Action::SetThreadListLoading {
                workspace_id: workspace_id.clone(),
                loading: true,
            },
            Action::SetThreadListPaging {
                workspace_id: workspace_id.clone(),
                paging: false,
            },
        ]);

        let known_activity = self.activity.has_activity(&workspace_id);
        let limits = self.config.listing;
        let backend = self.services.backend.clone();
        let secondary_index = self.services.secondary_index.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let path_str = path.to_string_lossy().into_owned();
            let primary = collect_workspace_threads(
                backend.as_ref(),
                &workspace_id,
                &path_str,
                known_activity,
                limits,
                None,
                std::iter::empty(),
            );
            let secondary = async {
                match &secondary_index {
                    Some(index) => collect_secondary_threads(index.as_ref(), &path).await,
                    None => Vec::new(),
                }
            };
            let (primary, secondary) = tokio::join!(primary, secondary);
            let _ = tx
                .send(EngineCommand::ListFinished {
                    workspace_id,
                    generation,
                    primary,
                    secondary,
                    reply,
                })
                .await;
        });
    }

    fn finish_list(
        &mut self,
        workspace_id: WorkspaceId,
        generation: u64,
        primary: BackendResult<ListOutcome>,
        secondary: Vec<ListedThread>,
    ) -> RequestOutcome<usize> {
        // The newer request owns the loading flag.
        if !self.list_generations.is_current(&workspace_id, generation) {
            tracing::debug!(workspace_id = %workspace_id, generation, "discarding stale thread list");
            return RequestOutcome::Superseded;
        }

        let outcome = match primary {
            Ok(outcome) => outcome,
            Err(err) => {
                self.report_failure("list_threads", &workspace_id, &err);
                self.dispatch(Action::SetThreadListLoading {
                    workspace_id,
                    loading: false,
                });
                return RequestOutcome::Failed(err.to_string());
            }
        };

        self.fold_listed_activity(&workspace_id, outcome.matches.iter().chain(&secondary));

        let primary_rows = self.summarize(&workspace_id, &outcome.matches);
        let secondary_rows = self.summarize(&workspace_id, &secondary);
        let mut rows = merge_secondary_threads(primary_rows, secondary_rows);
        sort_by_activity(&mut rows, self.activity.workspace(&workspace_id));
        let count = rows.len();

        self.process_action_queue([
            Action::SetThreads {
                workspace_id: workspace_id.clone(),
                threads: rows,
            },
            Action::SetThreadListCursor {
                workspace_id: workspace_id.clone(),
                cursor: outcome.cursor,
            },
            Action::SetThreadListLoading {
                workspace_id,
                loading: false,
            },
        ]);
        RequestOutcome::Applied(count)
    }

    fn load_older_threads(&mut self, workspace_id: WorkspaceId, reply: OutcomeReply<usize>) {
        let Some(workspace) = self.state.workspace(&workspace_id) else {
            let _ = reply.send(RequestOutcome::Failed("workspace not found".to_owned()));
            return;
        };
        let path = workspace.path.to_string_lossy().into_owned();
        let Some(list) = self.state.workspace_threads(&workspace_id) else {
            let _ = reply.send(RequestOutcome::Skipped);
            return;
        };
        let Some(cursor) = list.cursor.clone() else {
            let _ = reply.send(RequestOutcome::Skipped);
            return;
        };
        let skip: Vec<ThreadKey> = list.threads.iter().map(|row| row.key.clone()).collect();

        let generation = self.older_generations.begin(&workspace_id);
        self.dispatch(Action::SetThreadListPaging {
            workspace_id: workspace_id.clone(),
            paging: true,
        });

        let known_activity = self.activity.has_activity(&workspace_id);
        let limits = self.config.listing;
        let backend = self.services.backend.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = collect_workspace_threads(
                backend.as_ref(),
                &workspace_id,
                &path,
                known_activity,
                limits,
                Some(cursor),
                skip,
            )
            .await;
            let _ = tx
                .send(EngineCommand::OlderThreadsFinished {
                    workspace_id,
                    generation,
                    result,
                    reply,
                })
                .await;
        });
    }

    fn finish_older_threads(
        &mut self,
        workspace_id: WorkspaceId,
        generation: u64,
        result: BackendResult<ListOutcome>,
    ) -> RequestOutcome<usize> {
        if !self.older_generations.is_current(&workspace_id, generation) {
            tracing::debug!(workspace_id = %workspace_id, generation, "discarding stale older page");
            return RequestOutcome::Superseded;
        }

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                self.report_failure("list_older_threads", &workspace_id, &err);
                self.dispatch(Action::SetThreadListPaging {
                    workspace_id,
                    paging: false,
                });
                return RequestOutcome::Failed(err.to_string());
            }
        };

        self.fold_listed_activity(&workspace_id, outcome.matches.iter());
        let mut rows = self.summarize(&workspace_id, &outcome.matches);
        sort_by_activity(&mut rows, self.activity.workspace(&workspace_id));

        let before = self.state.visible_threads(&workspace_id).len();
        self.process_action_queue([
            Action::AppendThreads {
                workspace_id: workspace_id.clone(),
                threads: rows,
            },
            Action::SetThreadListCursor {
                workspace_id: workspace_id.clone(),
                cursor: outcome.cursor,
            },
            Action::SetThreadListPaging {
                workspace_id: workspace_id.clone(),
                paging: false,
            },
        ]);
        let after = self.state.visible_threads(&workspace_id).len();
        RequestOutcome::Applied(after.saturating_sub(before))
    }

    fn fold_listed_activity<'a>(
        &mut self,
        workspace_id: &WorkspaceId,
        entries: impl Iterator<Item = &'a ListedThread>,
    ) {
        let mut changed = false;
        for entry in entries {
            if entry.updated_at_ms > 0 {
                changed |= self
                    .activity
                    .record(workspace_id, &entry.key, entry.updated_at_ms);
            }
        }
        if changed {
            self.persist_activity();
        }
    }

    fn summarize(&self, workspace_id: &WorkspaceId, entries: &[ListedThread]) -> Vec<ThreadSummary> {
        entries
            .iter()
            .map(|entry| {
                summarize_listed_thread(entry, self.state.custom_name(workspace_id, &entry.key))
            })
            .collect()
    }

    fn fork_thread(&mut self, workspace_id: WorkspaceId, thread_key: ThreadKey, reply: Reply<ThreadKey>) {
        let source = self.state.resolve_thread_key(&thread_key);
        if source.is_placeholder() {
            let _ = reply.send(Err(anyhow::anyhow!(
                "thread {source} has no session to fork yet"
            )));
            return;
        }

        let backend = self.services.backend.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = backend.fork_thread(&workspace_id, &source).await;
            let _ = tx
                .send(EngineCommand::ForkFinished {
                    workspace_id,
                    source,
                    result,
                    reply,
                })
                .await;
        });
    }

    fn finish_fork(
        &mut self,
        workspace_id: WorkspaceId,
        source: ThreadKey,
        result: BackendResult<String>,
    ) -> anyhow::Result<ThreadKey> {
        let thread_id = match result {
            Ok(thread_id) => thread_id,
            Err(err) => {
                self.report_failure("fork_thread", &workspace_id, &err);
                return Err(anyhow::Error::new(err).context("failed to fork thread"));
            }
        };
        let key = backend_thread_key(source.engine(), &thread_id)
            .context("backend returned an empty thread id")?;

        self.process_action_queue([
            Action::EnsureThread {
                workspace_id: workspace_id.clone(),
                thread_key: key.clone(),
                engine: key.engine(),
            },
            Action::SetActiveThread {
                workspace_id: workspace_id.clone(),
                thread_key: Some(key.clone()),
            },
        ]);
        self.resume_thread(
            workspace_id,
            key.clone(),
            ResumeOptions {
                force: true,
                replace_local: true,
            },
            None,
        );
        Ok(key)
    }

    fn archive_thread(&mut self, workspace_id: WorkspaceId, thread_key: ThreadKey, reply: Reply<()>) {
        let thread_key = self.state.resolve_thread_key(&thread_key);
        let backend = self.services.backend.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = backend.archive_thread(&workspace_id, &thread_key).await;
            let _ = tx
                .send(EngineCommand::ArchiveFinished {
                    workspace_id,
                    thread_key,
                    result,
                    reply,
                })
                .await;
        });
    }

    fn finish_archive(
        &mut self,
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
        result: BackendResult<()>,
    ) -> anyhow::Result<()> {
        if let Err(err) = result {
            self.report_failure("archive_thread", &workspace_id, &err);
            return Err(anyhow::Error::new(err).context("failed to archive thread"));
        }
        let thread_key = self.state.resolve_thread_key(&thread_key);
        self.loaded_threads.remove(&thread_key);
        self.dispatch(Action::HideThread {
            workspace_id,
            thread_key,
        });
        Ok(())
    }

    fn interrupt(&mut self, workspace_id: WorkspaceId, thread_key: ThreadKey) -> anyhow::Result<()> {
        let thread_key = self.state.resolve_thread_key(&thread_key);
        let thread = self
            .state
            .thread(&thread_key)
            .with_context(|| format!("thread {thread_key} not found"))?;
        let active_turn_id = thread.active_turn_id.clone();

        let commands =
            self.turns
                .request_interrupt(&workspace_id, &thread_key, active_turn_id.as_deref());
        self.run_turn_commands(commands);
        Ok(())
    }

    fn generate_title(
        &mut self,
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
        description: String,
        locale: Option<String>,
        reply: Option<Reply<Option<String>>>,
    ) {
        let thread_key = self.state.resolve_thread_key(&thread_key);
        self.titles_in_flight.insert(thread_key.clone());

        let timeout = self.config.title_timeout;
        let backend = self.services.backend.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let call = backend.generate_thread_title(
                &workspace_id,
                &thread_key,
                &description,
                locale.as_deref(),
            );
            let result = match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout(timeout)),
            };
            let _ = tx
                .send(EngineCommand::TitleFinished {
                    workspace_id,
                    thread_key,
                    result,
                    reply,
                })
                .await;
        });
    }

    /// An explicitly requested title replaces the current name; an automatic one
    /// never overrides a name the operator set meanwhile.
    fn finish_title(
        &mut self,
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
        result: BackendResult<String>,
        explicit: bool,
    ) -> anyhow::Result<Option<String>> {
        let thread_key = self.state.resolve_thread_key(&thread_key);
        self.titles_in_flight.remove(&thread_key);

        let clear_pending = Action::ClearAutoTitlePending {
            workspace_id: workspace_id.clone(),
            thread_key: thread_key.clone(),
        };

        match result {
            Ok(title) => {
                let title = title.trim();
                let named = self.state.custom_name(&workspace_id, &thread_key).is_some();
                if title.is_empty() || (named && !explicit) {
                    self.dispatch(clear_pending);
                    return Ok(None);
                }
                let title = title.to_owned();
                self.dispatch(Action::SetCustomName {
                    workspace_id,
                    thread_key,
                    name: Some(title.clone()),
                });
                Ok(Some(title))
            }
            Err(BackendError::Timeout(after)) => {
                self.dispatch(clear_pending);
                tracing::warn!(
                    workspace_id = %workspace_id,
                    thread_key = %thread_key,
                    "title generation timed out"
                );
                let _ = self.notices.send(EngineNotice::TitleTimeout {
                    workspace_id,
                    thread_key,
                });
                Err(anyhow::anyhow!("title generation timed out after {after:?}"))
            }
            Err(err) => {
                self.dispatch(clear_pending);
                self.report_failure("generate_thread_title", &workspace_id, &err);
                let _ = self.notices.send(EngineNotice::TitleFailed {
                    workspace_id,
                    thread_key,
                    message: err.to_string(),
                });
                Err(anyhow::Error::new(err).context("failed to generate title"))
            }
        }
    }

    fn snapshot(&self) -> EngineSnapshot {
        let workspaces = self
            .state
            .workspaces
            .iter()
            .map(|workspace| {
                let list = self.state.workspace_threads(&workspace.id);
                let mut pending_interrupts: Vec<ThreadKey> = self
                    .turns
                    .pending_interrupts()
                    .filter(|key| {
                        self.state
                            .thread(key)
                            .is_some_and(|thread| thread.workspace_id == workspace.id)
                    })
                    .cloned()
                    .collect();
                pending_interrupts.sort_by(|a, b| a.as_str().cmp(b.as_str()));

                WorkspaceSnapshot {
                    workspace: workspace.clone(),
                    active_thread: self.state.active_thread_id(&workspace.id).cloned(),
                    active_items: self.state.active_items(&workspace.id).to_vec(),
                    threads: self.state.visible_threads(&workspace.id).to_vec(),
                    cursor: list.and_then(|list| list.cursor.clone()),
                    loading: list.is_some_and(|list| list.loading),
                    paging: list.is_some_and(|list| list.paging),
                    approvals: self.state.approvals_for(&workspace.id).cloned().collect(),
                    user_inputs: self.state.user_inputs_for(&workspace.id).cloned().collect(),
                    rate_limits: self.state.rate_limits(&workspace.id).cloned(),
                    pending_interrupts,
                }
            })
            .collect();

        EngineSnapshot {
            rev: self.rev,
            workspaces,
        }
    }
}

/// Key for an id the backend handed back for `engine`. Unprefixed ids belong
/// to the engine that was asked.
fn backend_thread_key(engine: EngineKind, raw: &str) -> Option<ThreadKey> {
    let raw = raw.trim();
    let parsed = ThreadKey::parse(raw)?;
    let prefixed = EngineKind::ALL
        .into_iter()
        .any(|candidate| raw.starts_with(&format!("{}:", candidate.as_str())));
    if parsed.is_placeholder() || prefixed {
        return Some(parsed);
    }
    Some(ThreadKey::durable(engine, raw))
}
