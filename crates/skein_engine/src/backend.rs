use async_trait::async_trait;
use serde_json::Value;
use skein_api::{SessionRecord, ThreadListPage, ThreadResumeResponse};
use skein_domain::{ApprovalDecision, EngineKind, ThreadKey, WorkspaceId};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Calls this core issues against the engine connection of a workspace.
#[async_trait]
pub trait ThreadBackend: Send + Sync {
    /// Returns the thread id the backend assigned, which may still be a
    /// placeholder when the session id is only confirmed later by
    /// `thread/sessionIdUpdated`.
    async fn start_thread(
        &self,
        workspace_id: &WorkspaceId,
        engine: EngineKind,
    ) -> BackendResult<String>;

    async fn resume_thread(
        &self,
        workspace_id: &WorkspaceId,
        thread_key: &ThreadKey,
    ) -> BackendResult<ThreadResumeResponse>;

    async fn list_threads(
        &self,
        workspace_id: &WorkspaceId,
        cursor: Option<&str>,
        page_size: usize,
    ) -> BackendResult<ThreadListPage>;

    async fn fork_thread(
        &self,
        workspace_id: &WorkspaceId,
        thread_key: &ThreadKey,
    ) -> BackendResult<String>;

    async fn archive_thread(
        &self,
        workspace_id: &WorkspaceId,
        thread_key: &ThreadKey,
    ) -> BackendResult<()>;

    async fn interrupt_turn(
        &self,
        workspace_id: &WorkspaceId,
        thread_key: &ThreadKey,
        turn_id: &str,
    ) -> BackendResult<()>;

    async fn generate_thread_title(
        &self,
        workspace_id: &WorkspaceId,
        thread_key: &ThreadKey,
        description: &str,
        locale: Option<&str>,
    ) -> BackendResult<String>;

    async fn respond_to_approval(
        &self,
        workspace_id: &WorkspaceId,
        request_id: &str,
        decision: ApprovalDecision,
    ) -> BackendResult<()>;

    async fn respond_to_user_input(
        &self,
        workspace_id: &WorkspaceId,
        request_id: &str,
        answers: &Value,
    ) -> BackendResult<()>;
}

/// Session list kept by an engine itself, independent of the thread index.
#[async_trait]
pub trait SessionIndex: Send + Sync {
    fn engine(&self) -> EngineKind;

    async fn list_sessions(&self, workspace_path: &Path) -> BackendResult<Vec<SessionRecord>>;
}

/// Backend with no connection. Every call fails as unavailable.
#[derive(Clone, Copy, Debug, Default)]
pub struct OfflineBackend;

fn offline<T>() -> BackendResult<T> {
    Err(BackendError::Unavailable("offline".to_owned()))
}

#[async_trait]
impl ThreadBackend for OfflineBackend {
    async fn start_thread(&self, _: &WorkspaceId, _: EngineKind) -> BackendResult<String> {
        offline()
    }

    async fn resume_thread(
        &self,
        _: &WorkspaceId,
        _: &ThreadKey,
    ) -> BackendResult<ThreadResumeResponse> {
        offline()
    }

    async fn list_threads(
        &self,
        _: &WorkspaceId,
        _: Option<&str>,
        _: usize,
    ) -> BackendResult<ThreadListPage> {
        offline()
    }

    async fn fork_thread(&self, _: &WorkspaceId, _: &ThreadKey) -> BackendResult<String> {
        offline()
    }

    async fn archive_thread(&self, _: &WorkspaceId, _: &ThreadKey) -> BackendResult<()> {
        offline()
    }

    async fn interrupt_turn(&self, _: &WorkspaceId, _: &ThreadKey, _: &str) -> BackendResult<()> {
        offline()
    }

    async fn generate_thread_title(
        &self,
        _: &WorkspaceId,
        _: &ThreadKey,
        _: &str,
        _: Option<&str>,
    ) -> BackendResult<String> {
        offline()
    }

    async fn respond_to_approval(
        &self,
        _: &WorkspaceId,
        _: &str,
        _: ApprovalDecision,
    ) -> BackendResult<()> {
        offline()
    }

    async fn respond_to_user_input(&self, _: &WorkspaceId, _: &str, _: &Value) -> BackendResult<()> {
        offline()
    }
}
