use crate::backend::{BackendResult, SessionIndex, ThreadBackend};
use skein_api::{SessionRecord, ThreadRecord};
use skein_domain::listing::normalize_workspace_path;
use skein_domain::{
    ListAccumulator, ListOutcome, ListProgress, ListedThread, ListingLimits, ThreadKey,
    WorkspaceId, normalize_timestamp_ms,
};
use std::path::Path;

/// One run of the page loop against the global thread index, starting at
/// `cursor` (`None` for the first page).
pub async fn collect_workspace_threads(
    backend: &dyn ThreadBackend,
    workspace_id: &WorkspaceId,
    workspace_path: &str,
    known_activity: bool,
    limits: ListingLimits,
    cursor: Option<String>,
    skip: impl IntoIterator<Item = ThreadKey>,
) -> BackendResult<ListOutcome> {
    let mut accumulator =
        ListAccumulator::new(workspace_path, known_activity, limits).skip_existing(skip);
    let mut cursor = cursor;

    loop {
        let page = backend
            .list_threads(workspace_id, cursor.as_deref(), limits.page_size)
            .await?;
        let entries = page.data.into_iter().filter_map(listed_thread).collect();

        match accumulator.push_page(entries, page.next_cursor) {
            ListProgress::Done => break,
            ListProgress::Continue { cursor: next } => {
                if cursor.as_deref() == Some(next.as_str()) {
                    tracing::debug!(
                        workspace_id = %workspace_id,
                        cursor = %next,
                        "thread index returned the same cursor twice"
                    );
                    break;
                }
                cursor = Some(next);
            }
        }
    }

    Ok(accumulator.into_outcome())
}

/// Sessions from the secondary index that belong to the workspace. Any failure
/// yields an empty list.
pub async fn collect_secondary_threads(
    index: &dyn SessionIndex,
    workspace_path: &Path,
) -> Vec<ListedThread> {
    let sessions = match index.list_sessions(workspace_path).await {
        Ok(sessions) => sessions,
        Err(err) => {
            tracing::debug!(
                engine = %index.engine(),
                path = %workspace_path.display(),
                error = %err,
                "secondary session index unavailable"
            );
            return Vec::new();
        }
    };

    let wanted = normalize_workspace_path(&workspace_path.to_string_lossy());
    sessions
        .into_iter()
        .filter(|session| {
            session
                .cwd
                .as_deref()
                .is_some_and(|cwd| normalize_workspace_path(cwd) == wanted)
        })
        .filter_map(|session| listed_session(index, session))
        .collect()
}

fn listed_thread(record: ThreadRecord) -> Option<ListedThread> {
    let Some(key) = ThreadKey::parse(&record.id) else {
        tracing::debug!(thread_id = %record.id, "skipping listed thread without id");
        return None;
    };
    Some(ListedThread {
        key,
        cwd: record.cwd,
        name: record.name,
        preview: record.preview,
        created_at_ms: normalize_timestamp_ms(record.created_at),
        updated_at_ms: normalize_timestamp_ms(record.updated_at),
    })
}

fn listed_session(index: &dyn SessionIndex, session: SessionRecord) -> Option<ListedThread> {
    let session_id = session.session_id.trim();
    if session_id.is_empty() {
        return None;
    }
    Some(ListedThread {
        key: ThreadKey::durable(index.engine(), session_id),
        cwd: session.cwd,
        name: session.title,
        preview: None,
        created_at_ms: normalize_timestamp_ms(session.created_at),
        updated_at_ms: normalize_timestamp_ms(session.updated_at),
    })
}
