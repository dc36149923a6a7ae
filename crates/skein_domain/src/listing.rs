use crate::{DEFAULT_THREAD_NAME, ThreadKey, ThreadSummary, WorkspaceId};
use std::collections::{HashMap, HashSet};

pub const THREAD_LIST_PAGE_SIZE: usize = 20;
pub const THREAD_LIST_TARGET_MATCHES: usize = 20;
pub const THREAD_LIST_MAX_EMPTY_PAGES: usize = 5;
pub const THREAD_PREVIEW_MAX_CHARS: usize = 38;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ListingLimits {
    pub page_size: usize,
    pub target_matches: usize,
    pub max_empty_pages: usize,
}

impl Default for ListingLimits {
    fn default() -> Self {
        Self {
            page_size: THREAD_LIST_PAGE_SIZE,
            target_matches: THREAD_LIST_TARGET_MATCHES,
            max_empty_pages: THREAD_LIST_MAX_EMPTY_PAGES,
        }
    }
}

/// One entry of the provider-wide thread index.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ListedThread {
    pub key: ThreadKey,
    pub cwd: Option<String>,
    pub name: Option<String>,
    pub preview: Option<String>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ListProgress {
    Continue { cursor: String },
    Done,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ListOutcome {
    pub matches: Vec<ListedThread>,
    pub cursor: Option<String>,
    pub pages_fetched: usize,
}

/// Filters pages of the global index down to one workspace until enough matches
/// are collected, the cursor runs out, or (for a workspace with no recorded
/// activity) too many pages came back without a single match.
#[derive(Clone, Debug)]
pub struct ListAccumulator {
    workspace_path: String,
    known_activity: bool,
    limits: ListingLimits,
    seen: HashSet<ThreadKey>,
    matches: Vec<ListedThread>,
    cursor: Option<String>,
    pages_fetched: usize,
}

impl ListAccumulator {
    pub fn new(workspace_path: &str, known_activity: bool, limits: ListingLimits) -> Self {
        Self {
            workspace_path: normalize_workspace_path(workspace_path),
            known_activity,
            limits,
            seen: HashSet::new(),
            matches: Vec::new(),
            cursor: None,
            pages_fetched: 0,
        }
    }

    /// Keys already listed are neither matched nor counted.
    pub fn skip_existing(mut self, keys: impl IntoIterator<Item = ThreadKey>) -> Self {
        self.seen.extend(keys);
        self
    }

    pub fn push_page(
        &mut self,
        entries: Vec<ListedThread>,
        next_cursor: Option<String>,
    ) -> ListProgress {
        self.pages_fetched = self.pages_fetched.saturating_add(1);

        for entry in entries {
            let in_workspace = entry
                .cwd
                .as_deref()
                .is_some_and(|cwd| normalize_workspace_path(cwd) == self.workspace_path);
            if !in_workspace {
                continue;
            }
            if self.seen.insert(entry.key.clone()) {
                self.matches.push(entry);
            }
        }

        self.cursor = next_cursor.filter(|cursor| !cursor.trim().is_empty());

        if self.matches.len() >= self.limits.target_matches {
            return ListProgress::Done;
        }
        let Some(cursor) = self.cursor.clone() else {
            return ListProgress::Done;
        };
        if !self.known_activity
            && self.matches.is_empty()
            && self.pages_fetched >= self.limits.max_empty_pages
        {
            return ListProgress::Done;
        }
        ListProgress::Continue { cursor }
    }

    pub fn into_outcome(self) -> ListOutcome {
        ListOutcome {
            matches: self.matches,
            cursor: self.cursor,
            pages_fetched: self.pages_fetched,
        }
    }
}

/// Trims whitespace and trailing separators and unifies separators to `/`.
/// Comparison stays case-sensitive.
pub fn normalize_workspace_path(raw: &str) -> String {
    let mut out = raw.trim().replace('\\', "/");
    while out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Backends report either unix seconds or milliseconds.
pub fn normalize_timestamp_ms(raw: u64) -> u64 {
    const SECONDS_CEILING: u64 = 10_000_000_000;
    if raw > 0 && raw < SECONDS_CEILING {
        raw.saturating_mul(1000)
    } else {
        raw
    }
}

pub fn thread_display_name(
    custom_name: Option<&str>,
    name: Option<&str>,
    preview: Option<&str>,
) -> String {
    fn non_empty(value: Option<&str>) -> Option<&str> {
        value.map(str::trim).filter(|v| !v.is_empty())
    }

    if let Some(custom) = non_empty(custom_name) {
        return custom.to_owned();
    }
    if let Some(name) = non_empty(name) {
        return name.to_owned();
    }
    if let Some(preview) = non_empty(preview) {
        let preview = preview.lines().next().unwrap_or(preview).trim();
        if preview.chars().count() > THREAD_PREVIEW_MAX_CHARS {
            let mut out: String = preview.chars().take(THREAD_PREVIEW_MAX_CHARS).collect();
            out.push('…');
            return out;
        }
        return preview.to_owned();
    }
    DEFAULT_THREAD_NAME.to_owned()
}

pub fn summarize_listed_thread(entry: &ListedThread, custom_name: Option<&str>) -> ThreadSummary {
    ThreadSummary {
        key: entry.key.clone(),
        name: thread_display_name(custom_name, entry.name.as_deref(), entry.preview.as_deref()),
        engine: entry.key.engine(),
        created_at_ms: entry.created_at_ms,
        updated_at_ms: entry.updated_at_ms,
    }
}

pub fn activity_sort_key(summary: &ThreadSummary, activity: Option<&HashMap<ThreadKey, u64>>) -> u64 {
    let recorded = activity
        .and_then(|map| map.get(&summary.key))
        .copied()
        .unwrap_or(0);
    recorded.max(summary.created_at_ms)
}

/// Most recent first; ties fall back to the key so the order is stable.
pub fn sort_by_activity(summaries: &mut [ThreadSummary], activity: Option<&HashMap<ThreadKey, u64>>) {
    summaries.sort_by(|a, b| {
        activity_sort_key(b, activity)
            .cmp(&activity_sort_key(a, activity))
            .then_with(|| a.key.as_str().cmp(b.key.as_str()))
    });
}

/// Primary entries win on duplicate keys.
pub fn merge_secondary_threads(
    mut primary: Vec<ThreadSummary>,
    secondary: Vec<ThreadSummary>,
) -> Vec<ThreadSummary> {
    let known: HashSet<ThreadKey> = primary.iter().map(|s| s.key.clone()).collect();
    let mut added = HashSet::new();
    for summary in secondary {
        if known.contains(&summary.key) || !added.insert(summary.key.clone()) {
            continue;
        }
        primary.push(summary);
    }
    primary
}

/// Last observed activity per thread, per workspace. Values only move forward.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ThreadActivityMap {
    by_workspace: HashMap<WorkspaceId, HashMap<ThreadKey, u64>>,
}

impl ThreadActivityMap {
    /// Returns whether the stored value changed.
    pub fn record(&mut self, workspace_id: &WorkspaceId, key: &ThreadKey, at_ms: u64) -> bool {
        let entries = self.by_workspace.entry(workspace_id.clone()).or_default();
        match entries.get(key) {
            Some(existing) if *existing >= at_ms => false,
            _ => {
                entries.insert(key.clone(), at_ms);
                true
            }
        }
    }

    pub fn get(&self, workspace_id: &WorkspaceId, key: &ThreadKey) -> Option<u64> {
        self.by_workspace.get(workspace_id)?.get(key).copied()
    }

    pub fn workspace(&self, workspace_id: &WorkspaceId) -> Option<&HashMap<ThreadKey, u64>> {
        self.by_workspace.get(workspace_id)
    }

    pub fn has_activity(&self, workspace_id: &WorkspaceId) -> bool {
        self.by_workspace
            .get(workspace_id)
            .is_some_and(|entries| !entries.is_empty())
    }

    pub fn rename(&mut self, workspace_id: &WorkspaceId, from: &ThreadKey, to: &ThreadKey) -> bool {
        let Some(entries) = self.by_workspace.get_mut(workspace_id) else {
            return false;
        };
        let Some(at_ms) = entries.remove(from) else {
            return false;
        };
        let slot = entries.entry(to.clone()).or_insert(at_ms);
        *slot = (*slot).max(at_ms);
        true
    }

    /// Folds a restored map in without letting older values win.
    pub fn reconcile(&mut self, restored: ThreadActivityMap) -> bool {
        let mut changed = false;
        for (workspace_id, entries) in restored.by_workspace {
            for (key, at_ms) in entries {
                changed |= self.record(&workspace_id, &key, at_ms);
            }
        }
        changed
    }

    pub fn remove_workspace(&mut self, workspace_id: &WorkspaceId) -> bool {
        self.by_workspace.remove(workspace_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listed(id: &str, cwd: &str, created_at_ms: u64) -> ListedThread {
        ListedThread {
            key: ThreadKey::parse(id).unwrap(),
            cwd: Some(cwd.to_owned()),
            name: None,
            preview: Some(format!("preview {id}")),
            created_at_ms,
            updated_at_ms: created_at_ms,
        }
    }

    fn summary(id: &str, created_at_ms: u64) -> ThreadSummary {
        summarize_listed_thread(&listed(id, "/repo", created_at_ms), None)
    }

    #[test]
    fn path_normalization_trims_trailing_separators() {
        assert_eq!(normalize_workspace_path("/repo/"), "/repo");
        assert_eq!(normalize_workspace_path(" /repo// "), "/repo");
        assert_eq!(normalize_workspace_path("C:\\work\\repo\\"), "C:/work/repo");
        assert_eq!(normalize_workspace_path("/"), "/");
    }

    #[test]
    fn accumulator_stops_once_target_is_reached() {
        let limits = ListingLimits {
            page_size: 3,
            target_matches: 2,
            max_empty_pages: 5,
        };
        let mut acc = ListAccumulator::new("/repo", false, limits);
        let progress = acc.push_page(
            vec![listed("a", "/repo", 1), listed("b", "/other", 2), listed("c", "/repo/", 3)],
            Some("next".to_owned()),
        );
        assert_eq!(progress, ListProgress::Done);
        let outcome = acc.into_outcome();
        let keys: Vec<_> = outcome.matches.iter().map(|m| m.key.session_id().unwrap()).collect();
        assert_eq!(keys, vec!["a", "c"]);
        assert_eq!(outcome.cursor.as_deref(), Some("next"));
    }

    #[test]
    fn accumulator_dedupes_by_key_first_wins() {
        let mut acc = ListAccumulator::new("/repo", true, ListingLimits::default());
        acc.push_page(vec![listed("a", "/repo", 1)], Some("c1".to_owned()));
        acc.push_page(vec![listed("a", "/repo", 99)], None);
        let outcome = acc.into_outcome();
        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].created_at_ms, 1);
        assert_eq!(outcome.cursor, None);
    }

    #[test]
    fn safety_bound_applies_only_without_prior_activity() {
        let limits = ListingLimits::default();
        let mut fresh = ListAccumulator::new("/repo", false, limits);
        let mut known = ListAccumulator::new("/repo", true, limits);
        for page in 0..limits.max_empty_pages {
            let entries: Vec<_> = (0..limits.page_size)
                .map(|i| listed(&format!("x-{page}-{i}"), "/elsewhere", 1))
                .collect();
            let cursor = Some(format!("cursor-{page}"));
            let fresh_progress = fresh.push_page(entries.clone(), cursor.clone());
            let known_progress = known.push_page(entries, cursor);
            if page + 1 < limits.max_empty_pages {
                assert!(matches!(fresh_progress, ListProgress::Continue { .. }));
            } else {
                assert_eq!(fresh_progress, ListProgress::Done);
            }
            assert!(matches!(known_progress, ListProgress::Continue { .. }));
        }
        let outcome = fresh.into_outcome();
        assert!(outcome.matches.is_empty());
        assert_eq!(outcome.pages_fetched, 5);
        assert_eq!(outcome.cursor.as_deref(), Some("cursor-4"));
    }

    #[test]
    fn skip_existing_only_collects_new_keys() {
        let mut acc = ListAccumulator::new("/repo", true, ListingLimits::default())
            .skip_existing([ThreadKey::parse("a").unwrap()]);
        acc.push_page(vec![listed("a", "/repo", 1), listed("b", "/repo", 2)], None);
        let outcome = acc.into_outcome();
        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].key.session_id(), Some("b"));
    }

    #[test]
    fn display_name_prefers_custom_then_name_then_preview() {
        assert_eq!(thread_display_name(Some("Mine"), Some("Server"), None), "Mine");
        assert_eq!(thread_display_name(Some("  "), Some("Server"), None), "Server");
        assert_eq!(thread_display_name(None, None, Some("fix the\nbuild")), "fix the");
        assert_eq!(thread_display_name(None, None, None), DEFAULT_THREAD_NAME);
        let long = "x".repeat(50);
        let name = thread_display_name(None, None, Some(&long));
        assert_eq!(name.chars().count(), THREAD_PREVIEW_MAX_CHARS + 1);
        assert!(name.ends_with('…'));
    }

    #[test]
    fn observed_activity_outranks_creation_time() {
        let mut summaries = vec![summary("old", 100), summary("new", 200)];
        let mut activity = HashMap::new();
        activity.insert(ThreadKey::parse("old").unwrap(), 500);
        sort_by_activity(&mut summaries, Some(&activity));
        let keys: Vec<_> = summaries.iter().map(|s| s.key.session_id().unwrap()).collect();
        assert_eq!(keys, vec!["old", "new"]);

        sort_by_activity(&mut summaries, None);
        let keys: Vec<_> = summaries.iter().map(|s| s.key.session_id().unwrap()).collect();
        assert_eq!(keys, vec!["new", "old"]);
    }

    #[test]
    fn secondary_entries_do_not_shadow_primary() {
        let primary = vec![summary("a", 1)];
        let mut dup = summary("a", 9);
        dup.name = "secondary".to_owned();
        let merged = merge_secondary_threads(primary, vec![dup, summary("b", 2), summary("b", 3)]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].created_at_ms, 1);
        assert_eq!(merged[1].key, ThreadKey::parse("b").unwrap());
    }

    #[test]
    fn activity_map_only_moves_forward() {
        let ws = WorkspaceId::new("ws");
        let key = ThreadKey::parse("a").unwrap();
        let mut map = ThreadActivityMap::default();
        assert!(!map.has_activity(&ws));
        assert!(map.record(&ws, &key, 10));
        assert!(!map.record(&ws, &key, 10));
        assert!(!map.record(&ws, &key, 5));
        assert!(map.record(&ws, &key, 11));
        assert_eq!(map.get(&ws, &key), Some(11));

        let mut restored = ThreadActivityMap::default();
        restored.record(&ws, &key, 3);
        assert!(!map.reconcile(restored));
        assert_eq!(map.get(&ws, &key), Some(11));
    }

    #[test]
    fn activity_map_rename_moves_entry() {
        let ws = WorkspaceId::new("ws");
        let from = ThreadKey::parse("claude-pending-1-x").unwrap();
        let to = ThreadKey::parse("claude:1").unwrap();
        let mut map = ThreadActivityMap::default();
        map.record(&ws, &from, 7);
        assert!(map.rename(&ws, &from, &to));
        assert_eq!(map.get(&ws, &from), None);
        assert_eq!(map.get(&ws, &to), Some(7));
    }

    #[test]
    fn activity_map_round_trips_through_json() {
        let ws = WorkspaceId::new("ws");
        let mut map = ThreadActivityMap::default();
        map.record(&ws, &ThreadKey::parse("claude:1").unwrap(), 7);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"ws":{"claude:1":7}}"#);
        let back: ThreadActivityMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn timestamps_in_seconds_are_scaled() {
        assert_eq!(normalize_timestamp_ms(1_700_000_000), 1_700_000_000_000);
        assert_eq!(normalize_timestamp_ms(1_700_000_000_000), 1_700_000_000_000);
        assert_eq!(normalize_timestamp_ms(0), 0);
    }
}
