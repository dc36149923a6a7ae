use skein_domain::{ThreadKey, WorkspaceId};
use std::collections::HashMap;
use std::sync::Mutex;

/// Custom and generated thread titles, keyed by thread key.
pub trait TitleStore: Send + Sync {
    fn load(&self, workspace_id: &WorkspaceId) -> anyhow::Result<HashMap<ThreadKey, String>>;
    fn save_name(
        &self,
        workspace_id: &WorkspaceId,
        thread_key: &ThreadKey,
        name: Option<&str>,
    ) -> anyhow::Result<()>;
    fn rename_key(
        &self,
        workspace_id: &WorkspaceId,
        from: &ThreadKey,
        to: &ThreadKey,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryTitleStore {
    titles: Mutex<HashMap<WorkspaceId, HashMap<ThreadKey, String>>>,
}

impl MemoryTitleStore {
    fn with_titles<T>(
        &self,
        f: impl FnOnce(&mut HashMap<WorkspaceId, HashMap<ThreadKey, String>>) -> T,
    ) -> anyhow::Result<T> {
        let mut guard = self
            .titles
            .lock()
            .map_err(|_| anyhow::anyhow!("title store poisoned"))?;
        Ok(f(&mut guard))
    }
}

impl TitleStore for MemoryTitleStore {
    fn load(&self, workspace_id: &WorkspaceId) -> anyhow::Result<HashMap<ThreadKey, String>> {
        self.with_titles(|titles| titles.get(workspace_id).cloned().unwrap_or_default())
    }

    fn save_name(
        &self,
        workspace_id: &WorkspaceId,
        thread_key: &ThreadKey,
        name: Option<&str>,
    ) -> anyhow::Result<()> {
        self.with_titles(|titles| {
            let entries = titles.entry(workspace_id.clone()).or_default();
            match name {
                Some(name) => {
                    entries.insert(thread_key.clone(), name.to_owned());
                }
                None => {
                    entries.remove(thread_key);
                }
            }
        })
    }

    fn rename_key(
        &self,
        workspace_id: &WorkspaceId,
        from: &ThreadKey,
        to: &ThreadKey,
    ) -> anyhow::Result<()> {
        self.with_titles(|titles| {
            let Some(entries) = titles.get_mut(workspace_id) else {
                return;
            };
            if let Some(name) = entries.remove(from) {
                entries.entry(to.clone()).or_insert(name);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_moves_title_to_durable_key() {
        let store = MemoryTitleStore::default();
        let ws = WorkspaceId::new("ws");
        let from = ThreadKey::parse("claude-pending-1-a").unwrap();
        let to = ThreadKey::parse("claude:1").unwrap();
        store.save_name(&ws, &from, Some("Fix CI")).unwrap();
        store.rename_key(&ws, &from, &to).unwrap();

        let titles = store.load(&ws).unwrap();
        assert_eq!(titles.get(&to).map(String::as_str), Some("Fix CI"));
        assert!(!titles.contains_key(&from));
    }

    #[test]
    fn clearing_a_name_removes_it() {
        let store = MemoryTitleStore::default();
        let ws = WorkspaceId::new("ws");
        let key = ThreadKey::parse("claude:1").unwrap();
        store.save_name(&ws, &key, Some("x")).unwrap();
        store.save_name(&ws, &key, None).unwrap();
        assert!(store.load(&ws).unwrap().is_empty());
    }
}
