use anyhow::Context as _;
use skein_domain::ThreadActivityMap;
use std::path::PathBuf;
use std::sync::Mutex;

pub trait ActivityStore: Send + Sync {
    fn load(&self) -> anyhow::Result<ThreadActivityMap>;
    fn save(&self, activity: &ThreadActivityMap) -> anyhow::Result<()>;
}

/// Activity map as a single JSON document, replaced atomically on save.
#[derive(Clone, Debug)]
pub struct JsonFileActivityStore {
    path: PathBuf,
}

impl JsonFileActivityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ActivityStore for JsonFileActivityStore {
    fn load(&self) -> anyhow::Result<ThreadActivityMap> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ThreadActivityMap::default());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read {}", self.path.display()));
            }
        };
        if raw.trim().is_empty() {
            return Ok(ThreadActivityMap::default());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", self.path.display()))
    }

    fn save(&self, activity: &ThreadActivityMap) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(activity).context("failed to encode activity")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, raw).with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryActivityStore {
    inner: Mutex<ThreadActivityMap>,
}

impl MemoryActivityStore {
    pub fn with_activity(activity: ThreadActivityMap) -> Self {
        Self {
            inner: Mutex::new(activity),
        }
    }
}

impl ActivityStore for MemoryActivityStore {
    fn load(&self) -> anyhow::Result<ThreadActivityMap> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("activity store poisoned"))?;
        Ok(guard.clone())
    }

    fn save(&self, activity: &ThreadActivityMap) -> anyhow::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("activity store poisoned"))?;
        *guard = activity.clone();
        Ok(())
    }
}
