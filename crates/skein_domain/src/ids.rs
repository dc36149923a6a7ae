use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Claude,
    Codex,
    Gemini,
    Opencode,
}

impl EngineKind {
    pub const ALL: [EngineKind; 4] = [
        EngineKind::Claude,
        EngineKind::Codex,
        EngineKind::Gemini,
        EngineKind::Opencode,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
            Self::Opencode => "opencode",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|engine| raw.eq_ignore_ascii_case(engine.as_str()))
    }

    fn placeholder_prefix(self) -> String {
        format!("{}-pending-", self.as_str())
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkspaceId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ThreadKeyKind {
    Placeholder,
    Durable,
}

/// Identifier of a thread, either minted locally before the backend confirms a
/// session (`claude-pending-…`) or assigned by it (`claude:<session>`).
///
/// The string form only exists at the boundary: `raw` is what collaborators see,
/// `engine` and `kind` are derived from it once at parse time.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ThreadKey {
    engine: EngineKind,
    kind: ThreadKeyKind,
    raw: String,
}

impl ThreadKey {
    /// Bare ids without an engine prefix are codex thread ids and are stored in
    /// the prefixed form, so `abc` and `codex:abc` name the same thread.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        for engine in EngineKind::ALL {
            if let Some(rest) = raw.strip_prefix(&engine.placeholder_prefix())
                && !rest.is_empty()
            {
                return Some(Self {
                    engine,
                    kind: ThreadKeyKind::Placeholder,
                    raw: raw.to_owned(),
                });
            }
        }

        let prefixed = raw
            .split_once(':')
            .filter(|(_, rest)| !rest.is_empty())
            .and_then(|(prefix, rest)| Some((EngineKind::parse(prefix)?, rest)));

        Some(match prefixed {
            Some((engine, session_id)) => Self::durable(engine, session_id),
            None => Self::durable(EngineKind::Codex, raw),
        })
    }

    pub fn placeholder(engine: EngineKind, timestamp_ms: u64, nonce: &str) -> Self {
        Self {
            engine,
            kind: ThreadKeyKind::Placeholder,
            raw: format!("{}{timestamp_ms}-{nonce}", engine.placeholder_prefix()),
        }
    }

    pub fn durable(engine: EngineKind, session_id: &str) -> Self {
        let session_id = session_id.trim();
        let prefix = format!("{}:", engine.as_str());
        let session_id = session_id.strip_prefix(&prefix).unwrap_or(session_id);
        Self {
            engine,
            kind: ThreadKeyKind::Durable,
            raw: format!("{prefix}{session_id}"),
        }
    }

    pub fn engine(&self) -> EngineKind {
        self.engine
    }

    pub fn kind(&self) -> ThreadKeyKind {
        self.kind
    }

    pub fn is_placeholder(&self) -> bool {
        self.kind == ThreadKeyKind::Placeholder
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Server session id for prefixed durable keys.
    pub fn session_id(&self) -> Option<&str> {
        if self.is_placeholder() {
            return None;
        }
        let prefix = format!("{}:", self.engine.as_str());
        Some(self.raw.strip_prefix(&prefix).unwrap_or(&self.raw))
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl serde::Serialize for ThreadKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> serde::Deserialize<'de> for ThreadKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ThreadKey::parse(&raw).ok_or_else(|| serde::de::Error::custom("empty thread key"))
    }
}
