pub mod activity_store;
pub mod backend;
pub mod config;
pub mod debug;
pub mod engine;
mod generation;
pub mod listing;
pub mod router;
pub mod title_store;
mod time;

pub use activity_store::{ActivityStore, JsonFileActivityStore, MemoryActivityStore};
pub use backend::{BackendError, BackendResult, OfflineBackend, SessionIndex, ThreadBackend};
pub use config::EngineConfig;
pub use debug::{DebugEntry, DebugSink, MemoryDebugSink, TracingDebugSink};
pub use engine::{
    Engine, EngineHandle, EngineNotice, EngineServices, EngineSnapshot, RequestOutcome,
    ResumeOptions, WorkspaceSnapshot,
};
pub use title_store::{MemoryTitleStore, TitleStore};
