//! Prelude for commonly used types and traits in snapsync.

pub use crate::cache_key::{derive_key, CacheKey};
pub use crate::calculator::{
    CalculatorState, CountView, IncrementalCalculator, SnapshotCountCalculator,
};
pub use crate::clock::{Clock, FixedClock, SystemClock};
pub use crate::config::{SyncConfig, SyncConfigFile};
pub use crate::derive::{ConfiguredFields, DerivedFields, FieldDeriver};
pub use crate::error::{SyncError, SyncResult};
pub use crate::logging::LogConfig;
pub use crate::orchestrator::{Continuation, Phase, SessionStats, SyncHandle, SyncOrchestrator};
pub use crate::render::{
    ChannelSink, CollectingSink, FnRenderSink, LogSink, RenderEvent, RenderSink,
};
pub use crate::scope::{CalculatorConfig, ProjectScope, SyncScope, WorkspaceConfiguration};
pub use crate::snapshot::{Interval, Page, Snapshot};
pub use crate::source::{PagedSource, ScriptedSource};
pub use crate::store::{CacheStore, FileSystemCacheStore, InMemoryCacheStore};
