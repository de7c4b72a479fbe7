//! Paged snapshot sources.

#[cfg(feature = "http")]
mod lookback;
mod scripted;

#[cfg(feature = "http")]
pub use lookback::{default_start, LookbackConfig, LookbackSource, DEFAULT_PAGE_SIZE};
pub use scripted::ScriptedSource;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SyncResult;
use crate::snapshot::Page;

/// A source that returns snapshots in bounded, ordered pages.
#[async_trait]
pub trait PagedSource: Send + Sync {
    /// Requests the next page starting at `from`.
    ///
    /// `None` means the marker is unknown and the source should start from the
    /// beginning of its history. The returned interval must start at `from`
    /// when `from` is known.
    async fn request_page(&self, from: Option<DateTime<Utc>>) -> SyncResult<Page>;
}
