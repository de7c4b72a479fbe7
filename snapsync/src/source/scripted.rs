use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::PagedSource;
use crate::error::{SyncError, SyncResult};
use crate::snapshot::{Interval, Page};

/// A source that replays prepared results in order.
///
/// Once the script runs out, a request with a known `from` gets an empty,
/// final page `[from, from)`; a request without one gets a network error.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    script: Mutex<VecDeque<SyncResult<Page>>>,
    requests: Mutex<Vec<Option<DateTime<Utc>>>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source that returns `pages` in order.
    pub fn from_pages(pages: impl IntoIterator<Item = Page>) -> Self {
        let source = Self::new();
        for page in pages {
            source.push_page(page);
        }
        source
    }

    /// Appends a page to the script.
    pub fn push_page(&self, page: Page) {
        self.push(Ok(page));
    }

    /// Appends a failure to the script.
    pub fn push_error(&self, error: SyncError) {
        self.push(Err(error));
    }

    fn push(&self, result: SyncResult<Page>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(result);
    }

    /// The `from` argument of every request so far, oldest first.
    pub fn requests(&self) -> Vec<Option<DateTime<Utc>>> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of scripted results not yet returned.
    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl PagedSource for ScriptedSource {
    async fn request_page(&self, from: Option<DateTime<Utc>>) -> SyncResult<Page> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(from);

        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match (next, from) {
            (Some(result), _) => result,
            (None, Some(from)) => {
                debug!(%from, "Script exhausted, returning empty page");
                Ok(Page::empty(Interval::new(from, from)?, false))
            }
            (None, None) => Err(SyncError::network("scripted source is exhausted")),
        }
    }
}
