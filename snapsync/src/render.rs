//! Render sinks receive the calculator's view after bootstrap and every merge.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::orchestrator::Phase;

/// What a sink is asked to show.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum RenderEvent<V> {
    /// The calculator was restored from cache or started cold.
    #[serde(rename_all = "camelCase")]
    Bootstrap {
        /// [`Phase::Restored`] or [`Phase::Cold`].
        phase: Phase,
        up_to_date: Option<DateTime<Utc>>,
        view: V,
    },
    /// A page was merged. `dirty` is false when the page held no snapshots.
    #[serde(rename_all = "camelCase")]
    Merged {
        dirty: bool,
        has_more: bool,
        up_to_date: Option<DateTime<Utc>>,
        view: V,
    },
    /// A page request failed; the session retries after `retry_in_ms`.
    #[serde(rename_all = "camelCase")]
    FetchFailed { message: String, retry_in_ms: u64 },
    /// The session hit a fatal error and stopped.
    Failed { message: String },
}

impl<V> RenderEvent<V> {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            RenderEvent::Bootstrap { .. } => "bootstrap",
            RenderEvent::Merged { .. } => "merged",
            RenderEvent::FetchFailed { .. } => "fetchFailed",
            RenderEvent::Failed { .. } => "failed",
        }
    }

    /// The view carried by this event, if any.
    pub fn view(&self) -> Option<&V> {
        match self {
            RenderEvent::Bootstrap { view, .. } | RenderEvent::Merged { view, .. } => Some(view),
            RenderEvent::FetchFailed { .. } | RenderEvent::Failed { .. } => None,
        }
    }

    /// True for a merge that brought in new snapshots.
    pub fn is_dirty(&self) -> bool {
        matches!(self, RenderEvent::Merged { dirty: true, .. })
    }
}

/// Consumer of render events. Called from the session task, never concurrently.
pub trait RenderSink<V>: Send {
    fn render(&mut self, event: &RenderEvent<V>);
}

/// Adapts a closure into a [`RenderSink`].
pub struct FnRenderSink<F>(pub F);

impl<V, F> RenderSink<V> for FnRenderSink<F>
where
    F: FnMut(&RenderEvent<V>) + Send,
{
    fn render(&mut self, event: &RenderEvent<V>) {
        (self.0)(event)
    }
}

/// Forwards every event to an unbounded channel.
pub struct ChannelSink<V> {
    tx: mpsc::UnboundedSender<RenderEvent<V>>,
}

impl<V> ChannelSink<V> {
    /// Creates a sink and the receiver its events arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RenderEvent<V>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl<V: Clone + Send> RenderSink<V> for ChannelSink<V> {
    fn render(&mut self, event: &RenderEvent<V>) {
        if self.tx.send(event.clone()).is_err() {
            debug!(event = event.name(), "Render receiver dropped");
        }
    }
}

/// Logs a summary of every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl<V> RenderSink<V> for LogSink {
    fn render(&mut self, event: &RenderEvent<V>) {
        match event {
            RenderEvent::Bootstrap {
                phase, up_to_date, ..
            } => info!(%phase, ?up_to_date, "Calculator bootstrapped"),
            RenderEvent::Merged {
                dirty,
                has_more,
                up_to_date,
                ..
            } => info!(dirty, has_more, ?up_to_date, "Page merged"),
            RenderEvent::FetchFailed {
                message,
                retry_in_ms,
            } => warn!(%message, retry_in_ms, "Page fetch failed"),
            RenderEvent::Failed { message } => error!(%message, "Sync session failed"),
        }
    }
}

/// Keeps every event in memory. Clones share the same buffer.
#[derive(Debug)]
pub struct CollectingSink<V> {
    events: Arc<Mutex<Vec<RenderEvent<V>>>>,
}

impl<V> Clone for CollectingSink<V> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
        }
    }
}

impl<V> Default for CollectingSink<V> {
    fn default() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<V: Clone> CollectingSink<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events rendered so far.
    pub fn events(&self) -> Vec<RenderEvent<V>> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The most recent event.
    pub fn last(&self) -> Option<RenderEvent<V>> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }

    /// Number of events rendered so far.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone + Send> RenderSink<V> for CollectingSink<V> {
    fn render(&mut self, event: &RenderEvent<V>) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
