//! The sync session state machine.
//!
//! A [`SyncOrchestrator`] owns one calculator and keeps it up to date:
//!
//! ```text
//! Uninitialized → Bootstrapping → Restored | Cold → Idle
//!     Idle → Fetching → Merging → Persisting → Idle | Scheduled | Stopped
//!     Scheduled → (timer) → Fetching
//!     any → Invalidating → Bootstrapping (Cold)
//! ```
//!
//! The steps ([`bootstrap`](SyncOrchestrator::bootstrap),
//! [`begin_fetch`](SyncOrchestrator::begin_fetch),
//! [`on_page`](SyncOrchestrator::on_page),
//! [`invalidate`](SyncOrchestrator::invalidate)) can be driven by hand, or
//! [`run`](SyncOrchestrator::run) drives them on a tokio task.

mod driver;
mod phase;

pub use driver::SyncHandle;
pub use phase::{Continuation, Phase, SessionStats};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::cache_key::{derive_key, CacheKey};
use crate::calculator::{CalculatorState, IncrementalCalculator};
use crate::clock::{Clock, SystemClock};
use crate::derive::{ConfiguredFields, FieldDeriver};
use crate::error::{SyncError, SyncResult};
use crate::logging::{truncate_field, LogConfig};
use crate::render::{RenderEvent, RenderSink};
use crate::scope::SyncScope;
use crate::snapshot::Page;
use crate::source::PagedSource;
use crate::store::CacheStore;
use crate::{log_merge, log_phase};

use driver::Command;

/// A page request handed out by [`SyncOrchestrator::begin_fetch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest {
    /// Session generation the result must be reported with.
    pub generation: u64,
    /// Where the page should start; `None` for the beginning of history.
    pub from: Option<DateTime<Utc>>,
}

/// Mutable state of one session.
struct SyncSession<C> {
    phase: Phase,
    calculator: Option<C>,
    marker: Option<DateTime<Utc>>,
    generation: u64,
    fetch_in_flight: bool,
    next_fetch_at: Option<Instant>,
}

impl<C> SyncSession<C> {
    fn new() -> Self {
        Self {
            phase: Phase::Uninitialized,
            calculator: None,
            marker: None,
            generation: 0,
            fetch_in_flight: false,
            next_fetch_at: None,
        }
    }
}

/// Keeps one incremental calculator in sync with a paged source.
pub struct SyncOrchestrator<C: IncrementalCalculator> {
    scope: SyncScope,
    key: CacheKey,
    store: Arc<dyn CacheStore>,
    source: Arc<dyn PagedSource>,
    sink: Box<dyn RenderSink<C::View>>,
    deriver: Option<Box<dyn FieldDeriver>>,
    clock: Arc<dyn Clock>,
    log: LogConfig,
    session: SyncSession<C>,
    stats: SessionStats,
    command_tx: mpsc::Sender<Command>,
    command_rx: Option<mpsc::Receiver<Command>>,
}

impl<C: IncrementalCalculator> SyncOrchestrator<C> {
    /// Creates a session for `scope`. Nothing is loaded until bootstrap.
    pub fn new(
        scope: SyncScope,
        store: Arc<dyn CacheStore>,
        source: Arc<dyn PagedSource>,
        sink: impl RenderSink<C::View> + 'static,
    ) -> Self {
        let key = derive_key(&scope);
        let log = LogConfig::from_flags(scope.config().debug(), scope.config().trace());
        let (command_tx, command_rx) = mpsc::channel(16);

        Self {
            scope,
            key,
            store,
            source,
            sink: Box::new(sink),
            deriver: None,
            clock: Arc::new(SystemClock),
            log,
            session: SyncSession::new(),
            stats: SessionStats::default(),
            command_tx,
            command_rx: Some(command_rx),
        }
    }

    /// Set the transform applied to every page before it is merged.
    ///
    /// Without one, a session whose configuration carries a field derivation
    /// config applies it through [`ConfiguredFields`].
    pub fn with_deriver(mut self, deriver: impl FieldDeriver + 'static) -> Self {
        self.deriver = Some(Box::new(deriver));
        self
    }

    /// Set the clock used when the session is not pinned.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Override the logging behavior derived from the session flags.
    pub fn with_log_config(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// A handle for invalidating or shutting down a running session.
    pub fn handle(&self) -> SyncHandle {
        SyncHandle::new(self.command_tx.clone())
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn scope(&self) -> &SyncScope {
        &self.scope
    }

    pub fn phase(&self) -> Phase {
        self.session.phase
    }

    /// The instant through which the calculator is complete.
    pub fn marker(&self) -> Option<DateTime<Utc>> {
        self.session.marker
    }

    pub fn generation(&self) -> u64 {
        self.session.generation
    }

    pub fn is_fetch_in_flight(&self) -> bool {
        self.session.fetch_in_flight
    }

    /// When the pending refresh fires, if one is scheduled.
    pub fn next_fetch_at(&self) -> Option<Instant> {
        self.session.next_fetch_at
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// The calculator's current view, once bootstrapped.
    pub fn view(&self) -> Option<C::View> {
        self.session.calculator.as_ref().map(C::view)
    }

    /// Loads cached state (or starts cold) and renders the initial view.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn bootstrap(&mut self) -> SyncResult<Continuation> {
        self.bootstrap_from(true).await
    }

    async fn bootstrap_from(&mut self, use_cache: bool) -> SyncResult<Continuation> {
        self.transition(Phase::Bootstrapping);
        self.session.fetch_in_flight = false;
        self.session.next_fetch_at = None;

        if self.scope.calculator_kind() != C::KIND {
            let err = SyncError::configuration(format!(
                "Scope is for calculator '{}', session runs '{}'",
                self.scope.calculator_kind(),
                C::KIND
            ));
            return Err(self.fail(err));
        }

        if self.deriver.is_none() {
            if let Some(config) = self.scope.config().field_derivation_config() {
                match ConfiguredFields::from_config(config) {
                    Ok(fields) => self.deriver = Some(Box::new(fields)),
                    Err(e) => return Err(self.fail(e)),
                }
            }
        }

        let restored = if use_cache {
            self.load_cached().await
        } else {
            None
        };

        let (calculator, phase) = match restored {
            Some(calculator) => (calculator, Phase::Restored),
            None => match C::from_config(self.scope.calculator_config()) {
                Ok(calculator) => (calculator, Phase::Cold),
                Err(e) => return Err(self.fail(e)),
            },
        };
        self.transition(phase);

        self.session.marker = calculator.up_to_date();
        let event = RenderEvent::Bootstrap {
            phase,
            up_to_date: self.session.marker,
            view: calculator.view(),
        };
        self.session.calculator = Some(calculator);
        self.sink.render(&event);

        let calculator_config = truncate_field(
            &Value::Object(self.scope.calculator_config().clone()).to_string(),
            self.log.max_field_length,
        );
        info!(
            %phase,
            marker = ?self.session.marker,
            %calculator_config,
            "Calculator bootstrapped"
        );

        let next = if self.pin_reached() {
            Continuation::Stop
        } else {
            Continuation::FetchNow
        };
        Ok(self.settle(next))
    }

    /// Reads and restores cached state. Corrupted entries are removed.
    async fn load_cached(&mut self) -> Option<C> {
        let bytes = match self.store.get(&self.key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("No cached state");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read cached state, starting cold");
                self.stats.store_failures += 1;
                return None;
            }
        };

        match CalculatorState::decode(&bytes).and_then(C::restore) {
            Ok(calculator) => {
                self.stats.restores += 1;
                Some(calculator)
            }
            Err(e) => {
                let err = SyncError::CacheCorrupted {
                    key: self.key.to_string(),
                    message: e.to_string(),
                };
                warn!(error = %err, "Discarding cached state");
                self.stats.corrupt_entries_discarded += 1;
                if let Err(e) = self.store.remove(&self.key).await {
                    warn!(error = %e, "Failed to remove corrupted state");
                    self.stats.store_failures += 1;
                }
                None
            }
        }
    }

    /// Marks a page request as outstanding and says where it should start.
    ///
    /// Only one request may be outstanding at a time.
    pub fn begin_fetch(&mut self) -> SyncResult<FetchRequest> {
        if self.session.fetch_in_flight {
            return Err(SyncError::FetchInFlight);
        }
        match self.session.phase {
            Phase::Idle | Phase::Scheduled => {}
            phase => {
                return Err(SyncError::InvalidPhase {
                    phase: phase.as_str(),
                    operation: "fetch",
                })
            }
        }

        self.session.fetch_in_flight = true;
        self.session.next_fetch_at = None;
        self.transition(Phase::Fetching);
        self.stats.pages_requested += 1;

        Ok(FetchRequest {
            generation: self.session.generation,
            from: self.session.marker,
        })
    }

    /// Requests one page from the source and merges it.
    pub async fn fetch_once(&mut self) -> SyncResult<Continuation> {
        let request = self.begin_fetch()?;
        let result = self.source.request_page(request.from).await;
        self.complete_fetch(result).await
    }

    /// Handles the result of a request made with [`begin_fetch`](Self::begin_fetch).
    ///
    /// Returns `None` when the result belongs to an earlier generation and was
    /// dropped.
    #[instrument(skip(self, result), fields(key = %self.key))]
    pub async fn on_page(
        &mut self,
        generation: u64,
        result: SyncResult<Page>,
    ) -> SyncResult<Option<Continuation>> {
        if generation != self.session.generation {
            self.stats.stale_results += 1;
            debug!(
                generation,
                current = self.session.generation,
                "Ignoring stale page result"
            );
            return Ok(None);
        }
        self.complete_fetch(result).await.map(Some)
    }

    async fn complete_fetch(&mut self, result: SyncResult<Page>) -> SyncResult<Continuation> {
        if !self.session.fetch_in_flight || self.session.phase != Phase::Fetching {
            return Err(SyncError::InvalidPhase {
                phase: self.session.phase.as_str(),
                operation: "merge",
            });
        }
        self.session.fetch_in_flight = false;

        match result {
            Ok(page) => self.merge(page).await,
            Err(e) if e.is_fatal() => Err(self.fail(e)),
            Err(e) => {
                self.stats.fetch_failures += 1;
                let delay = self.retry_delay(&e);
                warn!(
                    error = %e,
                    transient = e.is_transient(),
                    retry_in = ?delay,
                    "Page fetch failed"
                );
                self.sink.render(&RenderEvent::FetchFailed {
                    message: e.to_string(),
                    retry_in_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                });
                Ok(self.settle(Continuation::Schedule(delay)))
            }
        }
    }

    fn retry_delay(&self, error: &SyncError) -> Duration {
        let padding = self.scope.config().padding_delay();
        error
            .retry_after()
            .map(Duration::from_secs)
            .map_or(padding, |d| d.max(padding))
    }

    async fn merge(&mut self, page: Page) -> SyncResult<Continuation> {
        self.transition(Phase::Merging);

        let Page {
            mut snapshots,
            interval,
            has_more,
        } = page;

        if let Err(e) = interval.validate() {
            return Err(self.fail(e));
        }

        let dirty = !snapshots.is_empty();
        let as_of = self
            .scope
            .config()
            .as_of()
            .unwrap_or_else(|| self.clock.now());
        let interval = interval.clamp_end(as_of);

        log_merge!(
            self.log,
            as_of = %as_of.to_rfc3339(),
            tz = self.scope.tz(),
            start_on = %interval.start_on,
            end_before = %interval.end_before,
            snapshots = snapshots.len(),
            has_more,
            "Merging page"
        );

        if let Some(deriver) = &self.deriver {
            let null = Value::Null;
            let config = self
                .scope
                .config()
                .field_derivation_config()
                .unwrap_or(&null);
            deriver.derive(&mut snapshots, config);
        }

        let incorporated = match self.session.calculator.as_mut() {
            Some(calculator) => calculator.incorporate(&snapshots, interval),
            None => Err(SyncError::InvalidPhase {
                phase: Phase::Merging.as_str(),
                operation: "incorporate without a calculator",
            }),
        };
        if let Err(e) = incorporated {
            return Err(self.fail(e));
        }

        self.session.marker = Some(interval.end_before);
        self.stats.pages_merged += 1;
        self.stats.snapshots_merged += snapshots.len() as u64;
        if !dirty {
            self.stats.empty_pages += 1;
        }

        self.transition(Phase::Persisting);
        if let Err(e) = self.persist().await {
            self.stats.persist_failures += 1;
            warn!(error = %e, "Failed to persist calculator state");
        }

        if let Some(calculator) = &self.session.calculator {
            let event = RenderEvent::Merged {
                dirty,
                has_more,
                up_to_date: self.session.marker,
                view: calculator.view(),
            };
            self.sink.render(&event);
        }

        let next = if self.pin_reached() {
            info!(as_of = %as_of.to_rfc3339(), "Reached pinned as-of, stopping");
            Continuation::Stop
        } else if has_more {
            Continuation::FetchNow
        } else {
            Continuation::Schedule(self.scope.config().scheduled_delay())
        };
        Ok(self.settle(next))
    }

    async fn persist(&mut self) -> SyncResult<()> {
        let bytes = match &self.session.calculator {
            Some(calculator) => calculator.export_state()?.encode()?,
            None => return Ok(()),
        };
        self.store.set(&self.key, bytes).await
    }

    /// Discards cached and in-memory state and bootstraps cold.
    ///
    /// Any pending timer is cancelled and any outstanding page result will be
    /// ignored when it arrives.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn invalidate(&mut self) -> SyncResult<Continuation> {
        self.transition(Phase::Invalidating);
        self.stats.invalidations += 1;

        self.session.marker = None;
        self.session.next_fetch_at = None;
        self.session.fetch_in_flight = false;
        self.session.generation += 1;
        self.session.calculator = None;

        if let Err(e) = self.store.remove(&self.key).await {
            warn!(error = %e, "Failed to remove cached state");
            self.stats.store_failures += 1;
        }

        self.bootstrap_from(false).await
    }

    /// Stops the session: cancels the timer and ignores outstanding results.
    pub fn stop(&mut self) {
        self.session.next_fetch_at = None;
        self.session.fetch_in_flight = false;
        self.session.generation += 1;
        self.transition(Phase::Stopped);
    }

    fn pin_reached(&self) -> bool {
        match (self.scope.config().as_of(), self.session.marker) {
            (Some(as_of), Some(marker)) => marker >= as_of,
            _ => false,
        }
    }

    /// Moves to the phase that matches `next` and arms the timer if needed.
    fn settle(&mut self, next: Continuation) -> Continuation {
        match next {
            Continuation::FetchNow => self.transition(Phase::Idle),
            Continuation::Schedule(delay) => {
                self.session.next_fetch_at = Some(Instant::now() + delay);
                self.transition(Phase::Scheduled);
            }
            Continuation::Stop => {
                self.session.next_fetch_at = None;
                self.transition(Phase::Stopped);
            }
        }
        next
    }

    fn fail(&mut self, err: SyncError) -> SyncError {
        error!(error = %err, phase = %self.session.phase, "Sync session failed");
        self.session.next_fetch_at = None;
        self.session.fetch_in_flight = false;
        self.transition(Phase::Failed);
        self.sink.render(&RenderEvent::Failed {
            message: err.to_string(),
        });
        err
    }

    fn transition(&mut self, phase: Phase) {
        log_phase!(
            self.log,
            from = %self.session.phase,
            to = %phase,
            generation = self.session.generation,
            "Phase transition"
        );
        self.session.phase = phase;
    }
}
