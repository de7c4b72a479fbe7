//! Incremental calculators and their persisted state.
//!
//! A calculator accumulates snapshots batch by batch. Every batch is bounded by
//! a half-open [`Interval`] that must continue exactly where the previous one
//! ended, so the accumulation can be exported after any batch and resumed
//! later without replaying history.

mod count;

pub use count::{CountView, SnapshotCountCalculator};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SyncError, SyncResult};
use crate::scope::CalculatorConfig;
use crate::snapshot::{Interval, Snapshot};

/// A calculation that can be fed ordered batches of snapshots.
pub trait IncrementalCalculator: Send + Sized + 'static {
    /// Stable name of this calculator, part of the cache key.
    const KIND: &'static str;

    /// Derived data handed to the render sink.
    type View: Clone + Send + 'static;

    /// Creates a calculator with no history.
    fn from_config(config: &CalculatorConfig) -> SyncResult<Self>;

    /// Recreates a calculator from exported state.
    fn restore(state: CalculatorState) -> SyncResult<Self>;

    /// Adds one batch bounded by `interval`.
    ///
    /// Fails with [`SyncError::IntervalViolation`] if `interval` does not
    /// continue from [`up_to_date`](Self::up_to_date).
    fn incorporate(&mut self, snapshots: &[Snapshot], interval: Interval) -> SyncResult<()>;

    /// Exports the accumulation for persistence.
    fn export_state(&self) -> SyncResult<CalculatorState>;

    /// The instant through which the accumulation is complete.
    fn up_to_date(&self) -> Option<DateTime<Utc>>;

    /// The current derived view.
    fn view(&self) -> Self::View;
}

/// Serialized accumulation of a calculator, tagged with its up-to-date marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculatorState {
    pub kind: String,
    pub up_to_date: Option<DateTime<Utc>>,
    pub payload: Value,
}

impl CalculatorState {
    /// Encodes the state for a cache store.
    pub fn encode(&self) -> SyncResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a state previously produced by [`encode`](Self::encode).
    pub fn decode(bytes: &[u8]) -> SyncResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Checks that this state was exported by calculator `kind`.
    pub fn expect_kind(&self, kind: &str) -> SyncResult<()> {
        if self.kind != kind {
            return Err(SyncError::serialization(format!(
                "State was exported by '{}', expected '{kind}'",
                self.kind
            )));
        }
        Ok(())
    }
}

/// Outcome of checking a batch interval against the accumulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contiguity {
    /// The interval continues from the marker; apply it.
    Apply,
    /// The interval was the last one applied; applying again would double count.
    Duplicate,
}

/// Checks a batch interval against the marker and the last applied interval.
pub fn check_contiguity(
    up_to_date: Option<DateTime<Utc>>,
    last_applied: Option<Interval>,
    interval: Interval,
) -> SyncResult<Contiguity> {
    interval.validate()?;

    if last_applied == Some(interval) && !interval.is_empty() {
        return Ok(Contiguity::Duplicate);
    }

    if !interval.continues_from(up_to_date) {
        return Err(SyncError::IntervalViolation {
            expected: up_to_date,
            start_on: interval.start_on,
            end_before: interval.end_before,
        });
    }

    Ok(Contiguity::Apply)
}
