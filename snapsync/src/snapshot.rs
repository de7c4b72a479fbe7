//! Snapshot records, half-open intervals and pages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{SyncError, SyncResult};

/// One time-stamped record describing the state of a tracked item.
///
/// Uses the Lookback wire shape: `ObjectID`, `_ValidFrom`, `_ValidTo` and any
/// number of additional fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "ObjectID")]
    pub object_id: i64,
    #[serde(rename = "_ValidFrom")]
    pub valid_from: DateTime<Utc>,
    #[serde(rename = "_ValidTo", default, skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Snapshot {
    /// Creates a snapshot with no additional fields.
    pub fn new(object_id: i64, valid_from: DateTime<Utc>) -> Self {
        Self {
            object_id,
            valid_from,
            valid_to: None,
            fields: Map::new(),
        }
    }

    /// Adds a field, builder style.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Gets a field value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Sets a field value, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }
}

/// A half-open time range `[start_on, end_before)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interval {
    pub start_on: DateTime<Utc>,
    pub end_before: DateTime<Utc>,
}

impl Interval {
    /// Creates an interval, rejecting one whose end precedes its start.
    pub fn new(start_on: DateTime<Utc>, end_before: DateTime<Utc>) -> SyncResult<Self> {
        let interval = Self {
            start_on,
            end_before,
        };
        interval.validate()?;
        Ok(interval)
    }

    /// Checks `start_on <= end_before`.
    pub fn validate(&self) -> SyncResult<()> {
        if self.end_before < self.start_on {
            return Err(SyncError::MalformedInterval {
                start_on: self.start_on,
                end_before: self.end_before,
            });
        }
        Ok(())
    }

    /// True when the interval covers no time at all.
    pub fn is_empty(&self) -> bool {
        self.start_on == self.end_before
    }

    /// True when `instant` falls inside `[start_on, end_before)`.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start_on <= instant && instant < self.end_before
    }

    /// True when this interval picks up exactly where `marker` left off.
    ///
    /// An unknown marker accepts any start.
    pub fn continues_from(&self, marker: Option<DateTime<Utc>>) -> bool {
        marker.map_or(true, |m| m == self.start_on)
    }

    /// Clamps `end_before` down to `as_of` when `as_of` is earlier.
    ///
    /// The result never ends before `start_on`.
    pub fn clamp_end(self, as_of: DateTime<Utc>) -> Self {
        if as_of < self.end_before {
            Self {
                start_on: self.start_on,
                end_before: as_of.max(self.start_on),
            }
        } else {
            self
        }
    }
}

/// One bounded batch of snapshots returned by a paged source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub snapshots: Vec<Snapshot>,
    pub interval: Interval,
    pub has_more: bool,
}

impl Page {
    /// Creates a page.
    pub fn new(snapshots: Vec<Snapshot>, interval: Interval, has_more: bool) -> Self {
        Self {
            snapshots,
            interval,
            has_more,
        }
    }

    /// Creates a page without snapshots.
    pub fn empty(interval: Interval, has_more: bool) -> Self {
        Self::new(Vec::new(), interval, has_more)
    }
}
