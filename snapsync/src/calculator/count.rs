//! Reference calculator counting snapshots per group.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{check_contiguity, CalculatorState, Contiguity, IncrementalCalculator};
use crate::error::{SyncError, SyncResult};
use crate::scope::CalculatorConfig;
use crate::snapshot::{Interval, Snapshot};

const MISSING_GROUP: &str = "(none)";

/// Counts snapshots by the value of a configured field.
///
/// Requires `groupBy` in the calculator configuration. Snapshots whose
/// `_ValidFrom` falls outside the batch interval are ignored, so a clamped
/// interval also clamps what is counted.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotCountCalculator {
    accumulation: Accumulation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Accumulation {
    group_by: String,
    counts: BTreeMap<String, u64>,
    total: u64,
    object_ids: BTreeSet<i64>,
    up_to_date: Option<DateTime<Utc>>,
    last_interval: Option<Interval>,
}

/// Derived view of a [`SnapshotCountCalculator`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountView {
    pub group_by: String,
    pub up_to_date: Option<DateTime<Utc>>,
    pub total_snapshots: u64,
    pub distinct_objects: usize,
    pub counts: BTreeMap<String, u64>,
}

impl SnapshotCountCalculator {
    fn group_of(&self, snapshot: &Snapshot) -> String {
        match snapshot.get(&self.accumulation.group_by) {
            None | Some(Value::Null) => MISSING_GROUP.to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

impl IncrementalCalculator for SnapshotCountCalculator {
    const KIND: &'static str = "snapshot-count";

    type View = CountView;

    fn from_config(config: &CalculatorConfig) -> SyncResult<Self> {
        let group_by = config
            .get("groupBy")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SyncError::configuration("snapshot-count requires a 'groupBy' field"))?;

        Ok(Self {
            accumulation: Accumulation {
                group_by: group_by.to_string(),
                counts: BTreeMap::new(),
                total: 0,
                object_ids: BTreeSet::new(),
                up_to_date: None,
                last_interval: None,
            },
        })
    }

    fn restore(state: CalculatorState) -> SyncResult<Self> {
        state.expect_kind(Self::KIND)?;
        let accumulation: Accumulation = serde_json::from_value(state.payload)?;
        if accumulation.up_to_date != state.up_to_date {
            return Err(SyncError::serialization(
                "State marker disagrees with its payload",
            ));
        }
        Ok(Self { accumulation })
    }

    fn incorporate(&mut self, snapshots: &[Snapshot], interval: Interval) -> SyncResult<()> {
        let acc = &self.accumulation;
        if check_contiguity(acc.up_to_date, acc.last_interval, interval)? == Contiguity::Duplicate {
            debug!(?interval, "Interval already incorporated, skipping");
            return Ok(());
        }
        if interval.is_empty() && acc.up_to_date.is_some() {
            return Ok(());
        }

        let mut added = 0u64;
        for snapshot in snapshots.iter().filter(|s| interval.contains(s.valid_from)) {
            let group = self.group_of(snapshot);
            *self.accumulation.counts.entry(group).or_insert(0) += 1;
            self.accumulation.object_ids.insert(snapshot.object_id);
            added += 1;
        }

        self.accumulation.total += added;
        self.accumulation.up_to_date = Some(interval.end_before);
        self.accumulation.last_interval = Some(interval);

        debug!(
            added,
            ignored = snapshots.len() as u64 - added,
            total = self.accumulation.total,
            "Incorporated batch"
        );
        Ok(())
    }

    fn export_state(&self) -> SyncResult<CalculatorState> {
        Ok(CalculatorState {
            kind: Self::KIND.to_string(),
            up_to_date: self.accumulation.up_to_date,
            payload: serde_json::to_value(&self.accumulation)?,
        })
    }

    fn up_to_date(&self) -> Option<DateTime<Utc>> {
        self.accumulation.up_to_date
    }

    fn view(&self) -> CountView {
        CountView {
            group_by: self.accumulation.group_by.clone(),
            up_to_date: self.accumulation.up_to_date,
            total_snapshots: self.accumulation.total,
            distinct_objects: self.accumulation.object_ids.len(),
            counts: self.accumulation.counts.clone(),
        }
    }
}
