//! Field derivation applied to snapshots before they reach the calculator.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{SyncError, SyncResult};
use crate::snapshot::Snapshot;

/// Pure transform that enriches raw snapshots with derived fields.
///
/// `config` is the session's `field_derivation_config`, or `Value::Null`
/// when none is set. Implementations must not perform I/O.
pub trait FieldDeriver: Send + Sync {
    fn derive(&self, snapshots: &mut [Snapshot], config: &Value);
}

impl<F> FieldDeriver for F
where
    F: Fn(&mut [Snapshot], &Value) + Send + Sync,
{
    fn derive(&self, snapshots: &mut [Snapshot], config: &Value) {
        self(snapshots, config)
    }
}

type DeriveFn = dyn Fn(&Snapshot, &Value) -> Option<Value> + Send + Sync;

/// An ordered list of named field derivations.
///
/// Derivations run in insertion order, so a later one can read a field an
/// earlier one produced. Returning `None` leaves the field untouched.
///
/// ```rust
/// use serde_json::Value;
/// use snapsync::derive::DerivedFields;
///
/// let derived = DerivedFields::new().with("IsDone", |snapshot, _config| {
///     let state = snapshot.get("ScheduleState")?.as_str()?;
///     Some(Value::Bool(state == "Accepted" || state == "Released"))
/// });
/// assert_eq!(derived.len(), 1);
/// ```
#[derive(Default)]
pub struct DerivedFields {
    fields: Vec<(String, Box<DeriveFn>)>,
}

impl DerivedFields {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a derivation for `field`.
    pub fn with<F>(mut self, field: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Snapshot, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.fields.push((field.into(), Box::new(f)));
        self
    }

    /// Number of derivations.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when no derivations are registered.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl std::fmt::Debug for DerivedFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedFields")
            .field(
                "fields",
                &self.fields.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl FieldDeriver for DerivedFields {
    fn derive(&self, snapshots: &mut [Snapshot], config: &Value) {
        for snapshot in snapshots.iter_mut() {
            for (field, f) in &self.fields {
                if let Some(value) = f(snapshot, config) {
                    snapshot.set(field.clone(), value);
                }
            }
        }
    }
}

/// One declarative derivation read from `field_derivation_config`.
///
/// Exactly one of `value` or `from` is required. With `from`, the source
/// field is copied, tested against `in`, or translated through `map`;
/// `default` is written when the source is missing or unmapped.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FieldRule {
    pub field: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default, rename = "in")]
    pub one_of: Option<Vec<Value>>,
    #[serde(default)]
    pub map: Option<Map<String, Value>>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub default: Option<Value>,
}

impl FieldRule {
    fn validate(&self) -> SyncResult<()> {
        let invalid = |reason: &str| -> SyncResult<()> {
            Err(SyncError::configuration(format!(
                "Derived field '{}' {reason}",
                self.field
            )))
        };
        if self.field.is_empty() {
            return Err(SyncError::configuration("Derived field name is empty"));
        }
        match (&self.from, &self.value) {
            (Some(_), Some(_)) => return invalid("sets both 'from' and 'value'"),
            (None, None) => return invalid("needs 'from' or 'value'"),
            (None, Some(_)) if self.one_of.is_some() || self.map.is_some() => {
                return invalid("uses 'in' or 'map' without 'from'")
            }
            _ => {}
        }
        if self.one_of.is_some() && self.map.is_some() {
            return invalid("sets both 'in' and 'map'");
        }
        Ok(())
    }

    fn apply(&self, snapshot: &Snapshot) -> Option<Value> {
        let Some(from) = &self.from else {
            return self.value.clone();
        };
        let source = snapshot.get(from).filter(|v| !v.is_null());

        if let Some(one_of) = &self.one_of {
            return Some(Value::Bool(source.is_some_and(|v| one_of.contains(v))));
        }
        if let Some(map) = &self.map {
            let mapped = source.and_then(|v| match v {
                Value::String(s) => map.get(s),
                other => map.get(&other.to_string()),
            });
            return mapped.cloned().or_else(|| self.default.clone());
        }
        source.cloned().or_else(|| self.default.clone())
    }
}

/// Derivations described entirely by configuration.
///
/// Accepts either a list of [`FieldRule`]s or an object with a `fields` list:
///
/// ```json
/// { "fields": [
///     { "field": "IsDone", "from": "ScheduleState", "in": ["Accepted", "Released"] },
///     { "field": "Points", "from": "PlanEstimate", "default": 0 }
/// ] }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ConfiguredFields {
    rules: Vec<FieldRule>,
}

impl ConfiguredFields {
    /// Parses and validates a derivation configuration.
    pub fn from_config(config: &Value) -> SyncResult<Self> {
        let rules = match config {
            Value::Array(_) => config,
            Value::Object(map) => map.get("fields").ok_or_else(|| {
                SyncError::configuration("Field derivation config needs a 'fields' list")
            })?,
            _ => {
                return Err(SyncError::configuration(
                    "Field derivation config must be a list or an object",
                ))
            }
        };
        let rules: Vec<FieldRule> = serde_json::from_value(rules.clone()).map_err(|e| {
            SyncError::configuration(format!("Invalid field derivation config: {e}"))
        })?;
        for rule in &rules {
            rule.validate()?;
        }
        Ok(Self { rules })
    }

    /// The parsed rules, in application order.
    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }
}

impl FieldDeriver for ConfiguredFields {
    fn derive(&self, snapshots: &mut [Snapshot], _config: &Value) {
        for snapshot in snapshots.iter_mut() {
            for rule in &self.rules {
                if let Some(value) = rule.apply(snapshot) {
                    snapshot.set(rule.field.clone(), value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_derivations_run_in_order() {
        let derived = DerivedFields::new()
            .with("Points", |s, _| s.get("PlanEstimate").cloned())
            .with("DoublePoints", |s, _| {
                s.get("Points")?.as_f64().map(|p| json!(p * 2.0))
            });

        let mut snapshots = vec![Snapshot::new(1, Utc::now()).with_field("PlanEstimate", 3.0)];
        derived.derive(&mut snapshots, &Value::Null);

        assert_eq!(snapshots[0].get("Points"), Some(&json!(3.0)));
        assert_eq!(snapshots[0].get("DoublePoints"), Some(&json!(6.0)));
    }

    #[test]
    fn test_none_leaves_field_untouched() {
        let derived = DerivedFields::new().with("Owner", |_, _| None);
        let mut snapshots = vec![Snapshot::new(1, Utc::now()).with_field("Owner", "ann")];
        derived.derive(&mut snapshots, &Value::Null);
        assert_eq!(snapshots[0].get("Owner"), Some(&json!("ann")));
    }

    #[test]
    fn test_config_is_passed_through() {
        let derived = DerivedFields::new().with("Team", |_, config| config.get("team").cloned());
        let mut snapshots = vec![Snapshot::new(1, Utc::now())];
        derived.derive(&mut snapshots, &json!({"team": "blue"}));
        assert_eq!(snapshots[0].get("Team"), Some(&json!("blue")));
    }

    #[test]
    fn test_configured_rules() {
        let derived = ConfiguredFields::from_config(&json!({ "fields": [
            { "field": "IsDone", "from": "ScheduleState", "in": ["Accepted", "Released"] },
            { "field": "Points", "from": "PlanEstimate", "default": 0 },
            { "field": "Stage", "from": "ScheduleState", "map": { "Defined": "open" }, "default": "other" },
            { "field": "Team", "value": "blue" },
            { "field": "Ready", "from": "IsDone" }
        ] }))
        .unwrap();
        assert_eq!(derived.rules().len(), 5);

        let mut snapshots = vec![
            Snapshot::new(1, Utc::now()).with_field("ScheduleState", "Accepted"),
            Snapshot::new(2, Utc::now())
                .with_field("ScheduleState", "Defined")
                .with_field("PlanEstimate", 3),
        ];
        derived.derive(&mut snapshots, &Value::Null);

        assert_eq!(snapshots[0].get("IsDone"), Some(&json!(true)));
        assert_eq!(snapshots[0].get("Points"), Some(&json!(0)));
        assert_eq!(snapshots[0].get("Stage"), Some(&json!("other")));
        assert_eq!(snapshots[0].get("Ready"), Some(&json!(true)));
        assert_eq!(snapshots[1].get("IsDone"), Some(&json!(false)));
        assert_eq!(snapshots[1].get("Points"), Some(&json!(3)));
        assert_eq!(snapshots[1].get("Stage"), Some(&json!("open")));
        assert_eq!(snapshots[1].get("Team"), Some(&json!("blue")));
    }

    #[test]
    fn test_configured_rules_accept_bare_list() {
        let derived =
            ConfiguredFields::from_config(&json!([{ "field": "Team", "value": "red" }])).unwrap();
        assert_eq!(derived.rules()[0].value, Some(json!("red")));
    }

    #[test]
    fn test_invalid_configurations_are_rejected() {
        for config in [
            json!("IsDone"),
            json!({ "rules": [] }),
            json!([{ "field": "A" }]),
            json!([{ "field": "A", "from": "B", "value": 1 }]),
            json!([{ "field": "A", "value": 1, "in": [1] }]),
            json!([{ "field": "A", "from": "B", "in": [1], "map": {} }]),
            json!([{ "field": "A", "from": "B", "unknown": true }]),
            json!([{ "field": "", "value": 1 }]),
        ] {
            let err = ConfiguredFields::from_config(&config).unwrap_err();
            assert!(
                matches!(err, SyncError::Configuration { .. }),
                "{config} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_closure_deriver() {
        let deriver = |snapshots: &mut [Snapshot], _: &Value| {
            for s in snapshots.iter_mut() {
                s.set("Seen", Value::Bool(true));
            }
        };
        let mut snapshots = vec![Snapshot::new(1, Utc::now()), Snapshot::new(2, Utc::now())];
        FieldDeriver::derive(&deriver, &mut snapshots, &Value::Null);
        assert!(snapshots.iter().all(|s| s.get("Seen") == Some(&Value::Bool(true))));
    }
}
