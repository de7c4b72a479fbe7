//! Stable cache keys for sync scopes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::scope::SyncScope;

/// Bumped whenever the key layout changes, so old entries are never reused.
const KEY_FORMAT_VERSION: u32 = 1;

/// Deterministic identity of one computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wraps an existing key string, e.g. one read back from a store.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derives the cache key for a scope.
///
/// Covers the project scope, calculator kind and configuration, the as-of pin
/// and the field-derivation configuration. Scheduling and logging options are
/// left out so toggling them keeps the cache.
pub fn derive_key(scope: &SyncScope) -> CacheKey {
    let project = scope.project();
    let config = scope.config();

    let identity = json!({
        "version": KEY_FORMAT_VERSION,
        "workspaceOID": project.workspace_oid,
        "projectOID": project.project_oid,
        "projectScopingUp": project.project_scoping_up,
        "projectScopingDown": project.project_scoping_down,
        "calculator": scope.calculator_kind(),
        "calculatorConfig": Value::Object(scope.calculator_config().clone()),
        "asOf": config.as_of().map(|t| t.to_rfc3339()),
        "fieldDerivationConfig": config.field_derivation_config().cloned(),
    });

    let canonical = canonicalize(&identity).to_string();
    let hash = Sha256::digest(canonical.as_bytes());

    CacheKey(format!(
        "{}:{}",
        scope.calculator_kind(),
        hex::encode(&hash[..16])
    ))
}

/// Rebuilds every object with its keys in sorted order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key.as_str()]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
