//! Snapsync CLI - shared plumbing for the `snapsync` binary
//!
//! Builds sync scopes and cache stores from command line arguments and
//! writes render events as JSON lines.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use serde_json::Value;
use snapsync::prelude::*;

/// Group-by field used when the configuration names none.
pub const DEFAULT_GROUP_BY: &str = "ScheduleState";

/// Arguments that determine the cache key of a session.
#[derive(Args, Debug, Clone, Default)]
pub struct ScopeArgs {
    /// JSON configuration file (refreshIntervalMs, asOf, calculatorConfig, ...)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Workspace object id
    #[arg(long, requires = "project")]
    pub workspace: Option<i64>,

    /// Project object id
    #[arg(long, requires = "workspace")]
    pub project: Option<i64>,

    /// Include parent projects
    #[arg(long)]
    pub scope_up: bool,

    /// Exclude child projects
    #[arg(long)]
    pub no_scope_down: bool,

    /// Pin the computation to a historical instant (RFC 3339)
    #[arg(long)]
    pub as_of: Option<DateTime<Utc>>,

    /// Snapshot field to count by, when the configuration names none
    #[arg(long, default_value = DEFAULT_GROUP_BY)]
    pub group_by: String,
}

/// Where calculator state is persisted.
#[derive(Args, Debug, Clone, Default)]
pub struct StoreArgs {
    /// Directory holding one JSON file per cache entry
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// SQLite database file, instead of a cache directory
    #[arg(long, conflicts_with = "cache_dir")]
    pub sqlite: Option<PathBuf>,
}

impl ScopeArgs {
    /// Resolves the arguments into a scope for the snapshot-count calculator.
    pub fn build(&self) -> Result<SyncScope> {
        let file = match &self.config {
            Some(path) => SyncConfigFile::load(path)?,
            None => SyncConfigFile::default(),
        };
        let (mut config, calculator_config) = file.into_parts();
        if let Some(derivation) = config.field_derivation_config() {
            ConfiguredFields::from_config(derivation)?;
        }
        if let Some(as_of) = self.as_of {
            config = config.with_as_of(as_of);
        }

        let mut calculator_config = calculator_config.unwrap_or_default();
        calculator_config
            .entry("groupBy")
            .or_insert_with(|| Value::from(self.group_by.clone()));

        let project = match (self.workspace, self.project) {
            (Some(workspace), Some(project)) => ProjectScope::new(workspace, project),
            _ => ProjectScope::standalone(),
        }
        .with_scoping_up(self.scope_up)
        .with_scoping_down(!self.no_scope_down);

        Ok(SyncScope::new(
            project,
            &WorkspaceConfiguration::default(),
            config,
            SnapshotCountCalculator::KIND,
            Some(calculator_config),
        ))
    }
}

impl StoreArgs {
    /// Opens the selected store, defaulting to the per-user cache directory.
    pub fn open(&self) -> Result<Arc<dyn CacheStore>> {
        if let Some(path) = &self.sqlite {
            let store = snapsync::store::SqliteCacheStore::new(path)
                .with_context(|| format!("opening {}", path.display()))?;
            return Ok(Arc::new(store));
        }

        let store = match &self.cache_dir {
            Some(dir) => FileSystemCacheStore::new(dir)
                .with_context(|| format!("opening {}", dir.display()))?,
            None => FileSystemCacheStore::in_default_location()?,
        };
        Ok(Arc::new(store))
    }
}

/// Writes one value as a single JSON line.
pub fn write_json_line<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

/// Reads the API key from `SNAPSYNC_API_KEY` when none was given.
pub fn resolve_api_key(explicit: Option<String>) -> Option<String> {
    explicit.or_else(|| std::env::var("SNAPSYNC_API_KEY").ok().filter(|k| !k.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scope_uses_standalone_project() {
        let scope = ScopeArgs {
            group_by: DEFAULT_GROUP_BY.to_string(),
            ..Default::default()
        }
        .build()
        .unwrap();

        assert_eq!(scope.project(), &ProjectScope::standalone());
        assert_eq!(scope.calculator_kind(), "snapshot-count");
        assert_eq!(scope.calculator_config()["groupBy"], "ScheduleState");
        assert_eq!(scope.tz(), "America/Denver");
    }

    #[test]
    fn test_config_file_group_by_wins() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"refreshIntervalMs": 60000, "calculatorConfig": {"groupBy": "Owner"}}"#,
        )
        .unwrap();

        let scope = ScopeArgs {
            config: Some(path),
            workspace: Some(1),
            project: Some(2),
            scope_up: true,
            group_by: DEFAULT_GROUP_BY.to_string(),
            ..Default::default()
        }
        .build()
        .unwrap();

        assert_eq!(scope.calculator_config()["groupBy"], "Owner");
        assert_eq!(
            scope.config().refresh_interval(),
            std::time::Duration::from_secs(60)
        );
        assert!(scope.project().project_scoping_up);
        assert!(scope.project().project_scoping_down);
        assert_eq!(scope.project().project_oid, 2);
    }

    #[test]
    fn test_as_of_flag_changes_key() {
        let plain = ScopeArgs {
            group_by: DEFAULT_GROUP_BY.to_string(),
            ..Default::default()
        };
        let pinned = ScopeArgs {
            as_of: Some("2024-01-15T00:00:00Z".parse().unwrap()),
            ..plain.clone()
        };

        assert_ne!(
            derive_key(&plain.build().unwrap()),
            derive_key(&pinned.build().unwrap())
        );
    }

    #[test]
    fn test_invalid_derivation_config_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, r#"{"fieldDerivationConfig": {"fields": ["IsDone"]}}"#).unwrap();

        let args = ScopeArgs {
            config: Some(path),
            group_by: DEFAULT_GROUP_BY.to_string(),
            ..Default::default()
        };
        let err = args.build().unwrap_err();
        assert!(err.to_string().contains("field derivation"));
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let args = ScopeArgs {
            config: Some(PathBuf::from("/nonexistent/snapsync.json")),
            ..Default::default()
        };
        assert!(args.build().is_err());
    }

    #[tokio::test]
    async fn test_cache_dir_store_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = StoreArgs {
            cache_dir: Some(temp_dir.path().to_path_buf()),
            sqlite: None,
        }
        .open()
        .unwrap();

        let key = CacheKey::from_raw("snapshot-count:abc");
        store.set(&key, b"{}".to_vec()).await.unwrap();
        assert_eq!(store.keys().await.unwrap(), vec![key]);
    }

    #[test]
    fn test_write_json_line() {
        let mut out = Vec::new();
        write_json_line(&mut out, &serde_json::json!({"event": "failed"})).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{\"event\":\"failed\"}\n");
    }
}
