//! # snapsync - incremental, cache-backed snapshot synchronization
//!
//! snapsync keeps an expensive calculation over a time-ordered history of
//! snapshots up to date without ever replaying the whole history. The
//! calculator's accumulated state is persisted under a key derived from
//! everything that affects the result, restored on the next start, and then
//! brought forward page by page from the instant it was last complete.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use chrono::{TimeZone, Utc};
//! use snapsync::prelude::*;
//!
//! # async fn example() -> SyncResult<()> {
//! let mut calculator_config = CalculatorConfig::new();
//! calculator_config.insert("groupBy".to_string(), "ScheduleState".into());
//!
//! let scope = SyncScope::new(
//!     ProjectScope::standalone(),
//!     &WorkspaceConfiguration::default(),
//!     SyncConfig::new(),
//!     SnapshotCountCalculator::KIND,
//!     Some(calculator_config),
//! );
//!
//! let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! let t1 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
//! let source = ScriptedSource::from_pages([Page::new(
//!     vec![Snapshot::new(1, t0).with_field("ScheduleState", "Defined")],
//!     Interval::new(t0, t1)?,
//!     false,
//! )]);
//!
//! let sink = CollectingSink::<CountView>::new();
//! let mut session = SyncOrchestrator::<SnapshotCountCalculator>::new(
//!     scope,
//!     Arc::new(InMemoryCacheStore::new()),
//!     Arc::new(source),
//!     sink.clone(),
//! );
//!
//! session.bootstrap().await?;
//! let next = session.fetch_once().await?;
//!
//! assert!(matches!(next, Continuation::Schedule(_)));
//! assert_eq!(session.view().unwrap().counts["Defined"], 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`orchestrator`**: the session state machine and its tokio driver
//! - **`calculator`**: the incremental calculator contract and a reference
//!   calculator
//! - **`cache_key`**: deterministic keys for cached calculator state
//! - **`store`**: in-memory, file system and SQLite cache stores
//! - **`source`**: paged snapshot sources, including the Lookback API
//! - **`render`**: sinks that receive the view after every merge
//! - **`scope`** / **`config`**: what a session computes and how it schedules

pub mod cache_key;
pub mod calculator;
pub mod clock;
pub mod config;
pub mod derive;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod prelude;
pub mod render;
pub mod scope;
pub mod snapshot;
pub mod source;
pub mod store;
