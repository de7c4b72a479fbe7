//! Identity inputs of a sync session.
//!
//! A [`SyncScope`] captures everything that determines *what* a session
//! computes: which workspace and project the snapshots come from, the user's
//! configuration and the calculator configuration. Host environments supply
//! these values explicitly; nothing here reads ambient state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::SyncConfig;

/// Calculator configuration, passed to the calculator on construction.
pub type CalculatorConfig = Map<String, Value>;

/// Workspace and project the session is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectScope {
    pub workspace_oid: i64,
    pub project_oid: i64,
    pub project_scoping_up: bool,
    pub project_scoping_down: bool,
}

impl ProjectScope {
    /// Creates a scope that includes child projects but not parents.
    pub fn new(workspace_oid: i64, project_oid: i64) -> Self {
        Self {
            workspace_oid,
            project_oid,
            project_scoping_up: false,
            project_scoping_down: true,
        }
    }

    /// The fixed scope used when running outside a host environment.
    pub fn standalone() -> Self {
        Self::new(41529001, 81147451)
    }

    /// Sets whether parent projects are included.
    pub fn with_scoping_up(mut self, enabled: bool) -> Self {
        self.project_scoping_up = enabled;
        self
    }

    /// Sets whether child projects are included.
    pub fn with_scoping_down(mut self, enabled: bool) -> Self {
        self.project_scoping_down = enabled;
        self
    }
}

/// Host-provided workspace settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkspaceConfiguration {
    pub date_format: String,
    pub date_time_format: String,
    pub iteration_estimate_unit_name: String,
    pub release_estimate_unit_name: String,
    pub task_unit_name: String,
    pub time_tracker_enabled: bool,
    pub time_zone: String,
    pub work_days: String,
}

impl Default for WorkspaceConfiguration {
    fn default() -> Self {
        Self {
            date_format: "MM/dd/yyyy".to_string(),
            date_time_format: "MM/dd/yyyy hh:mm:ss a".to_string(),
            iteration_estimate_unit_name: "Points".to_string(),
            release_estimate_unit_name: "Points".to_string(),
            task_unit_name: "Hours".to_string(),
            time_tracker_enabled: true,
            time_zone: "America/Denver".to_string(),
            work_days: "Monday,Tuesday,Wednesday,Thursday,Friday".to_string(),
        }
    }
}

/// Immutable identity inputs of one computation.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncScope {
    project: ProjectScope,
    config: SyncConfig,
    calculator_kind: String,
    calculator_config: CalculatorConfig,
}

impl SyncScope {
    /// Builds a scope, completing the calculator configuration.
    ///
    /// `workDays` always comes from the workspace. `tz` comes from the user's
    /// override when present, otherwise from the workspace time zone.
    pub fn new(
        project: ProjectScope,
        workspace: &WorkspaceConfiguration,
        config: SyncConfig,
        calculator_kind: impl Into<String>,
        calculator_config: Option<CalculatorConfig>,
    ) -> Self {
        let mut calculator_config = calculator_config.unwrap_or_default();
        calculator_config.insert(
            "workDays".to_string(),
            Value::from(workspace.work_days.clone()),
        );
        let tz = config
            .tz()
            .map(str::to_string)
            .unwrap_or_else(|| workspace.time_zone.clone());
        calculator_config.insert("tz".to_string(), Value::from(tz));

        Self {
            project,
            config,
            calculator_kind: calculator_kind.into(),
            calculator_config,
        }
    }

    /// Get the project scope.
    pub fn project(&self) -> &ProjectScope {
        &self.project
    }

    /// Get the user configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Get the calculator kind this scope was built for.
    pub fn calculator_kind(&self) -> &str {
        &self.calculator_kind
    }

    /// Get the completed calculator configuration.
    pub fn calculator_config(&self) -> &CalculatorConfig {
        &self.calculator_config
    }

    /// Time zone the calculator works in.
    pub fn tz(&self) -> &str {
        self.calculator_config
            .get("tz")
            .and_then(Value::as_str)
            .unwrap_or("UTC")
    }
}
