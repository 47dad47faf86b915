//! The terminal result of a restore run.

use crate::archive::ArchiveFormat;
use crate::driver::RestoreState;
use crate::environment::Environment;
use crate::repository::RepositoryOutcome;
use crate::resolver::AppVersion;
use chrono::{DateTime, Utc};
use fleet_core::{fleet_error, fleet_println, fleet_success, fleet_warning};
use serde::Serialize;
use std::path::PathBuf;

/// Process exit code for a fully successful run.
pub const EXIT_SUCCESS: i32 = 0;
/// The host was modified but the run did not complete cleanly: a step
/// failed, or the run was cancelled after restoring began.
pub const EXIT_PARTIAL: i32 = 1;
/// The run stopped before anything on the host was touched.
pub const EXIT_ABORTED: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed { error: String },
    Skipped { reason: String },
}

impl StepStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentOutcome {
    pub environment: Environment,
    pub database: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,
    pub files: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renamed_from: Option<String>,
}

impl EnvironmentOutcome {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            database: StepStatus::Skipped {
                reason: "not started".to_string(),
            },
            database_name: None,
            files: StepStatus::Skipped {
                reason: "not started".to_string(),
            },
            branch: None,
            renamed_from: None,
        }
    }

    /// Both sub-steps ran and neither failed.
    pub fn succeeded(&self) -> bool {
        self.database == StepStatus::Succeeded && self.files == StepStatus::Succeeded
    }

    /// One [`FailedStep`] per failed sub-step.
    pub fn failures(&self) -> Vec<FailedStep> {
        let mut failures = Vec::new();
        if let StepStatus::Failed { error } = &self.database {
            failures.push(FailedStep::new(format!("database:{}", self.environment), error));
        }
        if let StepStatus::Failed { error } = &self.files {
            failures.push(FailedStep::new(format!("files:{}", self.environment), error));
        }
        failures
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedStep {
    pub step: String,
    pub error: String,
}

impl FailedStep {
    pub fn new(step: impl Into<String>, error: impl ToString) -> Self {
        Self {
            step: step.into(),
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    PartiallySucceeded { failures: Vec<FailedStep> },
    /// Stopped before any destination was modified
    Aborted { state: RestoreState, error: String },
    Cancelled { state: RestoreState },
}

impl RunStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Succeeded => EXIT_SUCCESS,
            RunStatus::PartiallySucceeded { .. } => EXIT_PARTIAL,
            RunStatus::Aborted { .. } => EXIT_ABORTED,
            RunStatus::Cancelled { state } if state.precedes_mutation() => EXIT_ABORTED,
            RunStatus::Cancelled { .. } => EXIT_PARTIAL,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub archive: PathBuf,
    pub target_project: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<ArchiveFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<AppVersion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
    pub workdir_removed: bool,
    pub environments: Vec<EnvironmentOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositoryOutcome>,
    /// Failures outside the per-environment steps
    pub failures: Vec<FailedStep>,
    /// States entered, in order
    pub states: Vec<RestoreState>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn new(archive: PathBuf, target_project: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            archive,
            target_project: target_project.into(),
            backup_project: None,
            format: None,
            install_root: None,
            version: None,
            workdir: None,
            workdir_removed: false,
            environments: Vec::new(),
            repository: None,
            failures: Vec::new(),
            states: Vec::new(),
            status: RunStatus::Succeeded,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    /// Every failure recorded so far, per-environment ones first.
    pub fn all_failures(&self) -> Vec<FailedStep> {
        self.environments
            .iter()
            .flat_map(EnvironmentOutcome::failures)
            .chain(self.failures.iter().cloned())
            .collect()
    }

    /// Human-readable summary on stdout/stderr.
    pub fn print_summary(&self) {
        fleet_println!(
            "Restore of '{}' into '{}'",
            self.archive.display(),
            self.target_project
        );
        if let Some(backup) = &self.backup_project {
            fleet_println!("  backup project: {}", backup);
        }
        if let Some(version) = &self.version {
            fleet_println!("  application version: {}", version.full);
        }

        for env in &self.environments {
            if env.succeeded() {
                fleet_success!(
                    "{}: database {}, branch {}",
                    env.environment,
                    env.database_name.as_deref().unwrap_or("-"),
                    env.branch.as_deref().unwrap_or("-")
                );
            } else {
                let failures = env.failures();
                if failures.is_empty() {
                    fleet_warning!("{}: not restored", env.environment);
                }
                for failure in failures {
                    fleet_error!("{}: {}", failure.step, failure.error);
                }
            }
        }

        if let Some(repository) = &self.repository {
            for warning in &repository.warnings {
                fleet_warning!("repository: {}", warning);
            }
        }
        for failure in &self.failures {
            fleet_error!("{}: {}", failure.step, failure.error);
        }

        match &self.status {
            RunStatus::Succeeded => {
                fleet_success!("Restore completed");
            }
            RunStatus::PartiallySucceeded { failures } => {
                fleet_warning!("Restore partially succeeded with {} failure(s)", failures.len());
            }
            RunStatus::Aborted { state, error } => {
                fleet_error!("Restore aborted while {}: {}", state, error);
            }
            RunStatus::Cancelled { state } => {
                fleet_error!("Restore cancelled while {}", state);
            }
        }
    }
}
