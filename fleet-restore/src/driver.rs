//! Restore workflow driver.
//!
//! ```text
//! Extracting -> Resolving -> RestoringPerEnvironment -> ReconcilingRepository
//!   -> RepairingPermissions -> PostProcessing -> Cleanup -> Done
//! ```
//!
//! Any state can end in `Failed`. Errors raised while extracting or
//! resolving abort the run before the host is touched; from
//! `RestoringPerEnvironment` on, failures are recorded in the
//! [`RunReport`] and the run carries on. `Cleanup` runs on every path.

use crate::archive::{Archive, ExtractedArchive};
use crate::database::{DatabaseEngine, DatabaseRestoreStep};
use crate::environment::Environment;
use crate::error::{RestoreError, Result};
use crate::files::FileRestoreStep;
use crate::hooks::SiteHooks;
use crate::notify::ErrorReporter;
use crate::permissions::PermissionRepair;
use crate::report::{EnvironmentOutcome, FailedStep, RunReport, RunStatus, StepStatus};
use crate::repository::{RemoteRewriteTable, RepositoryRestoreStep};
use crate::resolver::{self, BackupLayout, Profile};
use crate::scm::SourceControl;
use chrono::Utc;
use fleet_config::RestoreConfig;
use fleet_core::error::FleetError;
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

static PROJECT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("project name pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreState {
    Extracting,
    Resolving,
    RestoringPerEnvironment,
    ReconcilingRepository,
    RepairingPermissions,
    PostProcessing,
    Cleanup,
    Done,
    Failed,
}

impl RestoreState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestoreState::Extracting => "extracting",
            RestoreState::Resolving => "resolving",
            RestoreState::RestoringPerEnvironment => "restoring_per_environment",
            RestoreState::ReconcilingRepository => "reconciling_repository",
            RestoreState::RepairingPermissions => "repairing_permissions",
            RestoreState::PostProcessing => "post_processing",
            RestoreState::Cleanup => "cleanup",
            RestoreState::Done => "done",
            RestoreState::Failed => "failed",
        }
    }

    /// States in which the host has not been modified yet.
    pub fn precedes_mutation(&self) -> bool {
        matches!(self, RestoreState::Extracting | RestoreState::Resolving)
    }
}

impl fmt::Display for RestoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared cancellation flag, checked between steps.
///
/// Steps already running are not interrupted; a cancelled run still
/// removes its extraction directory before reporting.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// The underlying flag, for signal handlers that set it directly.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(RestoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// External systems the workflow drives.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub database: &'a dyn DatabaseEngine,
    pub scm: &'a dyn SourceControl,
    pub hooks: &'a dyn SiteHooks,
    pub reporter: &'a dyn ErrorReporter,
}

/// What to restore and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreRequest {
    pub archive: PathBuf,
    pub target_project: String,
    /// Restrict the run to these environments; `None` restores all present
    pub environments: Option<Vec<Environment>>,
    /// Refuse trees that are not platform backups (see [`Profile`])
    pub require_backup_marker: bool,
}

impl RestoreRequest {
    pub fn new(archive: impl Into<PathBuf>, target_project: impl Into<String>) -> Result<Self> {
        let target_project = target_project.into();
        validate_project_name(&target_project)?;
        Ok(Self {
            archive: archive.into(),
            target_project,
            environments: None,
            require_backup_marker: false,
        })
    }

    pub fn with_environments(mut self, environments: Vec<Environment>) -> Self {
        self.environments = (!environments.is_empty()).then_some(environments);
        self
    }

    pub fn require_backup_marker(mut self, required: bool) -> Self {
        self.require_backup_marker = required;
        self
    }
}

/// Project names end up in database names, paths and branch names.
pub fn validate_project_name(name: &str) -> Result<()> {
    if PROJECT_NAME.is_match(name) {
        Ok(())
    } else {
        Err(RestoreError::InvalidProjectName(name.to_string()))
    }
}

pub struct RestoreWorkflow<'a> {
    config: &'a RestoreConfig,
    collaborators: Collaborators<'a>,
    rewrites: RemoteRewriteTable,
    cancel: CancelToken,
}

impl<'a> RestoreWorkflow<'a> {
    pub fn new(
        config: &'a RestoreConfig,
        collaborators: Collaborators<'a>,
    ) -> std::result::Result<Self, FleetError> {
        Ok(Self {
            config,
            collaborators,
            rewrites: RemoteRewriteTable::from_rules(&config.remote_rewrites)?,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Run one restore to completion. Never panics on restore failures;
    /// the outcome, good or bad, is in the returned report.
    #[instrument(skip_all, fields(project = %request.target_project, archive = %request.archive.display()))]
    pub fn run(&self, request: &RestoreRequest) -> RunReport {
        let mut report = RunReport::new(request.archive.clone(), &request.target_project);

        let result = match self.extract(request, &mut report) {
            Ok(extracted) => {
                let result = self.restore_extracted(request, &extracted, &mut report);
                let last_state = current_state(&report);
                self.cleanup(extracted, &mut report);
                result.map_err(|e| (last_state, e))
            }
            Err(e) => {
                let last_state = current_state(&report);
                enter(&mut report, RestoreState::Cleanup);
                Err((last_state, e))
            }
        };

        report.status = match result {
            Ok(()) => {
                let failures = report.all_failures();
                if failures.is_empty() {
                    RunStatus::Succeeded
                } else {
                    RunStatus::PartiallySucceeded { failures }
                }
            }
            Err((state, RestoreError::Cancelled)) => {
                warn!(%state, "restore cancelled");
                RunStatus::Cancelled { state }
            }
            Err((state, e)) => {
                error!(%state, "restore aborted: {}", e);
                RunStatus::Aborted {
                    state,
                    error: e.to_string(),
                }
            }
        };

        let terminal = match report.status {
            RunStatus::Succeeded => RestoreState::Done,
            _ => RestoreState::Failed,
        };
        enter(&mut report, terminal);
        report.finished_at = Utc::now();
        report
    }

    fn extract(&self, request: &RestoreRequest, report: &mut RunReport) -> Result<ExtractedArchive> {
        enter(report, RestoreState::Extracting);
        self.cancel.check()?;

        let mut archive = Archive::open(&request.archive).inspect_err(|e| self.notify(e, report))?;
        report.format = Some(archive.format());

        let install_root = archive
            .locate_install_root()
            .inspect_err(|e| self.notify(e, report))?;
        debug!(install_root = %install_root.display(), "located install root");
        report.install_root = Some(install_root);

        let extracted = archive.extract()?;
        archive.close();
        report.workdir = Some(extracted.root().to_path_buf());
        Ok(extracted)
    }

    /// Resolve, then run every mutating state. Only resolution problems and
    /// cancellation come back as `Err`; everything later is recorded.
    fn restore_extracted(
        &self,
        request: &RestoreRequest,
        extracted: &ExtractedArchive,
        report: &mut RunReport,
    ) -> Result<()> {
        enter(report, RestoreState::Resolving);
        self.cancel.check()?;

        let layout = resolver::resolve(extracted.root())?;
        report.backup_project = Some(layout.project_name.clone());
        report.version = layout.version.clone();

        if request.require_backup_marker && resolver::detect_profile(extracted.root()) == Profile::Import {
            return Err(RestoreError::MalformedBackup(format!(
                "no {} marker next to a live environment; this is an import, not a backup",
                resolver::BACKUP_MARKER
            )));
        }

        let environments = select_environments(&layout, request.environments.as_deref())?;

        enter(report, RestoreState::RestoringPerEnvironment);
        self.cancel.check()?;
        report.environments = self.restore_environments(&layout, &environments, &request.target_project);

        enter(report, RestoreState::ReconcilingRepository);
        self.cancel.check()?;
        let step = RepositoryRestoreStep::new(self.collaborators.scm, &self.rewrites);
        match step.restore(
            &layout.bundled_repository(),
            &self.config.repository_path(&request.target_project),
            &layout.project_name,
            &request.target_project,
        ) {
            Ok(outcome) => report.repository = Some(outcome),
            Err(e) => {
                error!("{}", e);
                report.failures.push(FailedStep::new("repository", e));
            }
        }

        enter(report, RestoreState::RepairingPermissions);
        self.cancel.check()?;
        if let Err(e) = PermissionRepair::new(self.config).repair(&request.target_project) {
            error!("permission repair failed: {}", e);
            report.failures.push(FailedStep::new("permissions", e));
        }

        enter(report, RestoreState::PostProcessing);
        self.cancel.check()?;
        self.post_process(&request.target_project, report);

        Ok(())
    }

    fn restore_environments(
        &self,
        layout: &BackupLayout,
        environments: &[Environment],
        target: &str,
    ) -> Vec<EnvironmentOutcome> {
        let restore_one = |env: &Environment| self.restore_environment(*env, layout, target);

        if !self.config.parallel_environments || environments.len() < 2 {
            return environments.iter().map(restore_one).collect();
        }

        match rayon::ThreadPoolBuilder::new()
            .num_threads(environments.len())
            .thread_name(|i| format!("fleet-restore-env-{}", i))
            .build()
        {
            Ok(pool) => pool.install(|| environments.par_iter().map(restore_one).collect()),
            Err(e) => {
                warn!("cannot start worker pool, restoring sequentially: {}", e);
                environments.iter().map(restore_one).collect()
            }
        }
    }

    #[instrument(skip(self, layout, target), fields(environment = %environment))]
    fn restore_environment(
        &self,
        environment: Environment,
        layout: &BackupLayout,
        target: &str,
    ) -> EnvironmentOutcome {
        let mut outcome = EnvironmentOutcome::new(environment);

        if self.cancel.is_cancelled() {
            let skipped = StepStatus::Skipped {
                reason: "cancelled".to_string(),
            };
            outcome.database = skipped.clone();
            outcome.files = skipped;
            return outcome;
        }

        match DatabaseRestoreStep::new(self.collaborators.database).restore(
            environment,
            &layout.database_dump(environment),
            target,
        ) {
            Ok(name) => {
                outcome.database = StepStatus::Succeeded;
                outcome.database_name = Some(name);
            }
            Err(e) => {
                error!("{}", e);
                outcome.database = StepStatus::Failed {
                    error: e.to_string(),
                };
                // Leave the live site untouched.
                outcome.files = StepStatus::Skipped {
                    reason: "database restore failed".to_string(),
                };
                return outcome;
            }
        }

        let origin_url = self.config.repository_path(target).display().to_string();
        match FileRestoreStep::new(self.collaborators.scm).restore(
            environment,
            &layout.environment_dir(environment),
            &self.config.environment_dir(target, environment.as_str()),
            target,
            &origin_url,
        ) {
            Ok(files) => {
                outcome.files = StepStatus::Succeeded;
                outcome.branch = Some(files.branch);
                outcome.renamed_from = files.renamed_from;
            }
            Err(e) => {
                error!("{}", e);
                outcome.files = StepStatus::Failed {
                    error: e.to_string(),
                };
            }
        }

        outcome
    }

    /// Cache clear for every fully restored site, then service restarts.
    fn post_process(&self, target: &str, report: &mut RunReport) {
        let hooks = self.collaborators.hooks;

        let restored: Vec<Environment> = report
            .environments
            .iter()
            .filter(|outcome| outcome.succeeded())
            .map(|outcome| outcome.environment)
            .collect();

        for environment in restored {
            if let Err(e) = hooks.clear_cache(target, environment) {
                warn!(%environment, "cache clear failed: {}", e);
                report
                    .failures
                    .push(FailedStep::new(format!("cache_clear:{}", environment), e));
            }
        }

        for service in &self.config.services {
            if let Err(e) = hooks.restart_service(service) {
                warn!(service = %service, "restart failed: {}", e);
                report
                    .failures
                    .push(FailedStep::new(format!("restart:{}", service), e));
            }
        }
    }

    fn cleanup(&self, extracted: ExtractedArchive, report: &mut RunReport) {
        enter(report, RestoreState::Cleanup);
        match extracted.cleanup() {
            Ok(()) => report.workdir_removed = true,
            Err(e) => {
                error!("cleanup failed: {}", e);
                report.failures.push(FailedStep::new("cleanup", e));
            }
        }
    }

    /// The one upstream report: archive unreadable or install root missing.
    fn notify(&self, e: &RestoreError, report: &mut RunReport) {
        if !matches!(
            e,
            RestoreError::InvalidArchive { .. } | RestoreError::InstallRootNotFound { .. }
        ) {
            return;
        }
        if let Err(notify_err) = self.collaborators.reporter.build_error(&e.to_string()) {
            warn!("error report not delivered: {}", notify_err);
            report.failures.push(FailedStep::new("notify", notify_err));
        }
    }
}

fn enter(report: &mut RunReport, state: RestoreState) {
    info!(%state, "entering state");
    report.states.push(state);
}

fn current_state(report: &RunReport) -> RestoreState {
    report.states.last().copied().unwrap_or(RestoreState::Extracting)
}

fn select_environments(
    layout: &BackupLayout,
    requested: Option<&[Environment]>,
) -> Result<Vec<Environment>> {
    let selected: Vec<Environment> = match requested {
        None => layout.environments.clone(),
        Some(requested) => {
            for env in requested {
                if !layout.environments.contains(env) {
                    warn!(environment = %env, "requested environment not in backup");
                }
            }
            layout
                .environments
                .iter()
                .copied()
                .filter(|env| requested.contains(env))
                .collect()
        }
    };

    if selected.is_empty() {
        return Err(RestoreError::MalformedBackup(format!(
            "no environments to restore in project '{}'",
            layout.project_name
        )));
    }
    Ok(selected)
}
