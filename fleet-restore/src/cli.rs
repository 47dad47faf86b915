use crate::archive::{Archive, ArchiveFormat};
use crate::database::MysqlCli;
use crate::driver::{CancelToken, Collaborators, RestoreRequest, RestoreWorkflow};
use crate::environment::Environment;
use crate::error::RestoreError;
use crate::hooks::ShellHooks;
use crate::notify::{ErrorReporter, JsonLinesReporter, LogReporter};
use crate::report::{EXIT_ABORTED, EXIT_SUCCESS};
use crate::resolver::{self, AppVersion, Profile};
use crate::scm::Git2Scm;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fleet_config::{ConfigLoader, RestoreConfig};
use fleet_core::{fleet_error, fleet_info, fleet_println, fleet_success, fleet_warning};
use serde::Serialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Parser)]
#[command(name = "fleet-restore")]
#[command(about = "Restore multi-environment site backups onto this host")]
#[command(version)]
pub struct Args {
    /// Configuration file (default: $FLEET_RESTORE_CONFIG, then /etc/fleet/restore.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Restore a backup archive into a project
    Restore {
        /// Backup archive: a local path or a file:// URL
        source: String,

        /// Target project name
        #[arg(long, short)]
        project: String,

        /// Only restore these environments (repeatable)
        #[arg(long = "environment", short = 'e', value_enum)]
        environments: Vec<Environment>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,

        /// Restore even when the archive is not marked as a platform backup
        #[arg(long)]
        force: bool,

        /// Restore environments one after another
        #[arg(long)]
        sequential: bool,
    },
    /// Print the directory holding the install marker inside an archive
    Locate {
        /// Backup archive: a local path or a file:// URL
        source: String,
    },
    /// Extract an archive and describe its layout without restoring
    Inspect {
        /// Backup archive: a local path or a file:// URL
        source: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration
    ShowConfig,
}

/// Turn a command-line source into a local path.
///
/// Remote URLs are rejected; fetching archives is the caller's job.
pub fn resolve_source(source: &str) -> crate::error::Result<PathBuf> {
    if !source.contains("://") {
        return Ok(PathBuf::from(source));
    }

    let url = Url::parse(source).map_err(|_| RestoreError::UnsupportedSource(source.to_string()))?;
    if url.scheme() != "file" {
        return Err(RestoreError::UnsupportedSource(source.to_string()));
    }
    url.to_file_path()
        .map_err(|()| RestoreError::UnsupportedSource(source.to_string()))
}

/// Dispatch a parsed command line. Returns the process exit code.
pub fn run(args: Args, cancel: CancelToken) -> Result<i32> {
    let config = ConfigLoader::new()
        .load(args.config.as_deref())
        .context("Failed to load configuration")?;

    match args.command {
        Command::Restore {
            source,
            project,
            environments,
            json,
            force,
            sequential,
        } => {
            let config = RestoreConfig {
                parallel_environments: config.parallel_environments && !sequential,
                ..config
            };
            handle_restore(&config, &source, &project, environments, json, force, cancel)
        }
        Command::Locate { source } => handle_locate(&source),
        Command::Inspect { source, json } => handle_inspect(&source, json),
        Command::ShowConfig => {
            let yaml = serde_yaml_ng::to_string(&config).context("Failed to render configuration")?;
            print_lines(&yaml);
            Ok(EXIT_SUCCESS)
        }
    }
}

fn print_lines(text: &str) {
    for line in text.lines() {
        fleet_println!("{}", line);
    }
}

fn handle_restore(
    config: &RestoreConfig,
    source: &str,
    project: &str,
    environments: Vec<Environment>,
    json: bool,
    force: bool,
    cancel: CancelToken,
) -> Result<i32> {
    let archive = resolve_source(source)?;
    let request = RestoreRequest::new(archive, project)?
        .with_environments(environments)
        .require_backup_marker(!force);

    let database = MysqlCli::new(&config.database, config.timeout());
    let scm = Git2Scm::new();
    let hooks = ShellHooks::new(config);
    let reporter: Box<dyn ErrorReporter> = match &config.error_report_path {
        Some(path) => Box::new(JsonLinesReporter::new(path)),
        None => Box::new(LogReporter),
    };

    let workflow = RestoreWorkflow::new(
        config,
        Collaborators {
            database: &database,
            scm: &scm,
            hooks: &hooks,
            reporter: reporter.as_ref(),
        },
    )
    .context("Invalid remote rewrite table")?
    .with_cancel_token(cancel);

    if !json {
        fleet_info!("Restoring {} into project '{}'", request.archive.display(), project);
    }
    let report = workflow.run(&request);

    if json {
        let rendered = serde_json::to_string_pretty(&report).context("Failed to render report")?;
        fleet_println!("{}", rendered);
    } else {
        report.print_summary();
    }
    Ok(report.exit_code())
}

fn handle_locate(source: &str) -> Result<i32> {
    let path = resolve_source(source)?;
    let mut archive = Archive::open(&path)?;

    match archive.locate_install_root() {
        Ok(root) if root.as_os_str().is_empty() => {
            fleet_println!(".");
        }
        Ok(root) => {
            fleet_println!("{}", root.display());
        }
        Err(e) => {
            fleet_error!("{}", e);
            return Ok(EXIT_ABORTED);
        }
    }
    Ok(EXIT_SUCCESS)
}

#[derive(Debug, Serialize)]
struct Inspection {
    archive: PathBuf,
    format: ArchiveFormat,
    gzip: bool,
    install_root: Option<PathBuf>,
    project: String,
    environments: Vec<Environment>,
    version: Option<AppVersion>,
    profile: Profile,
    has_repository: bool,
}

fn handle_inspect(source: &str, json: bool) -> Result<i32> {
    let path = resolve_source(source)?;
    let inspection = match inspect(&path) {
        Ok(inspection) => inspection,
        Err(e) if e.is_pre_mutation() => {
            fleet_error!("{}", e);
            return Ok(EXIT_ABORTED);
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        fleet_println!(
            "{}",
            serde_json::to_string_pretty(&inspection).context("Failed to render inspection")?
        );
        return Ok(EXIT_SUCCESS);
    }

    let compression = if inspection.gzip { ", gzip" } else { "" };
    fleet_println!(
        "Archive:      {} ({:?}{})",
        path.display(),
        inspection.format,
        compression
    );
    fleet_println!(
        "Install root: {}",
        inspection
            .install_root
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "not found".to_string())
    );
    fleet_println!("Project:      {}", inspection.project);
    let envs: Vec<&str> = inspection.environments.iter().map(Environment::as_str).collect();
    fleet_println!("Environments: {}", envs.join(", "));
    match &inspection.version {
        Some(version) => {
            fleet_println!("Version:      {}", version.full);
        }
        None => {
            fleet_println!("Version:      unknown");
        }
    }
    match inspection.profile {
        Profile::Restore => {
            fleet_success!("Platform backup; ready to restore");
        }
        Profile::Import => {
            fleet_warning!("No backup marker; restoring requires --force");
        }
    }
    if !inspection.has_repository {
        fleet_warning!("No bundled repository found");
    }
    Ok(EXIT_SUCCESS)
}

fn inspect(path: &Path) -> crate::error::Result<Inspection> {
    let mut archive = Archive::open(path)?;
    let install_root = archive.locate_install_root().ok();
    let extracted = archive.extract()?;
    let format = archive.format();
    let gzip = archive.is_gzip();
    archive.close();

    let resolved = resolver::resolve(extracted.root());
    let profile = resolver::detect_profile(extracted.root());
    let has_repository = resolved
        .as_ref()
        .is_ok_and(|layout| layout.bundled_repository().is_dir());
    extracted.cleanup()?;
    let layout = resolved?;

    Ok(Inspection {
        archive: path.to_path_buf(),
        format,
        gzip,
        install_root,
        has_repository,
        project: layout.project_name,
        environments: layout.environments,
        version: layout.version,
        profile,
    })
}
