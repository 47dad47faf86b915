//! Discovers what an extracted backup contains.
//!
//! Nothing in a backup declares its own layout; the project name, the
//! environments and the application version are all read off the tree.

use crate::environment::Environment;
use crate::error::{RestoreError, Result};
use fleet_core::file_system::has_file;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Per-environment database dump, relative to the environment directory.
pub const DATABASE_DUMP: &str = "database.sql";

/// Marker written next to the environments by the backup job.
pub const BACKUP_MARKER: &str = "pantheon.backup";

/// Files that carry the application's `VERSION` constant.
const VERSION_FILES: [&str; 2] = ["system.module", "bootstrap.inc"];

/// Version files sit at most this deep below an environment root.
const VERSION_SEARCH_DEPTH: usize = 5;

static VERSION_DEFINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"define\(\s*['"]VERSION['"]\s*,\s*['"]((\d+)\.[^'"]*)['"]\s*\)"#)
        .expect("version pattern is valid")
});

/// Application version found in a site tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppVersion {
    pub major: u32,
    pub full: String,
}

/// What an extracted archive holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupLayout {
    /// Name of the single top-level directory
    pub project_name: String,
    /// `root/project_name`
    pub project_dir: PathBuf,
    /// Environments present, in promotion order
    pub environments: Vec<Environment>,
    /// Advisory only; `None` when no `dev` tree or no version marker exists
    pub version: Option<AppVersion>,
}

impl BackupLayout {
    pub fn environment_dir(&self, environment: Environment) -> PathBuf {
        self.project_dir.join(environment.as_str())
    }

    pub fn database_dump(&self, environment: Environment) -> PathBuf {
        self.environment_dir(environment).join(DATABASE_DUMP)
    }

    /// `root/project/project.git`
    pub fn bundled_repository(&self) -> PathBuf {
        self.project_dir.join(format!("{}.git", self.project_name))
    }
}

/// Which onramp flow an extracted tree calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// A backup produced by this platform
    Restore,
    /// A foreign site that would need importing instead
    Import,
}

/// Resolve project name, environments and version under `root`.
pub fn resolve(root: &Path) -> Result<BackupLayout> {
    let project_name = sole_top_level_dir(root)?;
    let project_dir = root.join(&project_name);

    let environments: Vec<Environment> = Environment::ALL
        .into_iter()
        .filter(|env| project_dir.join(env.as_str()).is_dir())
        .collect();

    let version = match detect_version(&project_dir) {
        Ok(version) => Some(version),
        Err(e) => {
            warn!("{}", e);
            None
        }
    };

    debug!(
        project = %project_name,
        environments = ?environments,
        version = ?version,
        "resolved backup layout"
    );

    Ok(BackupLayout {
        project_name,
        project_dir,
        environments,
        version,
    })
}

fn sole_top_level_dir(root: &Path) -> Result<String> {
    let mut names = Vec::new();
    for entry in fs::read_dir(root)? {
        names.push(entry?);
    }

    match names.as_slice() {
        [] => Err(RestoreError::MalformedBackup(
            "archive is empty; expected one project directory".to_string(),
        )),
        [only] => {
            let name = only.file_name().to_string_lossy().into_owned();
            if only.file_type()?.is_dir() {
                Ok(name)
            } else {
                Err(RestoreError::MalformedBackup(format!(
                    "top-level entry '{}' is not a directory",
                    name
                )))
            }
        }
        many => {
            let mut listed: Vec<String> = many
                .iter()
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect();
            listed.sort();
            Err(RestoreError::MalformedBackup(format!(
                "expected one project directory, found {}: {}",
                listed.len(),
                listed.join(", ")
            )))
        }
    }
}

/// Read the application version from the `dev` tree of a project directory.
pub fn detect_version(project_dir: &Path) -> Result<AppVersion> {
    let dev = project_dir.join(Environment::Dev.as_str());
    if !dev.is_dir() {
        return Err(RestoreError::VersionUndetermined(format!(
            "no dev environment in {}",
            project_dir.display()
        )));
    }

    let candidates = WalkDir::new(&dev)
        .max_depth(VERSION_SEARCH_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            VERSION_FILES
                .iter()
                .any(|name| entry.file_name() == std::ffi::OsStr::new(name))
        });

    for entry in candidates {
        let Ok(contents) = fs::read_to_string(entry.path()) else {
            continue;
        };
        if let Some(version) = parse_version(&contents) {
            return Ok(version);
        }
    }

    Err(RestoreError::VersionUndetermined(format!(
        "no VERSION definition below {}",
        dev.display()
    )))
}

fn parse_version(source: &str) -> Option<AppVersion> {
    let captures = VERSION_DEFINE.captures(source)?;
    let major = captures.get(2)?.as_str().parse().ok()?;
    Some(AppVersion {
        major,
        full: captures.get(1)?.as_str().to_string(),
    })
}

/// A tree is a restorable backup when some directory holds both the backup
/// marker file and a `live` environment.
pub fn detect_profile(root: &Path) -> Profile {
    let is_backup = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .any(|entry| {
            has_file(entry.path(), BACKUP_MARKER) && entry.path().join("live").is_dir()
        });

    if is_backup {
        Profile::Restore
    } else {
        Profile::Import
    }
}
