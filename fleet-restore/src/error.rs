use crate::environment::Environment;
use fleet_core::error::FleetError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RestoreError>;

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("Not a valid tar/zip archive: {}", path.display())]
    InvalidArchive { path: PathBuf },

    #[error("Cannot locate {marker} in archive {}", path.display())]
    InstallRootNotFound { path: PathBuf, marker: String },

    #[error("Malformed backup: {0}")]
    MalformedBackup(String),

    #[error("Cannot determine application version: {0}")]
    VersionUndetermined(String),

    #[error("Database restore failed for {environment}: {reason}")]
    DatabaseRestoreFailed {
        environment: Environment,
        reason: String,
    },

    #[error("File restore failed for {environment}: {reason}")]
    FileRestoreFailed {
        environment: Environment,
        reason: String,
    },

    #[error("Repository restore failed: {0}")]
    RepositoryRestoreFailed(String),

    #[error("Invalid project name '{0}': use letters, digits, '_' or '-'")]
    InvalidProjectName(String),

    #[error("Unsupported archive source '{0}': only local paths and file:// URLs are accepted")]
    UnsupportedSource(String),

    #[error("Restore cancelled")]
    Cancelled,

    #[error("Source control error: {0}")]
    SourceControl(#[from] git2::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error(transparent)]
    Fleet(#[from] FleetError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RestoreError {
    /// Errors raised before anything on the host has been touched.
    pub fn is_pre_mutation(&self) -> bool {
        matches!(
            self,
            RestoreError::InvalidArchive { .. }
                | RestoreError::InstallRootNotFound { .. }
                | RestoreError::MalformedBackup(_)
                | RestoreError::InvalidProjectName(_)
                | RestoreError::UnsupportedSource(_)
        )
    }
}
