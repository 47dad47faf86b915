//! Per-environment working-tree restore.

use crate::environment::Environment;
use crate::error::{RestoreError, Result};
use crate::resolver::DATABASE_DUMP;
use crate::scm::{RemoteMode, SourceControl};
use fleet_core::file_system::mirror_tree;
use serde::Serialize;
use std::path::Path;
use tracing::{info, instrument};

/// Remote rewritten when a working tree changes project.
pub const ORIGIN: &str = "origin";

/// What a file restore did to the working tree's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRestoreOutcome {
    pub files_copied: u64,
    pub branch: String,
    /// Set when the branch was renamed from this name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renamed_from: Option<String>,
}

pub struct FileRestoreStep<'a> {
    scm: &'a dyn SourceControl,
}

impl<'a> FileRestoreStep<'a> {
    pub fn new(scm: &'a dyn SourceControl) -> Self {
        Self { scm }
    }

    /// Replace `destination` with `source` and retarget its branch at `target`.
    ///
    /// `origin_url` is where the renamed branch's remote should point,
    /// normally the project's canonical repository. The database dump is
    /// never copied into the site.
    #[instrument(skip(self, source, destination, origin_url), fields(destination = %destination.display()))]
    pub fn restore(
        &self,
        environment: Environment,
        source: &Path,
        destination: &Path,
        target: &str,
        origin_url: &str,
    ) -> Result<FileRestoreOutcome> {
        let failed = |reason: String| RestoreError::FileRestoreFailed {
            environment,
            reason,
        };

        let files_copied = mirror_tree(source, destination, &[Path::new(DATABASE_DUMP)])
            .map_err(|e| failed(e.to_string()))?;

        let branch = self
            .scm
            .current_branch(destination)
            .map_err(|e| failed(format!("read branch: {}", e)))?;

        if branch == target {
            info!(files_copied, branch = %branch, "files restored");
            return Ok(FileRestoreOutcome {
                files_copied,
                branch,
                renamed_from: None,
            });
        }

        self.scm
            .rename_branch(destination, &branch, target)
            .map_err(|e| failed(format!("rename {} -> {}: {}", branch, target, e)))?;
        self.scm
            .set_remote(destination, ORIGIN, origin_url, RemoteMode::Fetch)
            .map_err(|e| failed(format!("set {} url: {}", ORIGIN, e)))?;
        self.scm
            .set_upstream(destination, target, ORIGIN)
            .map_err(|e| failed(format!("set upstream: {}", e)))?;

        info!(files_copied, from = %branch, to = %target, "files restored, branch renamed");
        Ok(FileRestoreOutcome {
            files_copied,
            branch: target.to_string(),
            renamed_from: Some(branch),
        })
    }
}
