//! Source-control operations the restore needs, behind a trait.

use crate::error::{RestoreError, Result};
use git2::{BranchType, Repository};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

/// Refspec installed for mirror remotes: every ref, force-updated.
pub const MIRROR_REFSPEC: &str = "+refs/*:refs/*";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryRemote {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteMode {
    /// Plain fetch remote; an existing remote only has its URL changed
    Fetch,
    /// Replicates all refs (`git remote add --mirror`)
    Mirror,
}

pub trait SourceControl: Send + Sync {
    /// Branch checked out (or pointed at by HEAD in a bare repository).
    fn current_branch(&self, repo: &Path) -> Result<String>;

    fn rename_branch(&self, repo: &Path, old: &str, new: &str) -> Result<()>;

    fn list_remotes(&self, repo: &Path) -> Result<Vec<RepositoryRemote>>;

    fn remove_remote(&self, repo: &Path, name: &str) -> Result<()>;

    /// Create `name`, or point an existing remote at `url`.
    fn set_remote(&self, repo: &Path, name: &str, url: &str, mode: RemoteMode) -> Result<()>;

    /// Make `branch` track the same-named branch on `remote`.
    fn set_upstream(&self, repo: &Path, branch: &str, remote: &str) -> Result<()>;
}

/// [`SourceControl`] backed by libgit2.
#[derive(Debug, Default, Clone, Copy)]
pub struct Git2Scm;

impl Git2Scm {
    pub fn new() -> Self {
        Self
    }
}

fn head_branch_ref(repo: &Repository) -> Option<String> {
    let head = repo.find_reference("HEAD").ok()?;
    head.symbolic_target().map(str::to_string)
}

impl SourceControl for Git2Scm {
    fn current_branch(&self, repo_path: &Path) -> Result<String> {
        let repo = Repository::open(repo_path)?;

        // Symbolic HEAD covers both normal and unborn branches.
        if let Some(target) = head_branch_ref(&repo) {
            if let Some(branch) = target.strip_prefix("refs/heads/") {
                return Ok(branch.to_string());
            }
        }

        // Detached: name the local branch sitting on the same commit.
        let head_oid = repo
            .head()?
            .target()
            .ok_or_else(|| git2::Error::from_str("HEAD has no target"))?;
        for branch in repo.branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            if branch.get().target() == Some(head_oid) {
                if let Some(name) = branch.name()? {
                    return Ok(name.to_string());
                }
            }
        }

        Err(RestoreError::SourceControl(git2::Error::from_str(&format!(
            "HEAD in {} is detached and matches no local branch",
            repo_path.display()
        ))))
    }

    fn rename_branch(&self, repo_path: &Path, old: &str, new: &str) -> Result<()> {
        let repo = Repository::open(repo_path)?;
        let head_was_old = head_branch_ref(&repo).as_deref() == Some(&format!("refs/heads/{}", old));

        let mut branch = repo.find_branch(old, BranchType::Local)?;
        branch.rename(new, false)?;

        if head_was_old {
            repo.set_head(&format!("refs/heads/{}", new))?;
        }

        debug!(repo = %repo_path.display(), old, new, "renamed branch");
        Ok(())
    }

    fn list_remotes(&self, repo_path: &Path) -> Result<Vec<RepositoryRemote>> {
        let repo = Repository::open(repo_path)?;
        let names = repo.remotes()?;

        let mut remotes = Vec::new();
        for name in names.iter().flatten() {
            let remote = repo.find_remote(name)?;
            remotes.push(RepositoryRemote {
                name: name.to_string(),
                url: remote.url().unwrap_or_default().to_string(),
            });
        }
        Ok(remotes)
    }

    fn remove_remote(&self, repo_path: &Path, name: &str) -> Result<()> {
        let repo = Repository::open(repo_path)?;
        repo.remote_delete(name)?;
        Ok(())
    }

    fn set_remote(&self, repo_path: &Path, name: &str, url: &str, mode: RemoteMode) -> Result<()> {
        let repo = Repository::open(repo_path)?;
        let exists = repo.find_remote(name).is_ok();

        match mode {
            RemoteMode::Fetch if exists => repo.remote_set_url(name, url)?,
            RemoteMode::Fetch => {
                repo.remote(name, url)?;
            }
            RemoteMode::Mirror => {
                if exists {
                    repo.remote_delete(name)?;
                }
                repo.remote_with_fetch(name, url, MIRROR_REFSPEC)?;
                repo.config()?
                    .set_bool(&format!("remote.{}.mirror", name), true)?;
            }
        }

        debug!(repo = %repo_path.display(), name, url, ?mode, "configured remote");
        Ok(())
    }

    fn set_upstream(&self, repo_path: &Path, branch: &str, remote: &str) -> Result<()> {
        let repo = Repository::open(repo_path)?;
        let mut config = repo.config()?;
        config.set_str(&format!("branch.{}.remote", branch), remote)?;
        config.set_str(
            &format!("branch.{}.merge", branch),
            &format!("refs/heads/{}", branch),
        )?;
        Ok(())
    }
}
