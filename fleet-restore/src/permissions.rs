//! Ownership and mode repair after a restore.
//!
//! Archives carry the uid/gid of the host they were taken on. Restored site
//! trees are handed to the configured owner and web group, and the canonical
//! repository is made group-writable so deploy users can push to it.

use fleet_config::RestoreConfig;
use fleet_core::error::{FleetError, Result};
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

pub struct PermissionRepair<'a> {
    config: &'a RestoreConfig,
}

impl<'a> PermissionRepair<'a> {
    pub fn new(config: &'a RestoreConfig) -> Self {
        Self { config }
    }

    /// Repair the restored site trees and canonical repository of `project`.
    pub fn repair(&self, project: &str) -> Result<()> {
        let site_root = self.config.project_dir(project);
        let repository = self.config.repository_path(project);

        if repository.is_dir() {
            let changed = add_group_write(&repository)?;
            debug!(changed, repo = %repository.display(), "made repository group-writable");
        }

        let (uid, gid) = resolve_ids(self.config.owner.as_deref(), self.config.web_group.as_deref())?;
        if uid.is_none() && gid.is_none() {
            debug!("no owner or group configured; skipping chown");
            return Ok(());
        }

        let mut changed = 0;
        for root in [&site_root, &repository] {
            if root.exists() {
                changed += chown_tree(root, uid, gid)?;
            }
        }
        info!(changed, project, "ownership repaired");
        Ok(())
    }
}

#[cfg(unix)]
fn resolve_ids(owner: Option<&str>, group: Option<&str>) -> Result<(Option<u32>, Option<u32>)> {
    use nix::unistd::{Group, User};

    let uid = match owner {
        Some(name) => Some(
            User::from_name(name)
                .map_err(|e| FleetError::Internal(format!("user lookup '{}': {}", name, e)))?
                .ok_or_else(|| FleetError::Config(format!("unknown user '{}'", name)))?
                .uid
                .as_raw(),
        ),
        None => None,
    };
    let gid = match group {
        Some(name) => Some(
            Group::from_name(name)
                .map_err(|e| FleetError::Internal(format!("group lookup '{}': {}", name, e)))?
                .ok_or_else(|| FleetError::Config(format!("unknown group '{}'", name)))?
                .gid
                .as_raw(),
        ),
        None => None,
    };
    Ok((uid, gid))
}

#[cfg(not(unix))]
fn resolve_ids(_owner: Option<&str>, _group: Option<&str>) -> Result<(Option<u32>, Option<u32>)> {
    Ok((None, None))
}

/// `chown -R` without following symlinks. Returns the number of entries changed.
#[cfg(unix)]
fn chown_tree(root: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<u64> {
    let mut changed = 0;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| FleetError::filesystem(e.into(), root, "walk"))?;
        std::os::unix::fs::lchown(entry.path(), uid, gid)
            .map_err(|e| FleetError::filesystem(e, entry.path(), "chown"))?;
        changed += 1;
    }
    Ok(changed)
}

#[cfg(not(unix))]
fn chown_tree(_root: &Path, _uid: Option<u32>, _gid: Option<u32>) -> Result<u64> {
    Ok(0)
}

/// `chmod -R g+w`. Symlinks are skipped; their mode is meaningless.
#[cfg(unix)]
fn add_group_write(root: &Path) -> Result<u64> {
    use std::os::unix::fs::PermissionsExt;

    let mut changed = 0;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| FleetError::filesystem(e.into(), root, "walk"))?;
        if entry.file_type().is_symlink() {
            continue;
        }
        let metadata = entry
            .metadata()
            .map_err(|e| FleetError::filesystem(e.into(), entry.path(), "stat"))?;
        let mode = metadata.permissions().mode();
        if mode & 0o020 == 0 {
            std::fs::set_permissions(entry.path(), std::fs::Permissions::from_mode(mode | 0o020))
                .map_err(|e| FleetError::filesystem(e, entry.path(), "chmod"))?;
            changed += 1;
        }
    }
    Ok(changed)
}

#[cfg(not(unix))]
fn add_group_write(_root: &Path) -> Result<u64> {
    Ok(0)
}
