//! Canonical repository restore and origin reconciliation.
//!
//! Backups taken on an older platform generation carry an `origin` whose URL
//! names that generation's upstream. The [`RemoteRewriteTable`] maps such
//! remotes to the current canonical URL by matching a version token rather
//! than a literal URL; new generations only need a new table row.

use crate::error::{RestoreError, Result};
use crate::files::ORIGIN;
use crate::scm::{RemoteMode, RepositoryRemote, SourceControl};
use fleet_config::RemoteRewriteRule;
use fleet_core::error::FleetError;
use fleet_core::file_system::mirror_tree;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
struct CompiledRule {
    pattern: Regex,
    accepted: Vec<String>,
    url_template: String,
}

/// Ordered pattern + rewrite rules. The first matching rule wins.
#[derive(Debug, Clone, Default)]
pub struct RemoteRewriteTable {
    rules: Vec<CompiledRule>,
}

/// A remote selected for rewriting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteRewrite {
    pub remote: String,
    pub version: String,
    pub url: String,
}

impl RemoteRewriteTable {
    pub fn from_rules(rules: &[RemoteRewriteRule]) -> std::result::Result<Self, FleetError> {
        let rules = rules
            .iter()
            .map(|rule| {
                let pattern = Regex::new(&rule.pattern).map_err(|e| {
                    FleetError::Config(format!("remote rewrite pattern '{}': {}", rule.pattern, e))
                })?;
                Ok(CompiledRule {
                    pattern,
                    accepted: rule.accepted.clone(),
                    url_template: rule.url_template.clone(),
                })
            })
            .collect::<std::result::Result<Vec<_>, FleetError>>()?;
        Ok(Self { rules })
    }

    /// The rewrite for `remote`, if any rule accepts it.
    ///
    /// Rules see `"<name>\t<url>"`, the shape of one `git remote -v` line,
    /// so a pattern can constrain the remote name as well as the URL.
    pub fn rewrite(&self, remote: &RepositoryRemote) -> Option<RemoteRewrite> {
        let subject = format!("{}\t{}", remote.name, remote.url);

        self.rules.iter().find_map(|rule| {
            let version = rule.pattern.captures(&subject)?.get(1)?.as_str();
            if !rule.accepted.iter().any(|v| v == version) {
                return None;
            }
            Some(RemoteRewrite {
                remote: remote.name.clone(),
                version: version.to_string(),
                url: rule.url_template.replace("{version}", version),
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryOutcome {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewrite: Option<RemoteRewrite>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renamed_from: Option<String>,
    /// Reconciliation problems that did not fail the step
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

pub struct RepositoryRestoreStep<'a> {
    scm: &'a dyn SourceControl,
    rewrites: &'a RemoteRewriteTable,
}

impl<'a> RepositoryRestoreStep<'a> {
    pub fn new(scm: &'a dyn SourceControl, rewrites: &'a RemoteRewriteTable) -> Self {
        Self { scm, rewrites }
    }

    /// Mirror the bundled bare repository to `destination`, reconcile its
    /// origin and rename its branch when the project changes name.
    #[instrument(skip(self, bundled, destination), fields(destination = %destination.display()))]
    pub fn restore(
        &self,
        bundled: &Path,
        destination: &Path,
        backup_project: &str,
        target: &str,
    ) -> Result<RepositoryOutcome> {
        mirror_tree(bundled, destination, &[])
            .map_err(|e| RestoreError::RepositoryRestoreFailed(e.to_string()))?;

        let mut warnings = Vec::new();
        let rewrite = self.reconcile_origin(destination, &mut warnings);

        let renamed_from = if backup_project == target {
            None
        } else {
            let branch = self.scm.current_branch(destination).map_err(|e| {
                RestoreError::RepositoryRestoreFailed(format!("read branch: {}", e))
            })?;
            if branch == target {
                None
            } else {
                self.scm
                    .rename_branch(destination, &branch, target)
                    .map_err(|e| {
                        RestoreError::RepositoryRestoreFailed(format!(
                            "rename {} -> {}: {}",
                            branch, target, e
                        ))
                    })?;
                Some(branch)
            }
        };

        info!(
            rewritten = rewrite.is_some(),
            renamed_from = ?renamed_from,
            "repository restored"
        );

        Ok(RepositoryOutcome {
            path: destination.to_path_buf(),
            rewrite,
            renamed_from,
            warnings,
        })
    }

    /// Best effort: failures become warnings and leave the remotes as found.
    fn reconcile_origin(&self, repo: &Path, warnings: &mut Vec<String>) -> Option<RemoteRewrite> {
        let remotes = match self.scm.list_remotes(repo) {
            Ok(remotes) => remotes,
            Err(e) => {
                warn!("cannot list remotes: {}", e);
                warnings.push(format!("list remotes: {}", e));
                return None;
            }
        };

        // Only `origin` is ever replaced, whatever the table's patterns accept.
        let rewrite = remotes
            .iter()
            .filter(|remote| remote.name == ORIGIN)
            .find_map(|remote| self.rewrites.rewrite(remote))?;

        let applied = self
            .scm
            .remove_remote(repo, ORIGIN)
            .and_then(|()| self.scm.set_remote(repo, ORIGIN, &rewrite.url, RemoteMode::Mirror));

        match applied {
            Ok(()) => {
                info!(version = %rewrite.version, url = %rewrite.url, "origin rewritten");
                Some(rewrite)
            }
            Err(e) => {
                warn!("cannot rewrite origin: {}", e);
                warnings.push(format!("rewrite origin: {}", e));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scm::Git2Scm;
    use git2::{Repository, Signature};
    use tempfile::TempDir;

    fn default_table() -> RemoteRewriteTable {
        RemoteRewriteTable::from_rules(&fleet_config::RestoreConfig::default().remote_rewrites)
            .unwrap()
    }

    fn remote(name: &str, url: &str) -> RepositoryRemote {
        RepositoryRemote {
            name: name.to_string(),
            url: url.to_string(),
        }
    }

    fn bare_repo(path: &Path, branch: &str, origin: Option<&str>) {
        let repo = Repository::init_bare(path).unwrap();
        let sig = Signature::now("Fixture", "fixture@example.com").unwrap();
        let tree_id = repo.treebuilder(None).unwrap().write().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(
            Some(&format!("refs/heads/{}", branch)),
            &sig,
            &sig,
            "Initial",
            &tree,
            &[],
        )
        .unwrap();
        repo.set_head(&format!("refs/heads/{}", branch)).unwrap();
        if let Some(url) = origin {
            repo.remote(ORIGIN, url).unwrap();
        }
    }

    #[test]
    fn test_rewrite_matches_accepted_version() {
        let rewrite = default_table()
            .rewrite(&remote("origin", "https://host/proj-6.git"))
            .unwrap();
        assert_eq!(rewrite.version, "6");
        assert_eq!(rewrite.url, "git://git.getpantheon.com/pantheon/6.git");
    }

    #[test]
    fn test_rewrite_ignores_other_versions_and_remotes() {
        let table = default_table();
        assert!(table.rewrite(&remote("origin", "https://host/proj-8.git")).is_none());
        assert!(table.rewrite(&remote("upstream", "https://host/proj-7.git")).is_none());
    }

    #[test]
    fn test_rewrite_enforces_accepted_set() {
        let table = RemoteRewriteTable::from_rules(&[RemoteRewriteRule {
            pattern: r"^origin\s.*(\d)\.git".to_string(),
            accepted: vec!["7".to_string()],
            url_template: "git://example/{version}.git".to_string(),
        }])
        .unwrap();
        assert!(table.rewrite(&remote("origin", "https://host/p-6.git")).is_none());
        assert_eq!(
            table.rewrite(&remote("origin", "https://host/p-7.git")).unwrap().url,
            "git://example/7.git"
        );
    }

    #[test]
    fn test_restore_rewrites_origin_and_renames_branch() {
        let tmp = TempDir::new().unwrap();
        let bundled = tmp.path().join("legacy.git");
        bare_repo(&bundled, "legacy", Some("https://host/proj-6.git"));
        let destination = tmp.path().join("store/acme");
        let table = default_table();
        let scm = Git2Scm::new();

        let outcome = RepositoryRestoreStep::new(&scm, &table)
            .restore(&bundled, &destination, "legacy", "acme")
            .unwrap();

        assert_eq!(outcome.renamed_from.as_deref(), Some("legacy"));
        assert_eq!(outcome.rewrite.unwrap().version, "6");
        assert!(outcome.warnings.is_empty());
        assert_eq!(scm.current_branch(&destination).unwrap(), "acme");
        let remotes = scm.list_remotes(&destination).unwrap();
        assert_eq!(
            remotes,
            vec![remote("origin", "git://git.getpantheon.com/pantheon/6.git")]
        );
    }

    #[test]
    fn test_restore_leaves_unmatched_origin_and_same_name() {
        let tmp = TempDir::new().unwrap();
        let bundled = tmp.path().join("acme.git");
        bare_repo(&bundled, "acme", Some("https://host/proj-8.git"));
        let destination = tmp.path().join("store/acme");
        fs_write_stale(&destination);
        let table = default_table();
        let scm = Git2Scm::new();

        let outcome = RepositoryRestoreStep::new(&scm, &table)
            .restore(&bundled, &destination, "acme", "acme")
            .unwrap();

        assert_eq!(outcome.rewrite, None);
        assert_eq!(outcome.renamed_from, None);
        assert!(!destination.join("stale").exists());
        assert_eq!(
            scm.list_remotes(&destination).unwrap(),
            vec![remote("origin", "https://host/proj-8.git")]
        );
    }

    #[test]
    fn test_restore_only_replaces_origin() {
        let tmp = TempDir::new().unwrap();
        let bundled = tmp.path().join("legacy.git");
        bare_repo(&bundled, "legacy", Some("https://host/proj-8.git"));
        Repository::open(&bundled)
            .unwrap()
            .remote("upstream", "https://host/proj-6.git")
            .unwrap();
        let destination = tmp.path().join("store/legacy");
        let table = RemoteRewriteTable::from_rules(&[RemoteRewriteRule {
            pattern: r"^\w+\s.*([67])\.git".to_string(),
            accepted: vec!["6".to_string(), "7".to_string()],
            url_template: "git://example/{version}.git".to_string(),
        }])
        .unwrap();
        let scm = Git2Scm::new();

        let outcome = RepositoryRestoreStep::new(&scm, &table)
            .restore(&bundled, &destination, "legacy", "legacy")
            .unwrap();

        assert_eq!(outcome.rewrite, None);
        let mut remotes = scm.list_remotes(&destination).unwrap();
        remotes.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            remotes,
            vec![
                remote("origin", "https://host/proj-8.git"),
                remote("upstream", "https://host/proj-6.git"),
            ]
        );
    }

    fn fs_write_stale(destination: &Path) {
        std::fs::create_dir_all(destination).unwrap();
        std::fs::write(destination.join("stale"), "").unwrap();
    }

    #[test]
    fn test_missing_bundled_repository_fails() {
        let tmp = TempDir::new().unwrap();
        let table = default_table();
        let scm = Git2Scm::new();

        let err = RepositoryRestoreStep::new(&scm, &table)
            .restore(&tmp.path().join("nope.git"), &tmp.path().join("dest"), "a", "b")
            .unwrap_err();
        assert!(matches!(err, RestoreError::RepositoryRestoreFailed(_)));
    }
}
