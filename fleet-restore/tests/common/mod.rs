#![allow(dead_code)]

use anyhow::Result;
use flate2::write::GzEncoder;
use flate2::Compression;
use fleet_core::error::FleetError;
use fleet_restore::database::DatabaseEngine;
use fleet_restore::hooks::SiteHooks;
use fleet_restore::notify::ErrorReporter;
use fleet_restore::{CancelToken, Environment};
use git2::{Repository, Signature};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub const DUMP: &str = "USE `legacy_dev`;\n\
CREATE TABLE `node` (\n  `nid` int NOT NULL\n) ENGINE=MyISAM DEFAULT CHARSET=utf8;\n\
INSERT INTO `node` VALUES (1);\n";

pub const CORRUPT_DUMP: &str = "CREATE TABLE `node` (\n-- truncated\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packing {
    Tar,
    TarGz,
    Zip,
}

/// Builds a backup tree and packs it into an archive, all under one tempdir.
///
/// ```text
/// <backup>/
/// ├── pantheon.backup          (add_backup_marker)
/// ├── <env>/                   git working tree on branch <backup>
/// │   ├── install.php
/// │   ├── index.php
/// │   ├── includes/bootstrap.inc   (dev only)
/// │   └── database.sql
/// └── <backup>.git/            bare repository, origin = `origin_url`
/// ```
pub struct BackupFixture {
    _temp_dir: TempDir,
    pub source_dir: PathBuf,
    pub host_dir: PathBuf,
    pub archives_dir: PathBuf,
    pub backup_project: String,
}

impl BackupFixture {
    pub fn new(backup_project: &str) -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let source_dir = temp_dir.path().join("source");
        let host_dir = temp_dir.path().join("host");
        let archives_dir = temp_dir.path().join("archives");
        fs::create_dir_all(source_dir.join(backup_project))?;
        fs::create_dir_all(&host_dir)?;
        fs::create_dir_all(&archives_dir)?;

        Ok(Self {
            _temp_dir: temp_dir,
            source_dir,
            host_dir,
            archives_dir,
            backup_project: backup_project.to_string(),
        })
    }

    pub fn project_dir(&self) -> PathBuf {
        self.source_dir.join(&self.backup_project)
    }

    /// Add an environment working tree with the given dump contents.
    pub fn add_environment(&self, env: Environment, dump: &str) -> Result<()> {
        let dir = self.project_dir().join(env.as_str());
        fs::create_dir_all(dir.join("sites/default"))?;
        fs::write(dir.join("install.php"), "<?php // installer\n")?;
        fs::write(dir.join("index.php"), format!("<?php // {}\n", env))?;
        fs::write(dir.join("sites/default/settings.php"), "<?php\n")?;
        if env == Environment::Dev {
            fs::create_dir_all(dir.join("includes"))?;
            fs::write(
                dir.join("includes/bootstrap.inc"),
                "<?php\ndefine('VERSION', '6.22');\n",
            )?;
        }

        let repo = Repository::init(&dir)?;
        repo.set_head(&format!("refs/heads/{}", self.backup_project))?;
        let mut index = repo.index()?;
        index.add_all(["*"], git2::IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree = repo.find_tree(index.write_tree()?)?;
        let sig = Signature::now("Fixture", "fixture@example.com")?;
        repo.commit(Some("HEAD"), &sig, &sig, "Site snapshot", &tree, &[])?;
        repo.remote(
            "origin",
            &format!("/var/git/projects/{}", self.backup_project),
        )?;

        // Written after the commit: dumps are never tracked.
        fs::write(dir.join("database.sql"), dump)?;
        Ok(())
    }

    /// Add the bundled bare repository with an `origin` remote.
    pub fn add_bare_repository(&self, origin_url: &str) -> Result<()> {
        let path = self
            .project_dir()
            .join(format!("{}.git", self.backup_project));
        let repo = Repository::init_bare(&path)?;
        let sig = Signature::now("Fixture", "fixture@example.com")?;
        let tree = repo.find_tree(repo.treebuilder(None)?.write()?)?;
        let branch_ref = format!("refs/heads/{}", self.backup_project);
        repo.commit(Some(&branch_ref), &sig, &sig, "Initial", &tree, &[])?;
        repo.set_head(&branch_ref)?;
        repo.remote("origin", origin_url)?;
        Ok(())
    }

    pub fn add_backup_marker(&self) -> Result<()> {
        fs::write(self.project_dir().join("pantheon.backup"), "")?;
        Ok(())
    }

    /// Standard backup: the given environments, a bare repository and the marker.
    pub fn standard(backup_project: &str, envs: &[Environment], origin_url: &str) -> Result<Self> {
        let fixture = Self::new(backup_project)?;
        for env in envs {
            fixture.add_environment(*env, DUMP)?;
        }
        fixture.add_bare_repository(origin_url)?;
        fixture.add_backup_marker()?;
        Ok(fixture)
    }

    pub fn pack(&self, packing: Packing) -> Result<PathBuf> {
        let name = match packing {
            Packing::Tar => "backup.tar",
            Packing::TarGz => "backup.tar.gz",
            Packing::Zip => "backup.zip",
        };
        let path = self.archives_dir.join(name);
        match packing {
            Packing::Tar => {
                pack_tar(&self.source_dir, File::create(&path)?)?;
            }
            Packing::TarGz => {
                let encoder = GzEncoder::new(File::create(&path)?, Compression::default());
                pack_tar(&self.source_dir, encoder)?.finish()?;
            }
            Packing::Zip => {
                pack_zip(&self.source_dir, File::create(&path)?)?;
            }
        }
        Ok(path)
    }

    pub fn webroot(&self) -> PathBuf {
        self.host_dir.join("www")
    }

    pub fn repository_store(&self) -> PathBuf {
        self.host_dir.join("git")
    }
}

fn pack_tar<W: Write>(source_dir: &Path, writer: W) -> Result<W> {
    let mut builder = tar::Builder::new(writer);
    for entry in fs::read_dir(source_dir)? {
        let entry = entry?;
        builder.append_dir_all(entry.file_name(), entry.path())?;
    }
    Ok(builder.into_inner()?)
}

fn pack_zip(source_dir: &Path, file: File) -> Result<()> {
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().unix_permissions(0o644);
    let dir_options = SimpleFileOptions::default().unix_permissions(0o755);

    for entry in WalkDir::new(source_dir).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let name = entry
            .path()
            .strip_prefix(source_dir)?
            .to_string_lossy()
            .replace('\\', "/");
        if entry.file_type().is_dir() {
            zip.add_directory(format!("{}/", name), dir_options)?;
        } else {
            zip.start_file(name, options)?;
            std::io::copy(&mut File::open(entry.path())?, &mut zip)?;
        }
    }
    zip.finish()?;
    Ok(())
}

/// Records calls and keeps imported dumps in memory, keyed by database.
#[derive(Default)]
pub struct FakeDatabase {
    pub databases: Mutex<BTreeMap<String, String>>,
    pub calls: Mutex<Vec<String>>,
    /// Cancelled once an import completes, as an operator hitting Ctrl-C would.
    pub cancel_after_import: Option<CancelToken>,
}

impl FakeDatabase {
    pub fn contents(&self, name: &str) -> Option<String> {
        self.databases.lock().unwrap().get(name).cloned()
    }
}

impl DatabaseEngine for FakeDatabase {
    fn create_database(&self, name: &str) -> fleet_restore::Result<()> {
        self.calls.lock().unwrap().push(format!("create {}", name));
        self.databases
            .lock()
            .unwrap()
            .insert(name.to_string(), String::new());
        Ok(())
    }

    fn drop_database(&self, name: &str) -> fleet_restore::Result<()> {
        self.calls.lock().unwrap().push(format!("drop {}", name));
        self.databases.lock().unwrap().remove(name);
        Ok(())
    }

    fn import_dump(&self, name: &str, dump: &Path) -> fleet_restore::Result<()> {
        self.calls.lock().unwrap().push(format!("import {}", name));
        let sql = fs::read_to_string(dump)?;
        if sql.contains("-- truncated") {
            return Err(FleetError::Command(format!(
                "exit code Some(1): mysql {}\nERROR 1064 (42000): syntax error",
                name
            ))
            .into());
        }
        let mut databases = self.databases.lock().unwrap();
        let Some(contents) = databases.get_mut(name) else {
            return Err(FleetError::Command(format!("ERROR 1049: Unknown database '{}'", name)).into());
        };
        contents.push_str(&sql);
        if let Some(cancel) = &self.cancel_after_import {
            cancel.cancel();
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeHooks {
    pub calls: Mutex<Vec<String>>,
    pub failing_service: Option<String>,
}

impl SiteHooks for FakeHooks {
    fn clear_cache(&self, project: &str, environment: Environment) -> fleet_core::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("cc {}_{}", project, environment));
        Ok(())
    }

    fn restart_service(&self, service: &str) -> fleet_core::Result<()> {
        self.calls.lock().unwrap().push(format!("restart {}", service));
        if self.failing_service.as_deref() == Some(service) {
            return Err(FleetError::Command(format!("{} failed to start", service)));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryReporter {
    pub messages: Mutex<Vec<String>>,
}

impl ErrorReporter for MemoryReporter {
    fn build_error(&self, message: &str) -> fleet_core::Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

pub fn branch_of(path: &Path) -> String {
    let repo = Repository::open(path).unwrap();
    let head = repo.find_reference("HEAD").unwrap();
    head.symbolic_target()
        .unwrap()
        .trim_start_matches("refs/heads/")
        .to_string()
}
