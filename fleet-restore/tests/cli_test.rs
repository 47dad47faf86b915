mod common;

use anyhow::Result;
use assert_cmd::Command;
use common::{BackupFixture, Packing};
use fleet_restore::Environment;
use predicates::prelude::*;
use std::fs;

fn fleet_restore() -> Command {
    let mut cmd = Command::cargo_bin("fleet-restore").unwrap();
    cmd.env("LOG_LEVEL", "warn")
        .env_remove("FLEET_RESTORE_CONFIG");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    fleet_restore()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("restore"))
        .stdout(predicate::str::contains("locate"))
        .stdout(predicate::str::contains("inspect"));
}

#[test]
fn test_locate_prints_install_root() -> Result<()> {
    let fixture = BackupFixture::standard("legacy", &[Environment::Test], "https://host/p-6.git")?;
    let archive = fixture.pack(Packing::Zip)?;

    fleet_restore()
        .arg("locate")
        .arg(&archive)
        .assert()
        .success()
        .stdout(predicate::str::diff("legacy/test\n"));
    Ok(())
}

#[test]
fn test_locate_accepts_file_url() -> Result<()> {
    let fixture = BackupFixture::standard("legacy", &[Environment::Dev], "https://host/p-6.git")?;
    let archive = fixture.pack(Packing::Tar)?;
    let url = format!("file://{}", archive.display());

    fleet_restore()
        .args(["locate", &url])
        .assert()
        .success()
        .stdout(predicate::str::contains("legacy/dev"));
    Ok(())
}

#[test]
fn test_inspect_json() -> Result<()> {
    let fixture = BackupFixture::standard(
        "legacy",
        &[Environment::Dev, Environment::Live],
        "https://host/p-6.git",
    )?;
    let archive = fixture.pack(Packing::TarGz)?;

    let output = fleet_restore()
        .args(["inspect", "--json"])
        .arg(&archive)
        .output()?;

    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(value["project"], "legacy");
    assert_eq!(value["environments"], serde_json::json!(["dev", "live"]));
    assert_eq!(value["format"], "tar");
    assert_eq!(value["gzip"], true);
    assert_eq!(value["profile"], "restore");
    assert_eq!(value["version"]["full"], "6.22");
    assert_eq!(value["has_repository"], true);
    Ok(())
}

#[test]
fn test_restore_invalid_archive_exits_2() -> Result<()> {
    let fixture = BackupFixture::new("legacy")?;
    let archive = fixture.archives_dir.join("junk.tar");
    fs::write(&archive, "junk\n".repeat(200))?;
    let config = fixture.host_dir.join("restore.yaml");
    fs::write(
        &config,
        format!(
            "webroot: {}\nrepository_store: {}\nowner: null\nweb_group: null\nservices: []\n",
            fixture.webroot().display(),
            fixture.repository_store().display()
        ),
    )?;

    fleet_restore()
        .arg("--config")
        .arg(&config)
        .args(["restore", "--project", "acme", "--json"])
        .arg(&archive)
        .assert()
        .code(2)
        .stdout(predicate::str::contains("\"status\": \"aborted\""))
        .stdout(predicate::str::contains("Not a valid tar/zip archive"));
    Ok(())
}

#[test]
fn test_restore_rejects_bad_project_name() {
    fleet_restore()
        .args(["restore", "--project", "acme;rm", "/nonexistent.tar"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid project name"));
}

#[test]
fn test_restore_rejects_remote_source() {
    fleet_restore()
        .args(["restore", "--project", "acme", "https://example.com/b.tar"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Unsupported archive source"));
}

#[test]
fn test_show_config_rejects_unknown_keys() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = dir.path().join("restore.yaml");
    fs::write(&config, "webroot: /srv/www\nwebrooot: typo\n")?;

    fleet_restore()
        .arg("--config")
        .arg(&config)
        .arg("show-config")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("configuration"));
    Ok(())
}

#[test]
fn test_show_config_prints_effective_values() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = dir.path().join("restore.yaml");
    fs::write(&config, "webroot: /srv/www\n")?;

    fleet_restore()
        .arg("--config")
        .arg(&config)
        .arg("show-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("webroot: /srv/www"))
        .stdout(predicate::str::contains("repository_store: /var/git/projects"));
    Ok(())
}
