//! Per-environment database restore.

use crate::environment::Environment;
use crate::error::{RestoreError, Result};
use fleet_config::DatabaseSettings;
use fleet_core::command::{require_tool, run_command, run_command_with_stdin};
use fleet_core::error::FleetError;
use fleet_core::temp_dir::create_temp_file;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, info, instrument};

const USE_STATEMENT: &[u8] = b"USE `";
const LEGACY_ENGINE: &[u8] = b") ENGINE=MyISAM";
const TRANSACTIONAL_ENGINE: &[u8] = b") ENGINE=InnoDB";

/// The database server, reduced to the three calls a restore needs.
///
/// Names passed in are already validated identifiers.
pub trait DatabaseEngine: Send + Sync {
    fn create_database(&self, name: &str) -> Result<()>;

    /// Drop `name`; a missing database is not an error.
    fn drop_database(&self, name: &str) -> Result<()>;

    /// Load the SQL in `dump` into `name`.
    fn import_dump(&self, name: &str, dump: &Path) -> Result<()>;
}

/// `{project}_{environment}`
pub fn database_name(project: &str, environment: Environment) -> String {
    format!("{}_{}", project, environment)
}

/// Copy a dump line by line, dropping `USE` statements and converting
/// MyISAM table definitions to InnoDB. Returns the number of lines written.
///
/// Lines are handled as bytes; dumps are not required to be valid UTF-8.
pub fn sanitize_dump<R: BufRead, W: Write>(mut reader: R, mut writer: W) -> std::io::Result<u64> {
    let mut line = Vec::new();
    let mut written = 0;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        if line.starts_with(USE_STATEMENT) {
            continue;
        }
        if line.starts_with(LEGACY_ENGINE) {
            writer.write_all(TRANSACTIONAL_ENGINE)?;
            writer.write_all(&line[LEGACY_ENGINE.len()..])?;
        } else {
            writer.write_all(&line)?;
        }
        written += 1;
    }

    writer.flush()?;
    Ok(written)
}

/// [`DatabaseEngine`] driving the `mysql` command-line client.
#[derive(Debug, Clone)]
pub struct MysqlCli {
    binary: String,
    user: String,
    timeout_secs: Option<u64>,
}

impl MysqlCli {
    pub fn new(settings: &DatabaseSettings, timeout_secs: Option<u64>) -> Self {
        Self {
            binary: settings.binary.clone(),
            user: settings.user.clone(),
            timeout_secs,
        }
    }

    fn execute(&self, statement: &str) -> Result<()> {
        require_tool(&self.binary)?;
        run_command(
            &self.binary,
            &["-u", self.user.as_str(), "-e", statement],
            self.timeout_secs,
        )?;
        Ok(())
    }
}

impl DatabaseEngine for MysqlCli {
    fn create_database(&self, name: &str) -> Result<()> {
        self.execute(&format!("CREATE DATABASE `{}`", name))
    }

    fn drop_database(&self, name: &str) -> Result<()> {
        self.execute(&format!("DROP DATABASE IF EXISTS `{}`", name))
    }

    fn import_dump(&self, name: &str, dump: &Path) -> Result<()> {
        require_tool(&self.binary)?;
        run_command_with_stdin(
            &self.binary,
            &["-u", self.user.as_str(), name],
            dump,
            self.timeout_secs,
        )?;
        Ok(())
    }
}

/// Replaces one environment's database with the dump from the backup.
pub struct DatabaseRestoreStep<'a> {
    engine: &'a dyn DatabaseEngine,
}

impl<'a> DatabaseRestoreStep<'a> {
    pub fn new(engine: &'a dyn DatabaseEngine) -> Self {
        Self { engine }
    }

    /// Drop, recreate and import `{target}_{environment}`, then delete the dump.
    ///
    /// Every failure is reported as [`RestoreError::DatabaseRestoreFailed`];
    /// the dump is left in place when the import did not succeed.
    #[instrument(skip(self, dump), fields(dump = %dump.display()))]
    pub fn restore(&self, environment: Environment, dump: &Path, target: &str) -> Result<String> {
        let failed = |reason: String| RestoreError::DatabaseRestoreFailed {
            environment,
            reason,
        };

        if !dump.is_file() {
            return Err(failed(format!("no dump at {}", dump.display())));
        }

        let name = database_name(target, environment);
        let sanitized = self.sanitized_copy(dump).map_err(|e| failed(e.to_string()))?;

        self.engine
            .drop_database(&name)
            .map_err(|e| failed(format!("drop {}: {}", name, e)))?;
        self.engine
            .create_database(&name)
            .map_err(|e| failed(format!("create {}: {}", name, e)))?;
        self.engine
            .import_dump(&name, sanitized.path())
            .map_err(|e| failed(format!("import into {}: {}", name, e)))?;

        fs::remove_file(dump).map_err(|e| failed(format!("remove dump: {}", e)))?;

        info!(database = %name, "database restored");
        Ok(name)
    }

    fn sanitized_copy(&self, dump: &Path) -> Result<tempfile::NamedTempFile> {
        let source = File::open(dump).map_err(|e| FleetError::filesystem(e, dump, "open"))?;
        let copy = create_temp_file("fleet-restore-dump-", ".sql")?;

        let lines = sanitize_dump(BufReader::new(source), BufWriter::new(copy.as_file()))
            .map_err(|e| FleetError::filesystem(e, copy.path(), "write"))?;
        debug!(lines, copy = %copy.path().display(), "sanitized dump");

        Ok(copy)
    }
}
