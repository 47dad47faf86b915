//! Post-restore hooks: per-site cache clear and service restarts.

use crate::environment::Environment;
use fleet_config::RestoreConfig;
use fleet_core::command::run_shell;
use fleet_core::error::Result;
use tracing::info;

pub trait SiteHooks: Send + Sync {
    fn clear_cache(&self, project: &str, environment: Environment) -> Result<()>;

    fn restart_service(&self, service: &str) -> Result<()>;
}

/// [`SiteHooks`] running the command templates from [`RestoreConfig`].
#[derive(Debug, Clone)]
pub struct ShellHooks {
    cache_clear_command: String,
    service_restart_command: String,
    timeout_secs: Option<u64>,
}

impl ShellHooks {
    pub fn new(config: &RestoreConfig) -> Self {
        Self {
            cache_clear_command: config.cache_clear_command.clone(),
            service_restart_command: config.service_restart_command.clone(),
            timeout_secs: config.timeout(),
        }
    }

    pub fn cache_clear_line(&self, project: &str, environment: Environment) -> String {
        self.cache_clear_command
            .replace("{project}", project)
            .replace("{environment}", environment.as_str())
    }

    pub fn restart_line(&self, service: &str) -> String {
        self.service_restart_command.replace("{service}", service)
    }
}

impl SiteHooks for ShellHooks {
    fn clear_cache(&self, project: &str, environment: Environment) -> Result<()> {
        let line = self.cache_clear_line(project, environment);
        info!(command = %line, "clearing site cache");
        run_shell(&line, self.timeout_secs)?;
        Ok(())
    }

    fn restart_service(&self, service: &str) -> Result<()> {
        let line = self.restart_line(service);
        info!(command = %line, "restarting service");
        run_shell(&line, self.timeout_secs)?;
        Ok(())
    }
}
