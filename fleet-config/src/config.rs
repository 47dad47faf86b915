use fleet_core::error::{FleetError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root structure of `restore.yaml`.
///
/// Defaults describe a Debian-family web host; every field can be
/// overridden and omitted fields keep their default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RestoreConfig {
    /// Base directory holding `<project>/<environment>` site trees
    #[serde(default = "default_webroot")]
    pub webroot: PathBuf,

    /// Directory holding the canonical bare repository of each project
    #[serde(default = "default_repository_store")]
    pub repository_store: PathBuf,

    /// Owner applied recursively to restored site trees. `None` skips chown.
    #[serde(default = "default_owner")]
    pub owner: Option<String>,

    /// Group applied recursively to restored site trees
    #[serde(default = "default_web_group")]
    pub web_group: Option<String>,

    /// Upper bound for any single external command
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Restore environments on parallel workers
    #[serde(default = "default_true")]
    pub parallel_environments: bool,

    /// Services restarted once the restore has finished
    #[serde(default = "default_services")]
    pub services: Vec<String>,

    /// Command template for restarting one service; `{service}` is substituted
    #[serde(default = "default_service_restart_command")]
    pub service_restart_command: String,

    /// Command template run against every restored site;
    /// `{project}` and `{environment}` are substituted
    #[serde(default = "default_cache_clear_command")]
    pub cache_clear_command: String,

    #[serde(default)]
    pub database: DatabaseSettings,

    /// Origin rewrite rules tried in order against the restored repository
    #[serde(default = "default_remote_rewrites")]
    pub remote_rewrites: Vec<RemoteRewriteRule>,

    /// JSON-lines file receiving terminal error reports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_report_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSettings {
    /// Client binary
    #[serde(default = "default_mysql_binary")]
    pub binary: String,

    /// Administrative user used for drop/create/import
    #[serde(default = "default_database_user")]
    pub user: String,
}

/// One entry of the origin rewrite table.
///
/// `pattern` is matched against `"<remote name>\t<url>"`; its first capture
/// group is the platform version, which must appear in `accepted`.
/// `url_template` receives the version through `{version}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RemoteRewriteRule {
    pub pattern: String,
    pub accepted: Vec<String>,
    pub url_template: String,
}

fn default_webroot() -> PathBuf {
    PathBuf::from("/var/www")
}

fn default_repository_store() -> PathBuf {
    PathBuf::from("/var/git/projects")
}

fn default_owner() -> Option<String> {
    Some("root".to_string())
}

fn default_web_group() -> Option<String> {
    Some("www-data".to_string())
}

fn default_command_timeout() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

fn default_services() -> Vec<String> {
    ["apache2", "memcached", "tomcat6", "varnish", "mysql"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_service_restart_command() -> String {
    "/etc/init.d/{service} restart".to_string()
}

fn default_cache_clear_command() -> String {
    "drush @{project}_{environment} cc all".to_string()
}

fn default_mysql_binary() -> String {
    "mysql".to_string()
}

fn default_database_user() -> String {
    "root".to_string()
}

fn default_remote_rewrites() -> Vec<RemoteRewriteRule> {
    vec![RemoteRewriteRule {
        pattern: r"^origin\s.*([67])\.git".to_string(),
        accepted: vec!["6".to_string(), "7".to_string()],
        url_template: "git://git.getpantheon.com/pantheon/{version}.git".to_string(),
    }]
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            binary: default_mysql_binary(),
            user: default_database_user(),
        }
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            webroot: default_webroot(),
            repository_store: default_repository_store(),
            owner: default_owner(),
            web_group: default_web_group(),
            command_timeout_secs: default_command_timeout(),
            parallel_environments: true,
            services: default_services(),
            service_restart_command: default_service_restart_command(),
            cache_clear_command: default_cache_clear_command(),
            database: DatabaseSettings::default(),
            remote_rewrites: default_remote_rewrites(),
            error_report_path: None,
        }
    }
}

impl RestoreConfig {
    /// Rooted at an arbitrary directory, with ownership repair and service
    /// restarts disabled. Used for fixture-driven runs.
    pub fn rooted_at(root: &std::path::Path) -> Self {
        Self {
            webroot: root.join("www"),
            repository_store: root.join("git"),
            owner: None,
            web_group: None,
            services: Vec::new(),
            ..Self::default()
        }
    }

    /// `webroot/project`
    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.webroot.join(project)
    }

    /// `webroot/project/environment`
    pub fn environment_dir(&self, project: &str, environment: &str) -> PathBuf {
        self.webroot.join(project).join(environment)
    }

    /// `repository_store/project`
    pub fn repository_path(&self, project: &str) -> PathBuf {
        self.repository_store.join(project)
    }

    pub fn timeout(&self) -> Option<u64> {
        (self.command_timeout_secs > 0).then_some(self.command_timeout_secs)
    }

    /// Reject values that would only fail halfway through a restore.
    pub fn validate(&self) -> Result<()> {
        if self.webroot.as_os_str().is_empty() {
            return Err(FleetError::Config("webroot must not be empty".to_string()));
        }
        if self.repository_store.as_os_str().is_empty() {
            return Err(FleetError::Config(
                "repository_store must not be empty".to_string(),
            ));
        }
        if !self.service_restart_command.contains("{service}") {
            return Err(FleetError::Config(
                "service_restart_command must contain {service}".to_string(),
            ));
        }

        for (index, rule) in self.remote_rewrites.iter().enumerate() {
            let regex = Regex::new(&rule.pattern).map_err(|e| {
                FleetError::Config(format!("remote_rewrites[{}].pattern: {}", index, e))
            })?;
            if regex.captures_len() < 2 {
                return Err(FleetError::Config(format!(
                    "remote_rewrites[{}].pattern needs a capture group for the version",
                    index
                )));
            }
            if !rule.url_template.contains("{version}") {
                return Err(FleetError::Config(format!(
                    "remote_rewrites[{}].url_template must contain {{version}}",
                    index
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RestoreConfig::default();
        config.validate().unwrap();
        assert_eq!(config.webroot, PathBuf::from("/var/www"));
        assert_eq!(
            config.environment_dir("acme", "live"),
            PathBuf::from("/var/www/acme/live")
        );
        assert_eq!(
            config.repository_path("acme"),
            PathBuf::from("/var/git/projects/acme")
        );
        assert_eq!(config.timeout(), Some(3600));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "webroot: /srv/www\nservices: [nginx]\n";
        let config: RestoreConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.webroot, PathBuf::from("/srv/www"));
        assert_eq!(config.services, vec!["nginx".to_string()]);
        assert_eq!(config.repository_store, PathBuf::from("/var/git/projects"));
        assert_eq!(config.remote_rewrites.len(), 1);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let yaml = "webroot: /srv/www\nwebrooot: typo\n";
        assert!(serde_yaml_ng::from_str::<RestoreConfig>(yaml).is_err());
    }

    #[test]
    fn test_validate_rejects_pattern_without_capture() {
        let config = RestoreConfig {
            remote_rewrites: vec![RemoteRewriteRule {
                pattern: "^origin".to_string(),
                accepted: vec!["6".to_string()],
                url_template: "git://example/{version}.git".to_string(),
            }],
            ..RestoreConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("capture group"));
    }

    #[test]
    fn test_validate_rejects_bad_regex() {
        let config = RestoreConfig {
            remote_rewrites: vec![RemoteRewriteRule {
                pattern: "([".to_string(),
                accepted: vec![],
                url_template: "{version}".to_string(),
            }],
            ..RestoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_means_unbounded() {
        let config = RestoreConfig {
            command_timeout_secs: 0,
            ..RestoreConfig::default()
        };
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn test_rooted_at_disables_host_side_effects() {
        let config = RestoreConfig::rooted_at(std::path::Path::new("/tmp/fixture"));
        assert_eq!(config.webroot, PathBuf::from("/tmp/fixture/www"));
        assert!(config.owner.is_none());
        assert!(config.services.is_empty());
    }
}
