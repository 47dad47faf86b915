use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Filesystem error: {operation} {path}: {source}")]
    Filesystem {
        path: String,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Command failed: {0}")]
    Command(String),

    #[error("Command timed out after {secs}s: {command}\n\nTo debug, try running manually:\n  {command}")]
    Timeout { command: String, secs: u64 },

    #[error("Dependency not found: {0}")]
    Dependency(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FleetError {
    /// Wrap an I/O error with the path and operation that produced it.
    pub fn filesystem(source: std::io::Error, path: impl AsRef<Path>, operation: &'static str) -> Self {
        FleetError::Filesystem {
            path: path.as_ref().display().to_string(),
            operation,
            source,
        }
    }
}

impl From<serde_yaml_ng::Error> for FleetError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        FleetError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(err: serde_json::Error) -> Self {
        FleetError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filesystem_error_names_path_and_operation() {
        let err = FleetError::filesystem(
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            "/var/www/acme",
            "remove_dir_all",
        );
        let msg = err.to_string();
        assert!(msg.contains("remove_dir_all"));
        assert!(msg.contains("/var/www/acme"));
    }

    #[test]
    fn test_timeout_message_includes_command() {
        let err = FleetError::Timeout {
            command: "mysql -u root".to_string(),
            secs: 5,
        };
        assert!(err.to_string().starts_with("Command timed out after 5s: mysql -u root"));
    }
}
