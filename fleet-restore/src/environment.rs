use serde::{Deserialize, Serialize};
use std::fmt;

/// Deployment stage of a project. Ordering follows promotion order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Test,
    Live,
}

impl Environment {
    pub const ALL: [Environment; 3] = [Environment::Dev, Environment::Test, Environment::Live];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Test => "test",
            Environment::Live => "live",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_names() {
        let names: Vec<&str> = Environment::ALL.iter().map(Environment::as_str).collect();
        assert_eq!(names, ["dev", "test", "live"]);
        assert_eq!(Environment::Test.to_string(), "test");
    }

    #[test]
    fn test_order_is_promotion_order() {
        let mut envs = vec![Environment::Live, Environment::Dev, Environment::Test];
        envs.sort();
        assert_eq!(envs, Environment::ALL.to_vec());
    }

    #[test]
    fn test_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Environment::Live).unwrap(), "\"live\"");
    }
}
