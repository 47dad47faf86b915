//! Host-level configuration for restore runs.
//!
//! Everything a restore needs to know about the machine it runs on (where
//! sites live, where canonical repositories live, who owns them, which
//! services to bounce) is carried in one [`RestoreConfig`] value that is
//! passed explicitly to every step.

pub mod config;
pub mod loader;

pub use config::{DatabaseSettings, RemoteRewriteRule, RestoreConfig};
pub use loader::ConfigLoader;
