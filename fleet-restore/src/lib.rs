//! Restore a multi-environment site backup onto a web host.
//!
//! A backup archive (tar, tar.gz or zip) holds one project laid out as
//!
//! ```text
//! <project>/
//! ├── dev/            site tree + database.sql
//! ├── test/
//! ├── live/
//! └── <project>.git/  bare repository
//! ```
//!
//! [`driver::RestoreWorkflow`] sequences the steps: open and extract the
//! archive, resolve its layout, restore each environment's database and
//! files, restore and reconcile the canonical repository, repair
//! permissions, run post-restore hooks and finally remove the extraction
//! directory, whatever happened before.

pub mod archive;
pub mod cli;
pub mod database;
pub mod driver;
pub mod environment;
pub mod error;
pub mod files;
pub mod hooks;
pub mod notify;
pub mod permissions;
pub mod report;
pub mod repository;
pub mod resolver;
pub mod scm;

pub use archive::{Archive, ArchiveEntry, ArchiveFormat, ExtractedArchive};
pub use driver::{CancelToken, Collaborators, RestoreRequest, RestoreState, RestoreWorkflow};
pub use environment::Environment;
pub use error::{RestoreError, Result};
pub use report::{RunReport, RunStatus};
pub use resolver::{BackupLayout, Profile};
