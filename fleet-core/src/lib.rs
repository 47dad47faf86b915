pub mod command;
pub mod error;
pub mod file_system;
pub mod output_macros;
pub mod temp_dir;

pub use error::{FleetError, Result};
