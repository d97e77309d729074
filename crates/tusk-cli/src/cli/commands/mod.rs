//! CLI command handlers, one per file.

mod probe;
mod settings;
mod upload;

pub use probe::run_probe;
pub use settings::run_settings;
pub use upload::run_upload;
