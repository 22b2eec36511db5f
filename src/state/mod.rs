// Persistent settings and saved connections

pub mod config;
pub mod settings;

pub use config::ConfigManager;
pub use settings::{AppSettings, CopySettings};
