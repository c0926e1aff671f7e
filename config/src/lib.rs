pub mod config;
pub mod selection;

pub use config::{Config, ConfigError, ConfigManager, General, StartupPolicy, StreamSettings};
pub use selection::SelectionChange;
