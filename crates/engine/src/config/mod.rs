mod loader;
mod validation;

pub use loader::{load_config, load_config_with, ConfigError, EngineConfig, SYSTEM_PROMPT};
pub use validation::validate;
