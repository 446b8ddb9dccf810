pub mod paths;
pub mod settings;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("could not determine the user home directory")]
  NoHomeDir,
  #[error("io: {0}")]
  Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

pub use paths::*;
pub use settings::{AgentBinaryConfig, DefaultsConfig, Settings};
