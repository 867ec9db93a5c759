pub mod data;
pub mod io;
pub mod profiles;

pub use data::{Config, McpServerConfig, ModelParams};
pub use io::{config_root, conversations_dir, ConfigError};
pub use profiles::Profile;
