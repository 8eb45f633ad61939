pub mod publisher_config;
pub use publisher_config::*;

pub mod config_loader;
pub use config_loader::*;
