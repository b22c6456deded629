pub mod config;
pub mod config_loader;

pub use config::{AppConfig, DatabaseConfig, ExecutionConfig, GatewayConfig};
pub use config_loader::ConfigLoader;
