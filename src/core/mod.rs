pub mod config;
pub mod env_file;
pub mod types;

pub use config::{config, init_runtime, AppConfig, ExtractionStrategy};
