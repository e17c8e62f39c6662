pub mod ai;
pub mod browser;
pub mod core;
pub mod extract;
pub mod fetch;
pub mod html;
pub mod mcp;
pub mod net;
pub mod search;
pub mod urls;

// --- Primary core exports ---
pub use core::config::{config, init_runtime, AppConfig};
pub use core::types;
