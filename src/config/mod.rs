//! Server configuration: the bracketed config file format, CLI overrides,
//! and the derived logging config (SPEC_FULL.md §6.2, §6.4).

pub mod loader;
pub mod logging;
pub mod types;

pub use loader::ConfigError;
pub use logging::LoggingConfig;
pub use types::{Config, GeneralConfig, ServerListenerConfig, TlsListenerConfig};
