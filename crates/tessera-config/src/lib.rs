//! # Tessera Config
//!
//! Layered configuration for the Tessera scheduler: TOML files under a config
//! directory, `.env`, then `TESSERA__*` environment variables.

mod app_config;
mod loader;
mod validation;

pub use app_config::*;
pub use loader::*;
pub use validation::*;
