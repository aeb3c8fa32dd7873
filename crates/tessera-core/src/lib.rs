//! # Tessera Core
//!
//! Core types shared by every Tessera crate: validated tenant and queue
//! identifiers, the process-level error type and tracing initialisation.

pub mod error;
pub mod id;
pub mod result;
pub mod telemetry;
pub mod validation;

pub use error::*;
pub use id::*;
pub use result::*;
pub use telemetry::*;

// Re-export shaku for dependency injection
pub use shaku::Interface;
