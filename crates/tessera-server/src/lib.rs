//! # Tessera Server Library
//!
//! Wires configuration, storage backends and the scheduler service together
//! for the `tessera-server` binary.

pub mod app;
pub mod startup;
