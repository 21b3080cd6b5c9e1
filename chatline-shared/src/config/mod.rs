//! # Configuration
//!
//! Server configuration: profile defaults, file loading, environment
//! overrides and validation.

pub mod server;
