//! Configuration module
//!
//! File and environment configuration for the OData MCP server

pub mod config;

pub use config::{Config, ConfigError, RuntimeConfig};
