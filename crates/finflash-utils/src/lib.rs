//! Shared utilities for FinFlash
//!
//! This crate provides common functionality used across the workspace,
//! including logging setup, JSON configuration loading and environment
//! variable overrides.

pub mod config;
pub mod logging;

pub use config::{AppConfig, ConfigError, env_override, load_json_file};
pub use logging::{LogFormat, init_tracing, init_tracing_with};
