//! Application core module
//!
//! Holds the configuration shared by the CLI and the scan engine.

mod config;

pub use config::{Config, GeneralConfig, OobConfig, OutputConfig, ScannerConfig, ScriptingConfig};
