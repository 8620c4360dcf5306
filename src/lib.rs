//! Sigil - signature-driven web vulnerability scanner
//!
//! Reads YAML signatures, expands them into concrete HTTP requests, sends
//! them against target URLs with bounded concurrency and evaluates
//! detection expressions against the responses.

pub mod app;
pub mod error;
pub mod fuzzer;
pub mod http;
pub mod reporting;
pub mod scanner;
pub mod scripting;
pub mod signature;
pub mod template;

pub use error::*;
