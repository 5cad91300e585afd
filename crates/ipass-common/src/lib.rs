//! # iPass Common
//!
//! Shared logging configuration for the iPass shell worker crates.

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};
