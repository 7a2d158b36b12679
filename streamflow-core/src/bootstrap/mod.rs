//! Bootstrap helpers for starting the `StreamFlow` server
//!
//! Configuration discovery lives here so the binary stays a thin shell.

pub mod config;

pub use config::load_config;
