//! Storage infrastructure: the boot configuration file.
//!
//! The `config` sub-module reads the TOML file, fills in defaults for
//! anything it omits, and checks the TEC map against the bus geometry
//! before the controller starts.

pub mod config;
