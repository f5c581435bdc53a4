//! # azmgmt
//!
//! Command-line front-end for the `azmgmt-client` library: loads
//! configuration, installs logging, wires the client core together and runs
//! one management call per invocation.
//!
//! ## Modules
//!
//! - [`commands`] - Argument parsing and client wiring
//! - [`config`] - `config.toml` and environment loading
//! - [`logger`] - Log dispatch setup

pub mod commands;
pub mod config;
pub mod logger;
