//! `toolmesh` command-line front end.
//!
//! The binary is the composition root: it loads the server configuration,
//! installs logging, builds a [`ToolService`](toolmesh_mcp::ToolService) and
//! dispatches to a handler.

#![deny(unsafe_code)]

pub mod bootstrap;
pub mod commands;
pub mod handlers;
pub mod parser;
pub mod presentation;

pub use bootstrap::{CliConfig, CliContext, bootstrap, log_filter};
pub use commands::Commands;
pub use parser::Cli;
