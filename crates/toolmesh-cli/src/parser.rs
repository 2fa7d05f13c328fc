//! Root CLI structure with global options.

use std::path::PathBuf;

use clap::Parser;

use crate::commands::Commands;

/// Aggregate the tools of many MCP servers behind one interface.
#[derive(Parser, Debug)]
#[command(name = "toolmesh")]
#[command(about = "Start MCP tool servers and work with their combined tool catalogue")]
#[command(version)]
pub struct Cli {
    /// Server configuration file (`{"mcpServers": {...}}`)
    #[arg(
        short = 'c',
        long = "config",
        env = "TOOLMESH_CONFIG",
        default_value = "toolmesh.json",
        global = true
    )]
    pub config: PathBuf,

    /// Enable debug logging for every component
    #[arg(short = 'd', long = "debug", env = "TOOLMESH_DEBUG", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}
