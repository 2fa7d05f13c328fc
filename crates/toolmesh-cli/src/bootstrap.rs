//! Composition root: logging, configuration and service wiring.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use toolmesh_core::ServersConfig;
use toolmesh_mcp::{ServiceOptions, ToolService};

use crate::parser::Cli;

/// Environment variable carrying per-namespace log directives.
pub const LOG_ENV: &str = "TOOLMESH_LOG";

/// Settings resolved from the command line.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub config_path: PathBuf,
    pub debug: bool,
}

impl CliConfig {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            config_path: cli.config.clone(),
            debug: cli.debug,
        }
    }
}

/// Everything a handler needs.
pub struct CliContext {
    service: ToolService,
}

impl CliContext {
    pub const fn service(&self) -> &ToolService {
        &self.service
    }
}

/// Filter directives for the log subscriber.
///
/// Errors are always emitted. `--debug` turns on debug output everywhere;
/// otherwise `namespaces` (e.g. `toolmesh_runtime=debug`) can raise
/// verbosity per target. A directive turning a target `off` is clamped to
/// `error`.
pub fn log_filter(debug: bool, namespaces: Option<&str>) -> String {
    if debug {
        return "debug".to_string();
    }

    let directives: Vec<String> = namespaces
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .filter_map(clamp_directive)
        .collect();

    if directives.is_empty() {
        "error".to_string()
    } else {
        format!("error,{}", directives.join(","))
    }
}

fn clamp_directive(directive: &str) -> Option<String> {
    match directive.rsplit_once('=') {
        Some((target, level)) if level.trim().eq_ignore_ascii_case("off") => {
            Some(format!("{target}=error"))
        }
        // A bare global `off` would drop the error baseline
        None if directive.eq_ignore_ascii_case("off") => None,
        _ => Some(directive.to_string()),
    }
}

/// Install the global log subscriber. Logs go to stderr so command output
/// on stdout stays machine-readable.
pub fn init_logging(debug: bool) {
    let namespaces = std::env::var(LOG_ENV).ok();
    let directives = log_filter(debug, namespaces.as_deref());
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("error"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load the configuration and build the service.
pub fn bootstrap(config: &CliConfig) -> Result<CliContext> {
    let servers = ServersConfig::load(&config.config_path).with_context(|| {
        format!(
            "Failed to load server configuration from {}",
            config.config_path.display()
        )
    })?;
    tracing::debug!(
        path = %config.config_path.display(),
        servers = servers.len(),
        "Loaded server configuration"
    );

    Ok(CliContext {
        service: ToolService::with_default_connector(servers, ServiceOptions::default()),
    })
}
