//! Spawning upstream server processes.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::debug;

use toolmesh_core::ServerDescriptor;

use crate::error::SupervisorError;

/// Validate a working directory before handing it to the OS.
pub fn validate_working_dir(cwd: &str) -> Result<(), String> {
    let path = Path::new(cwd);

    if !path.exists() {
        return Err(format!("Working directory does not exist: {cwd}"));
    }

    if !path.is_dir() {
        return Err(format!("Working directory path is not a directory: {cwd}"));
    }

    Ok(())
}

/// Map a spawn failure to a supervisor error.
///
/// `NotFound` means the launcher itself could not be resolved.
pub fn classify_spawn_error(command: &str, error: &io::Error) -> SupervisorError {
    if error.kind() == io::ErrorKind::NotFound {
        SupervisorError::LauncherNotFound {
            command: command.to_string(),
        }
    } else {
        SupervisorError::LaunchFailed {
            command: command.to_string(),
            reason: error.to_string(),
        }
    }
}

/// Spawn `descriptor`'s command with exactly `env` as its environment.
///
/// stdout and stderr are always piped; stdin is piped only when
/// `pipe_stdin` is set.
pub fn spawn_server_process(
    descriptor: &ServerDescriptor,
    env: &BTreeMap<String, String>,
    pipe_stdin: bool,
) -> Result<Child, SupervisorError> {
    let mut cmd = Command::new(&descriptor.command);
    cmd.args(&descriptor.args)
        .env_clear()
        .envs(env)
        .stdin(if pipe_stdin {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(cwd) = descriptor.cwd.as_deref().filter(|c| !c.is_empty()) {
        validate_working_dir(cwd).map_err(|reason| SupervisorError::LaunchFailed {
            command: descriptor.command.clone(),
            reason,
        })?;
        cmd.current_dir(cwd);
    }

    debug!(
        server = %descriptor.name,
        command = %descriptor.command,
        args = ?descriptor.args,
        "Spawning upstream process"
    );

    cmd.spawn()
        .map_err(|e| classify_spawn_error(&descriptor.command, &e))
}
