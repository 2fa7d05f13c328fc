//! Launch environment for upstream server processes.
//!
//! Layers, later winning on key collision:
//! 1. inherited process environment
//! 2. extended `PATH` (executable dir, current PATH, platform defaults, `pathExtra`)
//! 3. descriptor `env` overrides

use crate::domain::ServerDescriptor;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Platform-specific PATH separator
#[cfg(unix)]
const PATH_SEPARATOR: &str = ":";
#[cfg(windows)]
const PATH_SEPARATOR: &str = ";";

/// Default paths to include on macOS when PATH is limited (bundled apps)
#[cfg(target_os = "macos")]
const MACOS_DEFAULT_PATHS: &str = "/opt/homebrew/bin:/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin";

/// Access to the process environment (injectable for testing).
pub trait EnvProvider {
    /// Get one variable.
    fn get(&self, key: &str) -> Option<String>;

    /// All variables.
    fn vars(&self) -> Vec<(String, String)>;
}

/// Reads the real process environment.
pub struct SystemEnv;

impl EnvProvider for SystemEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn vars(&self) -> Vec<(String, String)> {
        std::env::vars().collect()
    }
}

/// Fixed set of variables.
#[derive(Debug, Clone, Default)]
pub struct StaticEnv {
    vars: BTreeMap<String, String>,
}

impl StaticEnv {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

impl EnvProvider for StaticEnv {
    fn get(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    fn vars(&self) -> Vec<(String, String)> {
        self.vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Build the effective PATH for a child process.
///
/// Entries are deduplicated, first occurrence wins.
pub fn build_effective_path(
    env: &impl EnvProvider,
    command: &str,
    path_extra: Option<&str>,
) -> String {
    let mut entries: Vec<String> = Vec::new();

    // Bare names like "npx" have an empty parent
    if let Some(dir) = Path::new(command).parent().and_then(Path::to_str) {
        if !dir.is_empty() {
            entries.push(dir.to_string());
        }
    }

    if let Some(current) = env.get("PATH") {
        entries.extend(split_path(&current));
    }

    #[cfg(target_os = "macos")]
    entries.extend(split_path(MACOS_DEFAULT_PATHS));

    if let Some(extra) = path_extra {
        entries.extend(split_path(extra));
    }

    let mut seen = HashSet::new();
    entries.retain(|entry| seen.insert(entry.clone()));
    entries.join(PATH_SEPARATOR)
}

fn split_path(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(PATH_SEPARATOR)
        .filter(|entry| !entry.is_empty())
        .map(ToString::to_string)
}

/// Merged environment for launching `descriptor`.
pub fn launch_environment(env: &impl EnvProvider, descriptor: &ServerDescriptor) -> BTreeMap<String, String> {
    let mut merged: BTreeMap<String, String> = env.vars().into_iter().collect();

    merged.insert(
        "PATH".to_string(),
        build_effective_path(env, &descriptor.command, descriptor.path_extra.as_deref()),
    );

    for (key, value) in &descriptor.env {
        merged.insert(key.clone(), value.clone());
    }

    merged
}
