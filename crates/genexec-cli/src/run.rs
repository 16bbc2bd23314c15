//! Run command implementation for genexec CLI.

use std::path::{Path, PathBuf};

use anyhow::Context;
use genexec_core::ExecBroker;

/// Run `executable` once.
pub fn execute(
    broker: &ExecBroker,
    executable: &str,
    description: &str,
    unlogged: &[String],
    args: &[String],
) -> anyhow::Result<()> {
    let path = resolve_executable(executable)?;
    broker.exec(description, &path, unlogged, args)?;
    Ok(())
}

/// Paths are used as given; bare names are looked up on `PATH`.
pub fn resolve_executable(executable: &str) -> anyhow::Result<PathBuf> {
    let path = Path::new(executable);
    if path.components().count() > 1 || path.exists() {
        return Ok(path.to_path_buf());
    }
    which::which(executable)
        .with_context(|| format!("executable '{}' not found on PATH", executable))
}
